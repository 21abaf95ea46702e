pub mod apply;
pub mod benchmark;
pub mod config;
pub mod coverage;
pub mod discover;
pub mod engine;
pub mod error;
pub mod git_diff;
pub mod harness;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod parser;
pub mod resources;
pub mod runner;
pub mod state;
pub mod types;
pub mod worker;

pub use engine::{Engine, EngineOptions, RunRequest};
pub use error::{EngineError, HarnessError, ParseError};
pub use state::RunResult;
