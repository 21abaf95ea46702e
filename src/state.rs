use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMap;
use crate::mutants::MutantResult;

pub const STATE_FILE: &str = ".leela-state.json";

/// Everything one engine run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Random id tying the saved state to the run's log lines.
    #[serde(default)]
    pub session_id: String,
    pub target_files: Vec<PathBuf>,
    /// Candidates before type pruning: tested plus pruned.
    pub total_mutants: i64,
    pub mutants_tested: usize,
    /// Negative when typing widened the candidate set.
    pub mutants_pruned: i64,
    pub results: Vec<MutantResult>,
    pub wall_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_map: Option<CoverageMap>,
    #[serde(default)]
    pub target_sources: BTreeMap<PathBuf, String>,
    /// Iteration stopped on the memory limit.
    #[serde(default)]
    pub stopped_early: bool,
}

impl RunResult {
    pub fn killed(&self) -> usize {
        self.results.iter().filter(|r| r.killed).count()
    }

    pub fn survived(&self) -> Vec<&MutantResult> {
        self.results.iter().filter(|r| !r.killed).collect()
    }

    /// Killed percentage of tested mutants; 0 when nothing was tested.
    pub fn mutation_score(&self) -> f64 {
        if self.mutants_tested == 0 {
            return 0.0;
        }
        self.killed() as f64 / self.mutants_tested as f64 * 100.0
    }

    pub fn timed_out(&self) -> usize {
        self.results.iter().filter(|r| r.timed_out).count()
    }

    /// Survivors with their `m1`, `m2`, ... refs, in result order.
    pub fn survivor_refs(&self) -> Vec<(String, &MutantResult)> {
        self.survived()
            .into_iter()
            .enumerate()
            .map(|(i, r)| (format!("m{}", i + 1), r))
            .collect()
    }

    /// Looks up a survivor by ref, with or without the leading `@`.
    pub fn survivor(&self, mutant_ref: &str) -> Option<&MutantResult> {
        let wanted = mutant_ref.trim_start_matches('@');
        self.survivor_refs()
            .into_iter()
            .find(|(id, _)| id == wanted)
            .map(|(_, r)| r)
    }
}

pub fn new_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

pub fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_FILE)
}

pub fn save_last_run(result: &RunResult) -> std::io::Result<()> {
    save_to_path(result, &state_path())
}

pub fn load_last_run() -> Option<RunResult> {
    load_from_path(&state_path())
}

/// Writes the run without its coverage map, which can be large and is not
/// needed to inspect survivors later.
pub fn save_to_path(result: &RunResult, path: &Path) -> std::io::Result<()> {
    let stored = RunResult {
        coverage_map: None,
        ..result.clone()
    };
    let json = serde_json::to_string(&stored)?;
    std::fs::write(path, json)
}

pub fn load_from_path(path: &Path) -> Option<RunResult> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
