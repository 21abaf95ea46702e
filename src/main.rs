use leela::benchmark;
use leela::config::{self, Config};
use leela::discover;
use leela::engine::{self, Engine, EngineOptions, RunRequest};
use leela::error::ConfigError;
use leela::git_diff::GitDiff;
use leela::operators;
use leela::output;
use leela::state::{self, RunResult};
use leela::worker::{PythonWorker, WorkerConfig};

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

const EXIT_SURVIVORS: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_FAILURE: i32 = 3;

#[derive(Parser)]
#[command(name = "leela", version, about = "Type-aware mutation testing for Python")]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mutate target files and run the test suite against every mutant
    Run(RunArgs),
    /// Print the mutation points of a file and their candidate replacements as JSON
    Points {
        file: PathBuf,
        /// Ignore inferred types when choosing replacements
        #[arg(long)]
        no_types: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run four times, toggling coverage and type pruning, and compare
    Bench(RunArgs),
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Files or directories to mutate (default: target/ or src/)
    targets: Vec<PathBuf>,
    /// Test directory or file pytest runs
    #[arg(short, long)]
    tests: Option<PathBuf>,
    /// Explicit pytest node id, used for mutants on uncovered lines (repeatable)
    #[arg(long = "test-id")]
    test_ids: Vec<String>,
    /// Only mutate lines changed since this git ref
    #[arg(long)]
    diff: Option<String>,
    #[arg(long)]
    max_cores: Option<usize>,
    /// Stop once system memory use reaches this percentage
    #[arg(long)]
    max_memory: Option<f64>,
    /// Disable type-aware operator selection
    #[arg(long)]
    no_types: bool,
    /// Disable per-test coverage; every mutant runs the whole test scope
    #[arg(long)]
    no_coverage: bool,
    /// Per-mutant timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// Python interpreter hosting pytest
    #[arg(long, env = "LEELA_PYTHON")]
    python: Option<String>,
    /// Config file (default: leela.toml or [tool.leela] in pyproject.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output JSON instead of human-readable text
    #[arg(long)]
    json: bool,
    /// Exit code only, no output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run(args) => cmd_run(args, cli.verbose, false),
        Commands::Bench(args) => cmd_run(args, cli.verbose, true),
        Commands::Points { file, no_types, config } => cmd_points(file, no_types, config, cli.verbose),
        Commands::Show { mutant_ref, json } => {
            init_logging("warn", cli.verbose);
            cmd_show(mutant_ref, json)
        }
        Commands::Status { json } => {
            init_logging("warn", cli.verbose);
            cmd_status(json)
        }
    };

    process::exit(exit_code);
}

fn init_logging(level: &str, verbose: u8) {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("LEELA_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

struct Session {
    config: Config,
    root: PathBuf,
    cwd: PathBuf,
}

fn load_session(path: Option<&Path>) -> anyhow::Result<Session> {
    let cwd = current_dir();
    let root = config::find_project_root(&cwd);
    let config = Config::load(path, &root)
        .with_context(|| format!("Failed to load configuration for {}", root.display()))?;
    Ok(Session { config, root, cwd })
}

/// Paths given on the command line are relative to `cwd`; paths from the
/// config file stay relative to the project root.
fn apply_overrides(config: &mut Config, args: &RunArgs, cwd: &Path) {
    if !args.targets.is_empty() {
        config.targets = args.targets.iter().map(|t| config::absolutize(t, cwd)).collect();
    }
    if let Some(tests) = &args.tests {
        config.tests = Some(config::absolutize(tests, cwd));
    }
    if let Some(python) = &args.python {
        config.python = python.clone();
    }
    if args.max_cores.is_some() {
        config.max_cores = args.max_cores;
    }
    if args.max_memory.is_some() {
        config.max_memory_percent = args.max_memory;
    }
    if args.timeout.is_some() {
        config.timeout_seconds = args.timeout;
    }
    if args.no_types {
        config.use_types = false;
    }
    if args.no_coverage {
        config.use_coverage = false;
    }
}

fn engine_options(config: &Config, root: &Path) -> Result<EngineOptions, ConfigError> {
    let mut options = EngineOptions::new(root);
    options.use_types = config.use_types;
    options.use_coverage = config.use_coverage;
    options.timeout = config.timeout()?;
    let mut search_paths: Vec<PathBuf> = config
        .search_paths
        .iter()
        .map(|p| config::absolutize(p, root))
        .collect();
    for path in options.search_paths.drain(..) {
        if !search_paths.contains(&path) {
            search_paths.push(path);
        }
    }
    options.search_paths = search_paths;
    Ok(options)
}

fn resolve_targets(config: &Config, root: &Path, diff: Option<&str>) -> anyhow::Result<Vec<PathBuf>> {
    if config.targets.is_empty() {
        if let Some(base) = diff {
            let files = GitDiff::new(root)
                .changed_files(base)
                .into_iter()
                .filter(|f| {
                    let name = f.file_name().unwrap_or_default().to_string_lossy();
                    !name.starts_with("__") && !discover::is_test_file(&name)
                })
                .collect();
            return Ok(files);
        }
    }
    discover::discover_targets(&config.targets, root)
        .with_context(|| format!("Failed to list targets under {}", root.display()))
}

fn cmd_run(args: RunArgs, verbose: u8, bench: bool) -> i32 {
    let Session { mut config, root, cwd } = match load_session(args.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            init_logging("warn", verbose);
            output::print_error(&format!("{e:#}"));
            return EXIT_USAGE;
        }
    };
    apply_overrides(&mut config, &args, &cwd);
    let default_level = if args.quiet || args.json { "error" } else { config.log_level.as_str() };
    init_logging(default_level, verbose);

    let target_files = match resolve_targets(&config, &root, args.diff.as_deref()) {
        Ok(files) => files,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            return EXIT_USAGE;
        }
    };
    if target_files.is_empty() {
        if !args.quiet {
            if args.json {
                println!("{}", output::json_report(&RunResult::default()));
            } else {
                output::print_success("No Python files to mutate.");
            }
        }
        return 0;
    }
    for file in &target_files {
        if !file.is_file() {
            output::print_error(&format!(
                "Target not found: {}. Check the path and try again.",
                file.display()
            ));
            return EXIT_USAGE;
        }
    }

    let mut worker_config = WorkerConfig::new(config.resolve_python(&root, &cwd), &root);
    worker_config.pytest_args = config.pytest_args.clone();
    let options = match engine_options(&config, &root) {
        Ok(options) => options,
        Err(e) => {
            output::print_error(&e.to_string());
            return EXIT_USAGE;
        }
    };
    worker_config.search_paths = options.search_paths.clone();

    let mut worker = PythonWorker::new(worker_config);
    if let Err(e) = worker.start() {
        output::print_error(&format!(
            "Could not start the test worker: {e}. Pass --python <interpreter> with pytest installed."
        ));
        return EXIT_FAILURE;
    }

    let limits = config.limits();
    let request = RunRequest {
        target_files,
        test_scope: config.test_scope(&root),
        limits: (limits.max_cores.is_some() || limits.max_memory_percent.is_some()).then_some(limits),
        diff_base: args.diff.clone(),
        test_ids: (!args.test_ids.is_empty()).then(|| args.test_ids.clone()),
    };
    let mut engine = Engine::new(worker, options);

    if bench {
        return match benchmark::run_benchmark(&mut engine, &request) {
            Ok(rows) => {
                if args.json {
                    println!("{}", serde_json::json!({ "benchmark": rows }));
                } else if !args.quiet {
                    print!("{}", benchmark::format_report(&rows));
                }
                0
            }
            Err(e) => {
                output::print_error(&format!("Benchmark failed: {e}"));
                EXIT_FAILURE
            }
        };
    }

    let term = Term::stderr();
    let show_progress = !args.quiet && !args.json && term.is_term();
    let result = engine.run_with_progress(&request, &mut |done, planned, r| {
        if show_progress {
            let _ = term.clear_line();
            let _ = term.write_str(&format!(
                "  [{done}/{planned}] {}:{} {}",
                r.mutant.point.file_path.file_name().unwrap_or_default().to_string_lossy(),
                r.mutant.point.line,
                if r.killed { "killed" } else { "survived" },
            ));
        }
    });
    if show_progress {
        let _ = term.clear_line();
    }

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            output::print_error(&format!("Mutation run failed: {e}"));
            return EXIT_FAILURE;
        }
    };

    if let Err(e) = state::save_last_run(&result) {
        tracing::warn!(error = %e, "could not save run state");
    }

    let code = if result.survived().is_empty() { 0 } else { EXIT_SURVIVORS };
    if args.quiet {
        return code;
    }
    if args.json {
        println!("{}", output::json_report(&result));
    } else {
        output::print_run_result(&result, &root);
    }
    code
}

fn cmd_points(file: PathBuf, no_types: bool, config_path: Option<PathBuf>, verbose: u8) -> i32 {
    let session = match load_session(config_path.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            init_logging("warn", verbose);
            output::print_error(&format!("{e:#}"));
            return EXIT_USAGE;
        }
    };
    init_logging("warn", verbose);

    let file = config::absolutize(&file, &session.cwd);
    if !file.is_file() {
        output::print_error(&format!("Source file not found: {}.", file.display()));
        return EXIT_USAGE;
    }
    let mut options = match engine_options(&session.config, &session.root) {
        Ok(options) => options,
        Err(e) => {
            output::print_error(&e.to_string());
            return EXIT_USAGE;
        }
    };
    options.use_types = options.use_types && !no_types;

    match engine::scan_file(&file, &options) {
        Ok((_, points)) => {
            let entries: Vec<_> = points
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "point": p,
                        "mutations": operators::mutations_for(p, options.use_types),
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&entries) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(e) => {
                    output::print_error(&format!("Failed to encode points: {e}"));
                    EXIT_FAILURE
                }
            }
        }
        Err(e) => {
            output::print_error(&e.to_string());
            EXIT_FAILURE
        }
    }
}

fn cmd_show(mutant_ref: String, json_mode: bool) -> i32 {
    let last_run = match state::load_last_run() {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `leela run` first.");
            return EXIT_USAGE;
        }
    };
    let root = config::find_project_root(&current_dir());

    match last_run.survivor(&mutant_ref) {
        Some(r) => {
            if json_mode {
                match serde_json::to_string(r) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        output::print_error(&format!("Failed to encode mutant: {e}"));
                        return EXIT_FAILURE;
                    }
                }
            } else {
                let source = last_run
                    .target_sources
                    .get(&r.mutant.point.file_path)
                    .map(String::as_str);
                output::print_mutant_detail(&mutant_ref, r, source, &root);
            }
            0
        }
        None => {
            let valid: Vec<_> = last_run
                .survivor_refs()
                .into_iter()
                .map(|(id, _)| format!("@{id}"))
                .collect();
            output::print_error(&format!(
                "Mutant @{} not found. Valid refs: {}",
                mutant_ref.trim_start_matches('@'),
                valid.join(", ")
            ));
            EXIT_USAGE
        }
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(result) => {
            if json_mode {
                println!("{}", output::json_report(&result));
            } else {
                output::print_status(&result, &config::find_project_root(&current_dir()));
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `leela run` first.");
            EXIT_USAGE
        }
    }
}
