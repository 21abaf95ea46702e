//! `Harness` backed by a long-lived Python interpreter running pytest
//! in-process. The interpreter is driven over JSON lines; see `worker.py`.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMap;
use crate::error::HarnessError;
use crate::harness::{
    Harness, ModuleOverride, Outcome, OverrideId, Phase, SnapshotId, TestListener, TestReport,
    TestRequest,
};

const WORKER_SCRIPT: &str = include_str!("worker.py");

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// pytest exit code for an internal error: an exception escaped the session.
const PYTEST_INTERNAL_ERROR: i64 = 3;

const BASE_PYTEST_ARGS: &[&str] = &[
    "--tb=no",
    "-q",
    "--no-header",
    "--override-ini=addopts=",
    "-p",
    "no:cacheprovider",
    "--capture=sys",
];

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpreter to launch.
    pub python: String,
    pub working_dir: PathBuf,
    /// Prepended to the interpreter's `sys.path`.
    pub search_paths: Vec<PathBuf>,
    /// Extra pytest arguments, inserted before test ids.
    pub pytest_args: Vec<String>,
}

impl WorkerConfig {
    pub fn new(python: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        WorkerConfig {
            python: python.into(),
            working_dir: working_dir.into(),
            search_paths: Vec::new(),
            pytest_args: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Reset,
    LimitCpu { cores: usize },
    Install { modules: &'a [ModuleOverride] },
    Remove { id: u64 },
    Evict { modules: &'a [String], project_dir: &'a Path },
    PurgeCaches,
    Snapshot,
    Restore { id: u64 },
    Sweep,
    Run { args: Vec<String> },
    Coverage { args: Vec<String>, targets: &'a [PathBuf] },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    Ready {
        python: String,
        pytest: String,
    },
    Ok {
        #[serde(default)]
        id: Option<u64>,
    },
    Error {
        message: String,
    },
    Report {
        nodeid: String,
        phase: Phase,
        outcome: Outcome,
    },
    Covered {
        nodeid: String,
        file: PathBuf,
        lines: Vec<usize>,
    },
    Done {
        exit_code: i64,
    },
    Crashed {
        message: String,
    },
}

impl Event {
    fn is_terminal(&self) -> bool {
        !matches!(self, Event::Report { .. } | Event::Covered { .. })
    }
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    events: Receiver<Result<Event, String>>,
}

impl Process {
    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn shutdown(mut self) {
        if let Ok(line) = serde_json::to_string(&Request::Shutdown) {
            let _ = writeln!(self.stdin, "{line}");
        }
        drop(self.stdin);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Persistent pytest host. A worker that dies (crash, timeout, `os._exit`
/// in mutated code) is restarted on the next command; handles issued
/// before the restart become no-ops.
pub struct PythonWorker {
    config: WorkerConfig,
    script: Option<tempfile::NamedTempFile>,
    process: Option<Process>,
    generation: u64,
}

impl PythonWorker {
    pub fn new(config: WorkerConfig) -> Self {
        PythonWorker {
            config,
            script: None,
            process: None,
            generation: 0,
        }
    }

    /// Starts the interpreter now rather than on first use, surfacing a
    /// missing Python or pytest up front.
    pub fn start(&mut self) -> Result<(), HarnessError> {
        self.ensure_process().map(|_| ())
    }

    fn script_path(&mut self) -> Result<PathBuf, HarnessError> {
        if self.script.is_none() {
            let mut file = tempfile::Builder::new()
                .prefix("leela-worker-")
                .suffix(".py")
                .tempfile()?;
            file.write_all(WORKER_SCRIPT.as_bytes())?;
            file.flush()?;
            self.script = Some(file);
        }
        match &self.script {
            Some(file) => Ok(file.path().to_path_buf()),
            None => Err(HarnessError::Unavailable("worker script missing".to_string())),
        }
    }

    fn ensure_process(&mut self) -> Result<&mut Process, HarnessError> {
        if self.process.is_none() {
            let process = self.spawn()?;
            self.generation += 1;
            self.process = Some(process);
        }
        self.process
            .as_mut()
            .ok_or_else(|| HarnessError::Unavailable("worker not running".to_string()))
    }

    fn spawn(&mut self) -> Result<Process, HarnessError> {
        let script = self.script_path()?;
        let search_paths = serde_json::to_string(&self.config.search_paths)
            .map_err(|e| HarnessError::Protocol(e.to_string()))?;

        let mut child = Command::new(&self.config.python)
            .arg(&script)
            .current_dir(&self.config.working_dir)
            .env("LEELA_SEARCH_PATHS", search_paths)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("OBJC_DISABLE_INITIALIZE_FORK_SAFETY", "YES")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: self.config.python.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HarnessError::Unavailable("worker pipes unavailable".to_string()));
        };

        let (tx, events) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let event = serde_json::from_str::<Event>(&line).map_err(|e| format!("{e}: {line}"));
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                tracing::debug!(target: "leela::worker", "{line}");
            }
        });

        let process = Process { child, stdin, events };
        match recv_event(&process.events, Some(STARTUP_TIMEOUT)) {
            Ok(Event::Ready { python, pytest }) => {
                tracing::debug!(%python, %pytest, "test worker ready");
                Ok(process)
            }
            Ok(Event::Error { message }) => {
                process.kill();
                Err(HarnessError::Unavailable(message))
            }
            Ok(other) => {
                process.kill();
                Err(HarnessError::Protocol(format!("expected ready, got {other:?}")))
            }
            Err(e) => {
                process.kill();
                Err(e)
            }
        }
    }

    /// Sends one command and reads events until a terminal one arrives.
    /// Any transport failure or timeout discards the process.
    fn call(
        &mut self,
        request: &Request<'_>,
        timeout: Option<Duration>,
        on_stream: &mut dyn FnMut(Event),
    ) -> Result<Event, HarnessError> {
        let line = serde_json::to_string(request).map_err(|e| HarnessError::Protocol(e.to_string()))?;
        let deadline = timeout.and_then(deadline_after);

        let outcome = {
            let process = self.ensure_process()?;
            match writeln!(process.stdin, "{line}").and_then(|_| process.stdin.flush()) {
                Err(_) => Err(HarnessError::Disconnected),
                Ok(()) => loop {
                    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                    match recv_event(&process.events, remaining) {
                        Ok(event) if event.is_terminal() => break Ok(event),
                        Ok(event) => on_stream(event),
                        Err(HarnessError::Timeout(_)) => {
                            break Err(HarnessError::Timeout(timeout.unwrap_or_default()));
                        }
                        Err(e) => break Err(e),
                    }
                },
            }
        };

        if outcome.is_err() {
            if let Some(process) = self.process.take() {
                process.kill();
            }
        }
        outcome
    }

    fn control(&mut self, request: &Request<'_>) -> Result<Option<u64>, HarnessError> {
        match self.call(request, Some(CONTROL_TIMEOUT), &mut |_| {})? {
            Event::Ok { id } => Ok(id),
            Event::Error { message } => Err(HarnessError::Worker(message)),
            other => Err(HarnessError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    fn control_with_id(&mut self, request: &Request<'_>) -> Result<u64, HarnessError> {
        self.control(request)?
            .ok_or_else(|| HarnessError::Protocol("reply carried no id".to_string()))
    }

    /// Removal-side command: logged, never propagated.
    fn best_effort(&mut self, request: &Request<'_>) {
        if let Err(e) = self.control(request) {
            tracing::debug!(error = %e, "worker cleanup step failed");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.process.is_some() && generation == self.generation
    }

    fn pytest_args(&self, request: &TestRequest<'_>, stop_on_failure: bool) -> Vec<String> {
        let mut args: Vec<String> = BASE_PYTEST_ARGS.iter().map(|s| s.to_string()).collect();
        if stop_on_failure {
            args.insert(3, "-x".to_string());
        }
        args.extend(self.config.pytest_args.iter().cloned());
        if request.test_ids.is_empty() {
            args.push(request.scope.to_string_lossy().to_string());
        } else {
            args.extend(request.test_ids.iter().cloned());
        }
        args
    }
}

/// `None` when `timeout` reaches past what an `Instant` can represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn recv_event(
    events: &Receiver<Result<Event, String>>,
    timeout: Option<Duration>,
) -> Result<Event, HarnessError> {
    let received = match timeout {
        Some(t) => events.recv_timeout(t),
        None => events.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(Ok(event)) => Ok(event),
        Ok(Err(message)) => Err(HarnessError::Protocol(message)),
        Err(RecvTimeoutError::Timeout) => Err(HarnessError::Timeout(timeout.unwrap_or_default())),
        Err(RecvTimeoutError::Disconnected) => Err(HarnessError::Disconnected),
    }
}

impl Harness for PythonWorker {
    fn reset_stale_state(&mut self) {
        self.best_effort(&Request::Reset);
    }

    fn limit_cpu(&mut self, cores: usize) -> Result<(), HarnessError> {
        self.control(&Request::LimitCpu { cores }).map(|_| ())
    }

    fn install_override(&mut self, overrides: &[ModuleOverride]) -> Result<OverrideId, HarnessError> {
        let id = self.control_with_id(&Request::Install { modules: overrides })?;
        Ok(OverrideId {
            generation: self.generation,
            id,
        })
    }

    fn remove_override(&mut self, id: OverrideId) {
        if self.is_current(id.generation) {
            self.best_effort(&Request::Remove { id: id.id });
        }
    }

    fn evict_modules(&mut self, module_names: &[String], project_dir: &Path) {
        self.best_effort(&Request::Evict {
            modules: module_names,
            project_dir,
        });
    }

    fn purge_framework_caches(&mut self) {
        self.best_effort(&Request::PurgeCaches);
    }

    fn snapshot(&mut self) -> Result<SnapshotId, HarnessError> {
        let id = self.control_with_id(&Request::Snapshot)?;
        Ok(SnapshotId {
            generation: self.generation,
            id,
        })
    }

    fn restore(&mut self, snapshot: SnapshotId) -> Result<(), HarnessError> {
        // A restarted interpreter already is a clean baseline.
        if !self.is_current(snapshot.generation) {
            return Ok(());
        }
        self.control(&Request::Restore { id: snapshot.id }).map(|_| ())
    }

    fn sweep_overrides(&mut self) {
        if self.process.is_some() {
            self.best_effort(&Request::Sweep);
        }
    }

    fn run_tests(
        &mut self,
        request: &TestRequest<'_>,
        listener: &mut dyn TestListener,
    ) -> Result<(), HarnessError> {
        let args = self.pytest_args(request, true);
        let terminal = self.call(&Request::Run { args }, request.timeout, &mut |event| {
            if let Event::Report { nodeid, phase, outcome } = event {
                listener.on_report(&TestReport { nodeid, phase, outcome });
            }
        })?;
        match terminal {
            Event::Done { exit_code } if exit_code == PYTEST_INTERNAL_ERROR => {
                Err(HarnessError::Worker("pytest internal error".to_string()))
            }
            Event::Done { .. } => Ok(()),
            Event::Crashed { message } | Event::Error { message } => Err(HarnessError::Worker(message)),
            other => Err(HarnessError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    fn collect_coverage(
        &mut self,
        targets: &[PathBuf],
        request: &TestRequest<'_>,
    ) -> Result<CoverageMap, HarnessError> {
        let args = self.pytest_args(request, false);
        let mut map = CoverageMap::new();
        let terminal = self.call(&Request::Coverage { args, targets }, request.timeout, &mut |event| {
            if let Event::Covered { nodeid, file, lines } = event {
                map.record_lines(&file, lines, &nodeid);
            }
        })?;
        match terminal {
            Event::Done { .. } => Ok(map),
            Event::Crashed { message } | Event::Error { message } => Err(HarnessError::Worker(message)),
            other => Err(HarnessError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }
}

impl Drop for PythonWorker {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown();
        }
    }
}
