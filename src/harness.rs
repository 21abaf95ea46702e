//! The narrow interface between the engine and the process that hosts the
//! test framework. Everything that touches interpreter-global state (the
//! module cache, the import hook chain, trace hooks) goes through here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMap;
use crate::error::HarnessError;

/// Source to serve in place of the on-disk file when `module_name` is
/// imported. `file_path` is reported as the module's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOverride {
    pub module_name: String,
    pub file_path: PathBuf,
    pub source: String,
}

/// Handle to an installed import override. Handles belong to one host
/// generation; once the host restarts they refer to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverrideId {
    pub generation: u64,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    pub generation: u64,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Collect,
    Setup,
    Call,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub nodeid: String,
    pub phase: Phase,
    pub outcome: Outcome,
}

pub trait TestListener {
    fn on_report(&mut self, report: &TestReport);
}

/// One invocation of the test framework. An empty `test_ids` means "run
/// everything under `scope`".
#[derive(Debug, Clone, Copy)]
pub struct TestRequest<'a> {
    pub test_ids: &'a [String],
    pub scope: &'a Path,
    pub timeout: Option<Duration>,
}

/// Removal-side operations are best-effort and never fail; operations that
/// establish forward state return errors.
pub trait Harness {
    /// Drops overrides and temp-dir modules left behind by an earlier run.
    fn reset_stale_state(&mut self);

    fn limit_cpu(&mut self, cores: usize) -> Result<(), HarnessError>;

    fn install_override(&mut self, overrides: &[ModuleOverride]) -> Result<OverrideId, HarnessError>;

    fn remove_override(&mut self, id: OverrideId);

    /// Evicts the named modules (and their submodules) plus every cached
    /// module loaded from inside `project_dir`.
    fn evict_modules(&mut self, module_names: &[String], project_dir: &Path);

    fn purge_framework_caches(&mut self);

    fn snapshot(&mut self) -> Result<SnapshotId, HarnessError>;

    /// Restores the hook chain and module cache captured by `snapshot`,
    /// discarding modules the test run added from the project directory.
    fn restore(&mut self, snapshot: SnapshotId) -> Result<(), HarnessError>;

    /// Removes any override this harness ever installed that is still active.
    fn sweep_overrides(&mut self);

    /// Runs tests, streaming per-phase reports. An `Err` means the harness
    /// itself failed rather than a test.
    fn run_tests(
        &mut self,
        request: &TestRequest<'_>,
        listener: &mut dyn TestListener,
    ) -> Result<(), HarnessError>;

    /// Runs the whole request once with line tracing restricted to `targets`.
    fn collect_coverage(
        &mut self,
        targets: &[PathBuf],
        request: &TestRequest<'_>,
    ) -> Result<CoverageMap, HarnessError>;
}
