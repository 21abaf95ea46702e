use std::path::Path;
use std::time::{Duration, Instant};

use crate::apply::{self, MutatedSource};
use crate::error::HarnessError;
use crate::harness::{
    Harness, ModuleOverride, Outcome, OverrideId, Phase, SnapshotId, TestListener, TestReport,
    TestRequest,
};
use crate::mutants::{CRASHED, Mutant, MutantResult, TIMED_OUT};

/// Everything needed to execute one mutant.
#[derive(Debug, Clone, Copy)]
pub struct MutantJob<'a> {
    pub mutant: &'a Mutant,
    /// Unmutated source of the mutant's module.
    pub source: &'a str,
    /// Tests to run; empty runs the whole `scope`.
    pub test_ids: &'a [String],
    pub scope: &'a Path,
    pub project_dir: &'a Path,
    pub timeout: Option<Duration>,
}

/// Collects per-test outcomes. Only call-phase reports count as tests run;
/// failures in any other phase are errors, which kill just the same.
#[derive(Debug, Default)]
pub struct ResultCollector {
    pub tests_run: usize,
    pub test_ids_run: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
    killing: Vec<String>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failing and erroring tests in the order they were reported.
    pub fn killing_tests(&self) -> &[String] {
        &self.killing
    }

    fn record_kill(&mut self, nodeid: &str) {
        if !self.killing.iter().any(|k| k == nodeid) {
            self.killing.push(nodeid.to_string());
        }
    }
}

impl TestListener for ResultCollector {
    fn on_report(&mut self, report: &TestReport) {
        match (report.phase, report.outcome) {
            (Phase::Call, outcome) => {
                self.tests_run += 1;
                self.test_ids_run.push(report.nodeid.clone());
                if outcome == Outcome::Failed {
                    self.failed.push(report.nodeid.clone());
                    self.record_kill(&report.nodeid);
                }
            }
            (Phase::Collect | Phase::Setup | Phase::Teardown, Outcome::Failed) => {
                self.errors.push(report.nodeid.clone());
                self.record_kill(&report.nodeid);
            }
            _ => {}
        }
    }
}

/// Installs the mutant, runs its tests and rolls the host back.
///
/// A harness failure while tests run is recorded as a kill. Failures to
/// establish forward state (install, snapshot, restore) are returned.
pub fn run_mutant<H: Harness + ?Sized>(
    harness: &mut H,
    job: &MutantJob<'_>,
) -> Result<MutantResult, HarnessError> {
    let start = Instant::now();
    let mutant = job.mutant;
    let MutatedSource { source: mutated, applied } = apply::apply_mutation(job.source, mutant);
    if !applied {
        tracing::debug!(mutant = mutant.id, "no matching node, running unmodified source");
    }
    let diff = apply::generate_diff(job.source, &mutated);

    let module_override = ModuleOverride {
        module_name: mutant.point.module_name.clone(),
        file_path: mutant.point.file_path.clone(),
        source: mutated,
    };
    let request = TestRequest {
        test_ids: job.test_ids,
        scope: job.scope,
        timeout: job.timeout,
    };

    let mut session = MutantSession::new(harness, vec![mutant.point.module_name.clone()], job.project_dir);
    session.install(std::slice::from_ref(&module_override))?;
    let mut collector = ResultCollector::new();
    let outcome = session.run(&request, &mut collector);
    session.finish()?;

    let mut result = MutantResult {
        mutant: mutant.clone(),
        killed: false,
        tests_run: collector.tests_run,
        killing_test: None,
        killing_tests: collector.killing_tests().to_vec(),
        test_ids_run: collector.test_ids_run,
        time_seconds: 0.0,
        applied,
        timed_out: false,
        diff,
    };

    match outcome {
        Ok(()) => {
            result.killed = !result.killing_tests.is_empty();
            result.killing_test = result.killing_tests.first().cloned();
        }
        Err(HarnessError::Timeout(limit)) => {
            tracing::warn!(mutant = mutant.id, ?limit, "mutant timed out");
            result.killed = true;
            result.timed_out = true;
            result.killing_test = Some(TIMED_OUT.to_string());
            result.killing_tests = vec![TIMED_OUT.to_string()];
        }
        Err(e) => {
            tracing::warn!(mutant = mutant.id, error = %e, "test harness crashed");
            result.killed = true;
            result.killing_test = Some(CRASHED.to_string());
            result.killing_tests = vec![CRASHED.to_string()];
            result.test_ids_run = Vec::new();
        }
    }
    result.time_seconds = start.elapsed().as_secs_f64();

    tracing::debug!(
        mutant = mutant.id,
        killed = result.killed,
        tests_run = result.tests_run,
        "mutant finished"
    );
    Ok(result)
}

/// Scoped ownership of the host state touched by one mutant. Dropping the
/// session without `finish` still rolls everything back.
struct MutantSession<'h, H: Harness + ?Sized> {
    harness: &'h mut H,
    modules: Vec<String>,
    project_dir: &'h Path,
    override_id: Option<OverrideId>,
    snapshot: Option<SnapshotId>,
    done: bool,
}

impl<'h, H: Harness + ?Sized> MutantSession<'h, H> {
    fn new(harness: &'h mut H, modules: Vec<String>, project_dir: &'h Path) -> Self {
        MutantSession {
            harness,
            modules,
            project_dir,
            override_id: None,
            snapshot: None,
            done: false,
        }
    }

    fn install(&mut self, overrides: &[ModuleOverride]) -> Result<(), HarnessError> {
        self.override_id = Some(self.harness.install_override(overrides)?);
        self.harness.evict_modules(&self.modules, self.project_dir);
        self.harness.purge_framework_caches();
        self.snapshot = Some(self.harness.snapshot()?);
        Ok(())
    }

    fn run(
        &mut self,
        request: &TestRequest<'_>,
        listener: &mut dyn TestListener,
    ) -> Result<(), HarnessError> {
        self.harness.run_tests(request, listener)
    }

    fn finish(mut self) -> Result<(), HarnessError> {
        self.done = true;
        self.rollback()
    }

    fn rollback(&mut self) -> Result<(), HarnessError> {
        if let Some(id) = self.override_id.take() {
            self.harness.remove_override(id);
        }
        self.harness.evict_modules(&self.modules, self.project_dir);
        let restored = match self.snapshot.take() {
            Some(snapshot) => self.harness.restore(snapshot),
            None => Ok(()),
        };
        self.harness.purge_framework_caches();
        self.harness.sweep_overrides();
        restored
    }
}

impl<H: Harness + ?Sized> Drop for MutantSession<'_, H> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.rollback() {
                tracing::debug!(error = %e, "rollback after aborted mutant failed");
            }
        }
    }
}
