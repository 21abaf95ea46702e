//! Drives one mutation-testing run: scan, enrich, expand, scope, trace,
//! then execute every mutant in order against the harness.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use crate::coverage::{self, CoverageMap};
use crate::error::EngineError;
use crate::git_diff::{ChangedLines, DiffProvider, GitDiff};
use crate::harness::{Harness, TestRequest};
use crate::mutants::{Mutant, MutantResult, MutationPoint};
use crate::operators;
use crate::parser;
use crate::resources::{self, MemoryMonitor, ProcMeminfo, ResourceLimits};
use crate::runner::{self, MutantJob};
use crate::state::{self, RunResult};
use crate::types;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub use_types: bool,
    pub use_coverage: bool,
    /// Project directory: module eviction boundary and module-name fallback.
    pub working_dir: PathBuf,
    /// Import roots used to derive module names.
    pub search_paths: Vec<PathBuf>,
    pub timeout: Option<Duration>,
}

impl EngineOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        EngineOptions {
            use_types: true,
            use_coverage: true,
            search_paths: default_search_paths(&working_dir),
            working_dir,
            timeout: None,
        }
    }
}

/// Arguments of one `Engine::run`.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub target_files: Vec<PathBuf>,
    /// What pytest runs when a mutant has no narrower test selection.
    pub test_scope: PathBuf,
    pub limits: Option<ResourceLimits>,
    /// Restrict mutants to lines changed since this git ref.
    pub diff_base: Option<String>,
    /// Fallback selection for mutants on uncovered lines.
    pub test_ids: Option<Vec<String>>,
}

/// Mutants generated from a set of target files, before any scoping.
#[derive(Debug, Clone, Default)]
pub struct MutantPlan {
    pub mutants: Vec<Mutant>,
    pub pruned: i64,
    pub sources: BTreeMap<PathBuf, String>,
}

pub struct Engine<H: Harness> {
    options: EngineOptions,
    harness: H,
    monitor: Box<dyn MemoryMonitor>,
    diff: Box<dyn DiffProvider>,
}

impl<H: Harness> Engine<H> {
    pub fn new(harness: H, options: EngineOptions) -> Self {
        let diff = GitDiff::new(options.working_dir.clone());
        Engine {
            options,
            harness,
            monitor: Box::new(ProcMeminfo::new()),
            diff: Box::new(diff),
        }
    }

    pub fn with_memory_monitor(mut self, monitor: impl MemoryMonitor + 'static) -> Self {
        self.monitor = Box::new(monitor);
        self
    }

    pub fn with_diff_provider(mut self, diff: impl DiffProvider + 'static) -> Self {
        self.diff = Box::new(diff);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EngineOptions {
        &mut self.options
    }

    pub fn harness(&self) -> &H {
        &self.harness
    }

    pub fn into_harness(self) -> H {
        self.harness
    }

    /// Expands every target into mutants, numbered across files in order.
    pub fn plan(&self, target_files: &[PathBuf]) -> Result<MutantPlan, EngineError> {
        let mut plan = MutantPlan::default();
        for file in target_files {
            let file = crate::config::absolutize(file, &self.options.working_dir);
            let (source, points) = scan_file(&file, &self.options)?;
            let pruned = operators::count_pruned(&points, self.options.use_types);
            plan.pruned += pruned;

            let before = plan.mutants.len();
            for point in &points {
                for &replacement in operators::mutations_for(point, self.options.use_types) {
                    plan.mutants.push(Mutant {
                        id: plan.mutants.len(),
                        point: point.clone(),
                        replacement,
                    });
                }
            }
            tracing::debug!(
                file = %file.display(),
                points = points.len(),
                mutants = plan.mutants.len() - before,
                pruned,
                "scanned"
            );
            plan.sources.insert(file, source);
        }
        Ok(plan)
    }

    pub fn run(&mut self, request: &RunRequest) -> Result<RunResult, EngineError> {
        self.run_with_progress(request, &mut |_, _, _| {})
    }

    /// Like `run`, calling `progress(done, planned, result)` after each mutant.
    pub fn run_with_progress(
        &mut self,
        request: &RunRequest,
        progress: &mut dyn FnMut(usize, usize, &MutantResult),
    ) -> Result<RunResult, EngineError> {
        let start = Instant::now();
        let session_id = state::new_session_id();
        let span = tracing::info_span!("run", session = %session_id);
        let _entered = span.enter();

        self.harness.reset_stale_state();
        if let Some(limits) = &request.limits {
            resources::apply_limits(&mut self.harness, limits)?;
        }

        let target_files: Vec<PathBuf> = request
            .target_files
            .iter()
            .map(|f| crate::config::absolutize(f, &self.options.working_dir))
            .collect();
        let MutantPlan {
            mut mutants,
            pruned,
            sources,
        } = self.plan(&target_files)?;
        let total_mutants = mutants.len() as i64 + pruned;
        tracing::info!(
            files = target_files.len(),
            mutants = mutants.len(),
            pruned,
            total_mutants,
            "mutants generated"
        );

        if let Some(base) = &request.diff_base {
            let mut changed = ChangedLines::new();
            for (path, lines) in self.diff.changed_lines(base) {
                changed.entry(crate::config::canonical(&path)).or_default().extend(lines);
            }
            let resolved: HashMap<&Path, PathBuf> = target_files
                .iter()
                .map(|f| (f.as_path(), crate::config::canonical(f)))
                .collect();
            let before = mutants.len();
            mutants.retain(|m| {
                let file = m.point.file_path.as_path();
                let key = resolved
                    .get(file)
                    .cloned()
                    .unwrap_or_else(|| crate::config::canonical(file));
                changed.get(&key).is_some_and(|lines| lines.contains(&m.point.line))
            });
            tracing::info!(base = %base, kept = mutants.len(), dropped = before - mutants.len(), "diff scope applied");
        }

        let explicit_ids = request.test_ids.as_deref().unwrap_or(&[]);
        let coverage_map = if self.options.use_coverage && !mutants.is_empty() {
            self.trace_baseline(&target_files, &request.test_scope, explicit_ids)?
        } else {
            None
        };

        let planned = mutants.len();
        let mut results = Vec::with_capacity(planned);
        let mut stopped_early = false;
        for mutant in &mutants {
            if let Some(limits) = &request.limits {
                if !limits.is_memory_ok(self.monitor.as_ref()) {
                    tracing::warn!(
                        tested = results.len(),
                        remaining = planned - results.len(),
                        "memory limit reached, stopping"
                    );
                    stopped_early = true;
                    break;
                }
            }

            let covered = coverage_map
                .as_ref()
                .map(|map| map.tests_for(&mutant.point.file_path, mutant.point.line))
                .unwrap_or_default();
            let test_ids: &[String] = if !covered.is_empty() {
                &covered
            } else {
                explicit_ids
            };

            let source = sources
                .get(&mutant.point.file_path)
                .ok_or_else(|| EngineError::MissingSource(mutant.point.file_path.clone()))?;
            let job = MutantJob {
                mutant,
                source,
                test_ids,
                scope: &request.test_scope,
                project_dir: &self.options.working_dir,
                timeout: self.options.timeout,
            };
            let result = runner::run_mutant(&mut self.harness, &job)?;
            results.push(result);
            if let Some(last) = results.last() {
                progress(results.len(), planned, last);
            }
        }

        let result = RunResult {
            session_id,
            target_files,
            total_mutants,
            mutants_tested: results.len(),
            mutants_pruned: pruned,
            results,
            wall_time_seconds: start.elapsed().as_secs_f64(),
            coverage_map,
            target_sources: sources,
            stopped_early,
        };
        tracing::info!(
            tested = result.mutants_tested,
            killed = result.killed(),
            score = result.mutation_score(),
            seconds = result.wall_time_seconds,
            "run finished"
        );
        Ok(result)
    }

    /// One traced pass of the whole selection, fenced by a snapshot so the
    /// modules it imported do not leak into the first mutant.
    fn trace_baseline(
        &mut self,
        targets: &[PathBuf],
        scope: &Path,
        test_ids: &[String],
    ) -> Result<Option<CoverageMap>, EngineError> {
        let snapshot = self.harness.snapshot()?;
        let request = TestRequest {
            test_ids,
            scope,
            timeout: None,
        };
        let map = coverage::collect_coverage(&mut self.harness, targets, &request);
        self.harness.evict_modules(&[], &self.options.working_dir);
        self.harness.restore(snapshot)?;
        Ok(map)
    }
}

/// Reads, scans and enriches one file. Returns its source with the points.
pub fn scan_file(
    file: &Path,
    options: &EngineOptions,
) -> Result<(String, Vec<MutationPoint>), EngineError> {
    let source = std::fs::read_to_string(file).map_err(|source| EngineError::Read {
        path: file.to_path_buf(),
        source,
    })?;
    let module_name = module_name_from_path(file, &options.search_paths, &options.working_dir);
    let points = parser::scan(&source, file, &module_name)?;
    let points = types::enrich(&source, points);
    Ok((source, points))
}

/// Working dir, `<working_dir>/src` when present, then `PYTHONPATH`.
pub fn default_search_paths(working_dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![working_dir.to_path_buf()];
    let src = working_dir.join("src");
    if src.is_dir() {
        paths.push(src);
    }
    if let Some(pythonpath) = std::env::var_os("PYTHONPATH") {
        for entry in std::env::split_paths(&pythonpath) {
            if entry.as_os_str().is_empty() {
                continue;
            }
            let entry = crate::config::absolutize(&entry, working_dir);
            if !paths.contains(&entry) {
                paths.push(entry);
            }
        }
    }
    paths
}

/// Dotted import name of `file`, relative to the most specific search path
/// containing it, else to `working_dir`. `pkg/__init__.py` names `pkg`.
pub fn module_name_from_path(file: &Path, search_paths: &[PathBuf], working_dir: &Path) -> String {
    let file = crate::config::absolutize(file, working_dir);
    let relative = search_paths
        .iter()
        .map(|base| crate::config::absolutize(base, working_dir))
        .filter(|base| file.starts_with(base) && file != *base)
        .max_by_key(|base| base.components().count())
        .and_then(|base| file.strip_prefix(&base).ok().map(Path::to_path_buf))
        .or_else(|| file.strip_prefix(working_dir).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from(file.file_name().unwrap_or_default()));

    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
    }
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "__init__") {
        parts.pop();
    }
    parts.join(".")
}
