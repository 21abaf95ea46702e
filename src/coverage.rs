use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::harness::{Harness, TestRequest};

/// (file, line) → ids of the tests that executed that line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageMap {
    files: BTreeMap<PathBuf, BTreeMap<usize, BTreeSet<String>>>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: &Path, line: usize, test_id: &str) {
        self.files
            .entry(file.to_path_buf())
            .or_default()
            .entry(line)
            .or_default()
            .insert(test_id.to_string());
    }

    pub fn record_lines(&mut self, file: &Path, lines: impl IntoIterator<Item = usize>, test_id: &str) {
        for line in lines {
            self.add(file, line, test_id);
        }
    }

    /// Sorted ids of tests covering `line`, empty when nothing did.
    pub fn tests_for(&self, file: &Path, line: usize) -> Vec<String> {
        self.files
            .get(file)
            .and_then(|lines| lines.get(&line))
            .map(|tests| tests.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn covered_lines(&self, file: &Path) -> BTreeSet<usize> {
        self.files
            .get(file)
            .map(|lines| lines.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of distinct covered (file, line) pairs.
    pub fn len(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }
}

/// Baseline traced run. A failure degrades to "no coverage" so every mutant
/// runs its full scope.
pub fn collect_coverage<H: Harness + ?Sized>(
    harness: &mut H,
    targets: &[PathBuf],
    request: &TestRequest<'_>,
) -> Option<CoverageMap> {
    match harness.collect_coverage(targets, request) {
        Ok(map) => {
            tracing::info!(lines = map.len(), "coverage collected");
            Some(map)
        }
        Err(e) => {
            tracing::warn!(error = %e, "coverage collection failed, running full scope per mutant");
            None
        }
    }
}
