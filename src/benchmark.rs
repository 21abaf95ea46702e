use std::fmt::Write as _;

use serde::Serialize;

use crate::engine::{Engine, RunRequest};
use crate::error::EngineError;
use crate::harness::Harness;

/// (label, use_types, use_coverage), baseline first.
pub const CONFIGURATIONS: [(&str, bool, bool); 4] = [
    ("No optimizations", false, false),
    ("+ per-test coverage", false, true),
    ("+ type-aware pruning", true, false),
    ("All optimizations", true, true),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRow {
    pub label: String,
    pub wall_time_seconds: f64,
    pub mutants_tested: usize,
    pub mutants_pruned: i64,
    pub killed: usize,
}

/// Runs `request` once per configuration. The engine's own options are put
/// back afterwards.
pub fn run_benchmark<H: Harness>(
    engine: &mut Engine<H>,
    request: &RunRequest,
) -> Result<Vec<BenchmarkRow>, EngineError> {
    let saved = (engine.options().use_types, engine.options().use_coverage);
    let mut rows = Vec::with_capacity(CONFIGURATIONS.len());
    let mut outcome = Ok(());
    for (label, use_types, use_coverage) in CONFIGURATIONS {
        engine.options_mut().use_types = use_types;
        engine.options_mut().use_coverage = use_coverage;
        tracing::info!(label, "benchmark configuration");
        match engine.run(request) {
            Ok(result) => rows.push(BenchmarkRow {
                label: label.to_string(),
                wall_time_seconds: result.wall_time_seconds,
                mutants_tested: result.mutants_tested,
                mutants_pruned: result.mutants_pruned,
                killed: result.killed(),
            }),
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    engine.options_mut().use_types = saved.0;
    engine.options_mut().use_coverage = saved.1;
    outcome.map(|()| rows)
}

fn speedup(baseline: f64, time: f64) -> f64 {
    if time > 0.0 { baseline / time } else { 0.0 }
}

pub fn format_report(rows: &[BenchmarkRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<30} {:>8} {:>8} {:>8}",
        "Configuration", "Time", "Tested", "Pruned"
    );
    let _ = writeln!(out, "  {}", "-".repeat(56));

    let baseline = rows.first().map(|r| r.wall_time_seconds).unwrap_or(1.0);
    for (i, row) in rows.iter().enumerate() {
        let suffix = if i == 0 {
            String::new()
        } else {
            format!("  ({:.1}x)", speedup(baseline, row.wall_time_seconds))
        };
        let _ = writeln!(
            out,
            "  {:<30} {:>7.1}s {:>8} {:>8}{}",
            row.label, row.wall_time_seconds, row.mutants_tested, row.mutants_pruned, suffix
        );
    }
    if rows.len() >= 2 {
        if let Some(last) = rows.last() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "  Total speedup: {:.1}x",
                speedup(baseline, last.wall_time_seconds)
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str, secs: f64) -> BenchmarkRow {
        BenchmarkRow {
            label: label.into(),
            wall_time_seconds: secs,
            mutants_tested: 10,
            mutants_pruned: -2,
            killed: 8,
        }
    }

    #[test]
    fn report_shows_speedups_against_first_row() {
        let report = format_report(&[row("No optimizations", 4.0), row("All optimizations", 1.0)]);
        assert!(report.contains("Configuration"));
        assert!(report.contains("(4.0x)"));
        assert!(report.contains("Total speedup: 4.0x"));
        assert!(report.contains("-2"));
    }

    #[test]
    fn zero_time_does_not_divide() {
        let report = format_report(&[row("a", 1.0), row("b", 0.0)]);
        assert!(report.contains("(0.0x)"));
    }
}
