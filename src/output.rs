use std::collections::BTreeMap;
use std::path::Path;

use console::Style;
use serde_json::json;

use crate::mutants::MutantResult;
use crate::state::RunResult;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_warning(msg: &str) {
    let style = Style::new().yellow().bold();
    eprintln!("{} {}", style.apply_to("!"), msg);
}

fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// Percentage for a per-file line; an empty file counts as fully killed.
fn pct(killed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        killed as f64 / total as f64 * 100.0
    }
}

pub fn print_run_result(result: &RunResult, root: &Path) {
    let dim = Style::new().dim();
    let ref_style = Style::new().cyan().bold();
    let op_style = Style::new().magenta();

    let n_files = result.target_files.len();
    println!(
        "{} {} {}, {} candidates, {} pruned by type analysis",
        dim.apply_to("·"),
        n_files,
        if n_files == 1 { "file" } else { "files" },
        result.total_mutants,
        result.mutants_pruned,
    );

    let mut by_file: BTreeMap<&Path, Vec<&MutantResult>> = BTreeMap::new();
    for r in &result.results {
        by_file.entry(r.mutant.point.file_path.as_path()).or_default().push(r);
    }
    let refs: BTreeMap<usize, String> = result
        .survivor_refs()
        .into_iter()
        .map(|(id, r)| (r.mutant.id, id))
        .collect();

    println!();
    for (file, file_results) in &by_file {
        let killed = file_results.iter().filter(|r| r.killed).count();
        let total = file_results.len();
        let style = if killed == total {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        println!(
            "  {:<40} {}",
            display_path(file, root),
            style.apply_to(format!("{killed}/{total} killed ({:.1}%)", pct(killed, total))),
        );
        for r in file_results.iter().filter(|r| !r.killed) {
            let m = &r.mutant;
            let id = refs.get(&m.id).map(String::as_str).unwrap_or("?");
            println!(
                "    {} line {} {} {}",
                ref_style.apply_to(format!("@{id}")),
                m.point.line,
                dim.apply_to(format!("[{}]", m.point.kind)),
                op_style.apply_to(m.describe()),
            );
        }
    }
    println!();

    if result.stopped_early {
        print_warning(&format!(
            "memory limit reached after {} mutants, the rest were not tested",
            result.mutants_tested,
        ));
    }
    let timed_out = result.timed_out();
    if timed_out > 0 {
        println!("  {} {} mutants timed out", dim.apply_to("·"), timed_out);
    }

    let survived = result.mutants_tested - result.killed();
    let summary = format!(
        "{}/{} killed ({:.1}%) in {:.1}s",
        result.killed(),
        result.mutants_tested,
        result.mutation_score(),
        result.wall_time_seconds,
    );
    if survived == 0 {
        print_success(&summary);
    } else {
        let style = Style::new().yellow().bold();
        println!("{} {}, {} survived", style.apply_to("!"), summary, survived);
        println!();
        println!("Use `leela show @m1` for details on a specific mutant.");
    }
}

pub fn print_mutant_detail(mutant_ref: &str, r: &MutantResult, source: Option<&str>, root: &Path) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();
    let point = &r.mutant.point;

    println!(
        "{} {}:{} [{}] {}",
        ref_style.apply_to(format!("@{}", mutant_ref.trim_start_matches('@'))),
        display_path(&point.file_path, root),
        point.line,
        point.kind,
        r.mutant.describe(),
    );
    if let Some(ty) = &point.inferred_type {
        println!("  {}", dim.apply_to(format!("inferred type: {ty}")));
    }
    println!(
        "  {}",
        dim.apply_to(format!("{} tests run in {:.2}s", r.tests_run, r.time_seconds))
    );
    println!();

    let lines: Vec<&str> = source.map(|s| s.lines().collect()).unwrap_or_default();
    let line_idx = point.line.saturating_sub(1);
    for line in lines.iter().take(line_idx).skip(line_idx.saturating_sub(2)) {
        println!("  {}", dim.apply_to(line));
    }

    for line in r.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }

    for line in lines.iter().skip(line_idx + 1).take(2) {
        println!("  {}", dim.apply_to(line));
    }
}

pub fn print_status(result: &RunResult, root: &Path) {
    println!(
        "Last run {}: {} mutants, {} killed, {} survived ({:.1}% score)",
        result.session_id,
        result.mutants_tested,
        result.killed(),
        result.mutants_tested - result.killed(),
        result.mutation_score(),
    );

    let survivors = result.survivor_refs();
    if !survivors.is_empty() {
        println!();
        for (id, r) in &survivors {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}:{} {}",
                ref_style.apply_to(format!("@{id}")),
                display_path(&r.mutant.point.file_path, root),
                r.mutant.point.line,
                r.mutant.describe(),
            );
        }
        println!();
        println!("Use `leela show @m1` for details on a specific mutant.");
    }
}

/// Summary document printed by `leela run --json`.
pub fn json_report(result: &RunResult) -> serde_json::Value {
    let round2 = |x: f64| (x * 100.0).round() / 100.0;
    let survived: Vec<_> = result
        .survivor_refs()
        .into_iter()
        .map(|(id, r)| {
            let m = &r.mutant;
            json!({
                "ref": id,
                "file": m.point.file_path,
                "line": m.point.line,
                "column": m.point.column,
                "kind": m.point.kind,
                "original": m.point.shape,
                "replacement": m.replacement,
                "description": m.describe(),
                "diff": r.diff,
            })
        })
        .collect();
    json!({
        "session_id": result.session_id,
        "target_files": result.target_files,
        "total_mutants": result.total_mutants,
        "mutants_tested": result.mutants_tested,
        "mutants_pruned": result.mutants_pruned,
        "killed": result.killed(),
        "survived": survived.len(),
        "timed_out": result.timed_out(),
        "stopped_early": result.stopped_early,
        "mutation_score": round2(result.mutation_score()),
        "wall_time_seconds": round2(result.wall_time_seconds),
        "survived_mutants": survived,
    })
}
