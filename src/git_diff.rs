use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Absolute file path → changed (new-side) line numbers.
pub type ChangedLines = HashMap<PathBuf, BTreeSet<usize>>;

pub trait DiffProvider {
    fn changed_lines(&self, base: &str) -> ChangedLines;
}

/// Shells out to `git` inside `repo_dir`.
#[derive(Debug, Clone)]
pub struct GitDiff {
    repo_dir: PathBuf,
}

impl GitDiff {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        GitDiff {
            repo_dir: repo_dir.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .ok()?;
        if !output.status.success() {
            tracing::debug!(
                ?args,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git command failed"
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Diff of `base...HEAD`, else of `base` against the working tree.
    fn diff_output(&self, extra: &[&str], base: &str) -> Option<String> {
        let range = format!("{base}...HEAD");
        let mut args = vec!["diff"];
        args.extend_from_slice(extra);
        args.push(&range);
        if let Some(out) = self.git(&args) {
            return Some(out);
        }
        args.pop();
        args.push(base);
        self.git(&args)
    }

    fn toplevel(&self) -> PathBuf {
        self.git(&["rev-parse", "--show-toplevel"])
            .map(|out| PathBuf::from(out.trim()))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| self.repo_dir.clone())
    }

    /// The top level spelled through `repo_dir`, so a checkout reached via a
    /// symlink yields paths under the symlink.
    fn root(&self) -> PathBuf {
        let top = self.toplevel();
        let lexical = self
            .repo_dir
            .components()
            .all(|c| matches!(c, Component::Prefix(_) | Component::RootDir | Component::Normal(_)));
        if !self.repo_dir.is_absolute() || !lexical {
            return top;
        }
        let (Ok(real_top), Ok(real_dir)) = (std::fs::canonicalize(&top), std::fs::canonicalize(&self.repo_dir)) else {
            return top;
        };
        match real_dir.strip_prefix(&real_top) {
            Ok(rel) => self
                .repo_dir
                .ancestors()
                .nth(rel.components().count())
                .map(Path::to_path_buf)
                .unwrap_or(top),
            Err(_) => top,
        }
    }

    /// Changed `.py` files that still exist, sorted.
    pub fn changed_files(&self, base: &str) -> Vec<PathBuf> {
        let Some(out) = self.diff_output(&["--name-only", "--diff-filter=ACMR"], base) else {
            return Vec::new();
        };
        let root = self.root();
        let mut files: Vec<PathBuf> = out
            .lines()
            .map(str::trim)
            .filter(|line| line.ends_with(".py"))
            .map(|line| root.join(line))
            .filter(|path| path.exists())
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

impl DiffProvider for GitDiff {
    fn changed_lines(&self, base: &str) -> ChangedLines {
        match self.diff_output(&["-U0"], base) {
            Some(out) => parse_diff(&out, &self.root()),
            None => {
                tracing::warn!(base, "git diff failed, no lines considered changed");
                ChangedLines::new()
            }
        }
    }
}

/// Parses zero-context unified diff output. Only `.py` files are kept;
/// paths are joined onto `root`.
pub fn parse_diff(text: &str, root: &Path) -> ChangedLines {
    let mut changed = ChangedLines::new();
    let mut current: Option<PathBuf> = None;

    for line in text.lines() {
        if let Some(path) = line.strip_prefix("+++ ") {
            current = path
                .strip_prefix("b/")
                .filter(|p| p.ends_with(".py"))
                .map(|p| root.join(p));
            if let Some(file) = &current {
                changed.entry(file.clone()).or_default();
            }
        } else if line.starts_with("@@") {
            let (Some(file), Some((start, count))) = (&current, parse_hunk_header(line)) else {
                continue;
            };
            changed
                .entry(file.clone())
                .or_default()
                .extend(start..start + count);
        }
    }
    changed
}

/// `@@ -a[,b] +c[,d] @@` → `(c, d)`, with `d` defaulting to 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (_, rest) = rest.split_once(" +")?;
    let (range, _) = rest.split_once(" @@")?;
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}
