use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use leela::git_diff::{DiffProvider, GitDiff, parse_diff};
use tempfile::TempDir;

const DIFF: &str = "\
diff --git a/app.py b/app.py
index 1111111..2222222 100644
--- a/app.py
+++ b/app.py
@@ -2 +2 @@ def add(a, b):
-    return a - b
+    return a + b
@@ -10,0 +11,3 @@ def sub(a, b):
+def mul(a, b):
+    return a * b
+
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1,2 @@
+more docs
diff --git a/pkg/gone.py b/pkg/gone.py
--- a/pkg/gone.py
+++ /dev/null
@@ -1,4 +0,0 @@
diff --git a/pkg/only_removed.py b/pkg/only_removed.py
--- a/pkg/only_removed.py
+++ b/pkg/only_removed.py
@@ -5,2 +4,0 @@
";

#[test]
fn added_lines_are_collected_per_python_file() {
    let changed = parse_diff(DIFF, Path::new("/repo"));

    assert_eq!(
        changed.get(Path::new("/repo/app.py")),
        Some(&BTreeSet::from([2, 11, 12, 13]))
    );
    assert!(!changed.contains_key(Path::new("/repo/README.md")));
    assert!(!changed.contains_key(Path::new("/repo/pkg/gone.py")));
}

#[test]
fn pure_deletion_keeps_an_empty_entry() {
    let changed = parse_diff(DIFF, Path::new("/repo"));
    assert_eq!(
        changed.get(Path::new("/repo/pkg/only_removed.py")),
        Some(&BTreeSet::new())
    );
}

#[test]
fn empty_diff_changes_nothing() {
    assert!(parse_diff("", Path::new("/repo")).is_empty());
}

fn git(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn reads_changes_from_a_real_repository() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    if !git(root, &["init", "-q"]) {
        eprintln!("git not available, skipping");
        return;
    }
    git(root, &["config", "user.email", "dev@example.com"]);
    git(root, &["config", "user.name", "dev"]);
    std::fs::write(root.join("app.py"), "def add(a, b):\n    return a - b\n").unwrap();
    std::fs::write(root.join("notes.txt"), "v1\n").unwrap();
    assert!(git(root, &["add", "."]));
    assert!(git(root, &["commit", "-q", "-m", "init"]));
    assert!(git(root, &["tag", "base"]));

    std::fs::write(root.join("app.py"), "def add(a, b):\n    return a + b\n\n\ndef neg(x):\n    return -x\n").unwrap();
    std::fs::write(root.join("notes.txt"), "v2\n").unwrap();
    assert!(git(root, &["commit", "-q", "-am", "change"]));

    let provider = GitDiff::new(root);
    let changed = provider.changed_lines("base");
    let app = changed
        .iter()
        .find(|(path, _)| path.ends_with("app.py"))
        .map(|(_, lines)| lines.clone())
        .expect("app.py should be reported");
    assert_eq!(app, BTreeSet::from([2, 3, 4, 5, 6]));
    assert_eq!(changed.len(), 1);

    let files = provider.changed_files("base");
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("app.py"));
}

#[cfg(unix)]
#[test]
fn symlinked_checkout_reports_paths_under_the_link() {
    let dir = TempDir::new().unwrap();
    let real = dir.path().join("real");
    std::fs::create_dir(&real).unwrap();
    if !git(&real, &["init", "-q"]) {
        return;
    }
    git(&real, &["config", "user.email", "dev@example.com"]);
    git(&real, &["config", "user.name", "dev"]);
    std::fs::write(real.join("app.py"), "def add(a, b):\n    return a - b\n").unwrap();
    assert!(git(&real, &["add", "."]));
    assert!(git(&real, &["commit", "-q", "-m", "init"]));
    assert!(git(&real, &["tag", "base"]));
    std::fs::write(real.join("app.py"), "def add(a, b):\n    return a + b\n").unwrap();
    assert!(git(&real, &["commit", "-q", "-am", "change"]));

    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&real, &link).unwrap();
    let provider = GitDiff::new(&link);

    let changed = provider.changed_lines("base");
    assert_eq!(changed.get(&link.join("app.py")), Some(&BTreeSet::from([2])));
    assert_eq!(provider.changed_files("base"), vec![link.join("app.py")]);
}

#[test]
fn unknown_ref_yields_no_changes() {
    let dir = TempDir::new().unwrap();
    if !git(dir.path(), &["init", "-q"]) {
        return;
    }
    let provider = GitDiff::new(dir.path());
    assert!(provider.changed_lines("does-not-exist").is_empty());
    assert!(provider.changed_files("does-not-exist").is_empty());
}
