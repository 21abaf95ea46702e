use std::fs;
use std::path::{Path, PathBuf};

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "target",
    "dist",
    "build",
    ".eggs",
];

fn should_skip_dir(name: &str) -> bool {
    SKIP_NAMES.iter().any(|s| *s == name) || name.ends_with(".egg-info")
}

/// Whether `name` looks like a pytest test module or conftest.
pub fn is_test_file(name: &str) -> bool {
    name.starts_with("test_")
        || name.starts_with("tests_")
        || name.ends_with("_test.py")
        || name == "conftest.py"
        || name == "tests.py"
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".py") && !name.starts_with("__") && !is_test_file(name)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            if !should_skip_dir(&entry.file_name().to_string_lossy()) {
                walk(&path, out)?;
            }
        } else if ft.is_file() && is_candidate(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Expands one target: a `.py` file is taken as given, a directory yields
/// its non-test modules recursively. Anything else yields nothing.
pub fn find_target_files(target: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if target.is_file() {
        if target.extension().is_some_and(|ext| ext == "py") {
            files.push(target.to_path_buf());
        }
    } else if target.is_dir() {
        walk(target, &mut files)?;
    }
    files.sort();
    Ok(files)
}

/// Resolves every target under `root`, sorted and de-duplicated. With no
/// targets, the first of `target/` and `src/` that exists is used. A named
/// target that does not exist is a `NotFound` error.
pub fn discover_targets(targets: &[PathBuf], root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if targets.is_empty() {
        for candidate in ["target", "src"] {
            let dir = root.join(candidate);
            if dir.is_dir() {
                files = find_target_files(&dir)?;
                break;
            }
        }
    } else {
        for target in targets {
            let target = crate::config::absolutize(target, root);
            if !target.exists() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("target not found: {}", target.display()),
                ));
            }
            files.extend(find_target_files(&target)?);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
