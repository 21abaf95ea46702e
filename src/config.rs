use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resources::ResourceLimits;

pub const CONFIG_FILE: &str = "leela.toml";

const ROOT_MARKERS: &[&str] = &[
    CONFIG_FILE,
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "tox.ini",
    ".git",
];

/// Project configuration, read from `leela.toml` or `[tool.leela]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter that hosts the test worker.
    pub python: String,

    /// Files or directories to mutate.
    pub targets: Vec<PathBuf>,

    /// Test scope handed to pytest when no narrower selection applies.
    pub tests: Option<PathBuf>,

    pub use_types: bool,
    pub use_coverage: bool,

    pub max_cores: Option<usize>,
    pub max_memory_percent: Option<f64>,

    /// Per-mutant wall clock limit.
    pub timeout_seconds: Option<f64>,

    /// Extra import roots, ahead of the defaults.
    pub search_paths: Vec<PathBuf>,

    pub pytest_args: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            python: default_python(),
            targets: Vec::new(),
            tests: None,
            use_types: true,
            use_coverage: true,
            max_cores: None,
            max_memory_percent: None,
            timeout_seconds: None,
            search_paths: Vec::new(),
            pytest_args: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads `path` if given, else `leela.toml` under `project_root`, else
    /// `[tool.leela]` from `pyproject.toml`, else defaults.
    pub fn load(path: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let own = project_root.join(CONFIG_FILE);
        if own.is_file() {
            return Self::from_file(&own);
        }
        let pyproject = project_root.join("pyproject.toml");
        if pyproject.is_file() {
            let contents = read(&pyproject)?;
            return Self::from_pyproject(&contents, &pyproject);
        }
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = read(path)?;
        Self::from_toml(&contents, path)
    }

    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the `[tool.leela]` table; a pyproject without one yields defaults.
    pub fn from_pyproject(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let document: toml::Table = toml::from_str(contents).map_err(parse_err)?;
        match document.get("tool").and_then(|tool| tool.get("leela")) {
            Some(table) => table.clone().try_into().map_err(parse_err),
            None => Ok(Config::default()),
        }
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits::new(self.max_cores, self.max_memory_percent)
    }

    /// `None` for an unset or non-positive value. A value no `Duration` can
    /// hold is an error.
    pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match self.timeout_seconds {
            Some(secs) if secs.is_nan() || secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key: "timeout_seconds",
                    message: format!("{secs}: {e}"),
                }),
            _ => Ok(None),
        }
    }

    /// Configured test scope, else `tests/` when present, else the root.
    pub fn test_scope(&self, project_root: &Path) -> PathBuf {
        if let Some(tests) = &self.tests {
            return absolutize(tests, project_root);
        }
        let tests = project_root.join("tests");
        if tests.is_dir() {
            tests
        } else {
            project_root.to_path_buf()
        }
    }

    /// Interpreter command, with relative paths such as `.venv/bin/python`
    /// resolved against `cwd` first, then `project_root`. Bare names are left
    /// for `PATH`.
    pub fn resolve_python(&self, project_root: &Path, cwd: &Path) -> String {
        let cmd = self.python.as_str();
        let p = Path::new(cmd);
        if p.is_absolute() || !cmd.contains('/') {
            return cmd.to_string();
        }
        let from_cwd = cwd.join(p);
        if from_cwd.exists() {
            return from_cwd.to_string_lossy().to_string();
        }
        let from_root = project_root.join(p);
        if from_root.exists() {
            return from_root.to_string_lossy().to_string();
        }
        cmd.to_string()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `path` with symlinks resolved, or `path` itself when it cannot be.
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Walks up from `start` looking for a project marker. Falls back to `start`
/// (or its parent when `start` is a file).
pub fn find_project_root(start: &Path) -> PathBuf {
    let origin = if start.is_file() {
        start.parent().unwrap_or(start)
    } else {
        start
    };
    let mut dir = origin;
    loop {
        if ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()) {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }
    origin.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_nothing_configured() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.use_types && config.use_coverage);
        assert_eq!(config.python, "python3");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn leela_toml_wins_over_pyproject() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("leela.toml"), "use_types = false\n").unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.leela]\nuse_coverage = false\n",
        )
        .unwrap();
        let config = Config::load(None, dir.path()).unwrap();
        assert!(!config.use_types);
        assert!(config.use_coverage);
    }

    #[test]
    fn reads_tool_table_from_pyproject() {
        let text = "[project]\nname = \"x\"\n\n[tool.leela]\nmax_cores = 2\ntimeout_seconds = 1.5\npytest_args = [\"-p\", \"no:randomly\"]\n";
        let config = Config::from_pyproject(text, Path::new("pyproject.toml")).unwrap();
        assert_eq!(config.max_cores, Some(2));
        assert_eq!(config.timeout().unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(config.pytest_args, vec!["-p", "no:randomly"]);
    }

    #[test]
    fn pyproject_without_tool_table_is_default() {
        let config = Config::from_pyproject("[project]\nname = \"x\"\n", Path::new("p")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = Config::from_toml("use_types = \"yes\"", Path::new("leela.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn non_positive_timeout_is_off() {
        let config = Config {
            timeout_seconds: Some(0.0),
            ..Config::default()
        };
        assert_eq!(config.timeout().unwrap(), None);
    }

    #[test]
    fn unrepresentable_timeout_is_invalid() {
        for secs in [1e20, f64::INFINITY, f64::NAN] {
            let config = Config {
                timeout_seconds: Some(secs),
                ..Config::default()
            };
            let err = config.timeout().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "timeout_seconds", .. }), "{secs}");
        }
    }

    #[test]
    fn test_scope_prefers_tests_dir() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        assert_eq!(config.test_scope(dir.path()), dir.path());
        fs::create_dir(dir.path().join("tests")).unwrap();
        assert_eq!(config.test_scope(dir.path()), dir.path().join("tests"));
    }

    #[test]
    fn resolve_python_relative_to_cwd_then_root() {
        let cwd = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(".venv/bin")).unwrap();
        fs::write(root.path().join(".venv/bin/python"), "").unwrap();
        let config = Config {
            python: ".venv/bin/python".into(),
            ..Config::default()
        };
        let resolved = config.resolve_python(root.path(), cwd.path());
        assert_eq!(Path::new(&resolved), root.path().join(".venv/bin/python"));

        let bare = Config::default();
        assert_eq!(bare.resolve_python(root.path(), cwd.path()), "python3");
    }

    #[test]
    fn find_project_root_finds_pyproject() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("pyproject.toml"), "").unwrap();
        fs::write(root.join("src").join("app.py"), "").unwrap();

        assert_eq!(find_project_root(&root.join("src").join("app.py")), root);
        assert_eq!(find_project_root(&root.join("src")), root);
    }

    #[test]
    fn find_project_root_finds_git_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::create_dir(root.join(".git")).unwrap();

        assert_eq!(find_project_root(&root.join("pkg")), root);
    }
}
