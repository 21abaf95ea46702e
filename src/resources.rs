use std::path::{Path, PathBuf};

use crate::error::HarnessError;
use crate::harness::Harness;

/// CPU and memory caps for one run. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceLimits {
    pub max_cores: Option<usize>,
    pub max_memory_percent: Option<f64>,
}

impl ResourceLimits {
    pub fn new(max_cores: Option<usize>, max_memory_percent: Option<f64>) -> Self {
        ResourceLimits {
            max_cores,
            max_memory_percent,
        }
    }

    /// Cores to pin the worker to, given `available` cores on the machine.
    pub fn effective_cores_of(&self, available: usize) -> usize {
        let available = available.max(1);
        match self.max_cores {
            Some(max) => max.clamp(1, available),
            None => (available / 2).max(1),
        }
    }

    pub fn effective_cores(&self) -> usize {
        self.effective_cores_of(available_cores())
    }

    pub fn is_memory_ok(&self, monitor: &dyn MemoryMonitor) -> bool {
        match self.max_memory_percent {
            None => true,
            Some(limit) => monitor.memory_percent() < limit,
        }
    }
}

pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Reports system-wide memory utilisation as a percentage.
pub trait MemoryMonitor {
    fn memory_percent(&self) -> f64;
}

/// Reads `/proc/meminfo`. Reports 0.0 where the file is unavailable.
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::at("/proc/meminfo")
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        ProcMeminfo {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for ProcMeminfo {
    fn memory_percent(&self) -> f64 {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| parse_meminfo(&text))
            .unwrap_or(0.0)
    }
}

/// `(1 - MemAvailable / MemTotal) * 100`, or `None` if either field is
/// missing or the total is zero.
pub fn parse_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse::<f64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - available / total) * 100.0)
}

/// Pins the harness to the effective core count when a core cap is set.
/// Returns the number of cores pinned.
pub fn apply_limits<H: Harness + ?Sized>(
    harness: &mut H,
    limits: &ResourceLimits,
) -> Result<Option<usize>, HarnessError> {
    if limits.max_cores.is_none() {
        return Ok(None);
    }
    let cores = limits.effective_cores();
    harness.limit_cpu(cores)?;
    tracing::info!(cores, max_memory_percent = ?limits.max_memory_percent, "resource limits applied");
    Ok(Some(cores))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl MemoryMonitor for Fixed {
        fn memory_percent(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn unset_cores_take_half() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.effective_cores_of(8), 4);
        assert_eq!(limits.effective_cores_of(1), 1);
    }

    #[test]
    fn max_cores_capped_by_available() {
        let limits = ResourceLimits::new(Some(16), None);
        assert_eq!(limits.effective_cores_of(4), 4);
        let limits = ResourceLimits::new(Some(2), None);
        assert_eq!(limits.effective_cores_of(4), 2);
    }

    #[test]
    fn memory_limit_is_strict() {
        let limits = ResourceLimits::new(None, Some(50.0));
        assert!(limits.is_memory_ok(&Fixed(49.9)));
        assert!(!limits.is_memory_ok(&Fixed(50.0)));
        assert!(ResourceLimits::default().is_memory_ok(&Fixed(99.0)));
    }

    #[test]
    fn meminfo_percent() {
        let text = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n";
        let percent = parse_meminfo(text).unwrap();
        assert!((percent - 75.0).abs() < 1e-9);
        assert_eq!(parse_meminfo("MemTotal: 0 kB\nMemAvailable: 0 kB\n"), None);
    }

    #[test]
    fn unreadable_meminfo_reports_zero() {
        let monitor = ProcMeminfo::at("/nonexistent/meminfo");
        assert_eq!(monitor.memory_percent(), 0.0);
    }
}
