//! Memory statistics via /proc/meminfo
//!
//! Used on Linux and Android, where `/proc/meminfo` is readable by
//! unprivileged apps and reports `MemAvailable` directly.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use super::traits::{MemoryStats, MemoryStatsSource, PlatformError, PlatformResult};

/// Default location of the meminfo file.
pub const PROC_MEMINFO: &str = "/proc/meminfo";

/// Reads memory statistics from a meminfo-formatted file.
#[derive(Debug, Clone)]
pub struct ProcMeminfoSource {
    path: PathBuf,
}

impl ProcMeminfoSource {
    /// Source reading the system `/proc/meminfo`.
    pub fn new() -> Self {
        Self::with_path(PROC_MEMINFO)
    }

    /// Source reading an arbitrary meminfo-formatted file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether the backing file can currently be read.
    pub fn is_available(&self) -> bool {
        fs::metadata(&self.path).is_ok()
    }
}

impl Default for ProcMeminfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatsSource for ProcMeminfoSource {
    fn read_stats(&self) -> PlatformResult<MemoryStats> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            PlatformError::IoError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        parse_meminfo(&content)
    }

    fn name(&self) -> &'static str {
        "proc-meminfo"
    }
}

/// Parse meminfo content (all values in kB) into byte counts.
pub fn parse_meminfo(content: &str) -> PlatformResult<MemoryStats> {
    let mut values: HashMap<&str, u64> = HashMap::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if let Ok(value) = value.parse::<u64>() {
                values.insert(key.trim_end_matches(':'), value);
            }
        }
    }

    let mem_total = *values
        .get("MemTotal")
        .ok_or_else(|| PlatformError::ParseError("MemTotal not found in meminfo".to_string()))?;

    let mem_free = values.get("MemFree").copied().unwrap_or(0);
    // Kernels before 3.14 have no MemAvailable; approximate it
    let mem_available = values.get("MemAvailable").copied().unwrap_or_else(|| {
        let buffers = values.get("Buffers").copied().unwrap_or(0);
        let cached = values.get("Cached").copied().unwrap_or(0);
        mem_free + buffers + cached
    });

    Ok(MemoryStats {
        total_bytes: mem_total * 1024,
        available_bytes: mem_available.min(mem_total) * 1024,
        free_bytes: mem_free * 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
MemTotal:        3809036 kB
MemFree:          282012 kB
MemAvailable:    1560780 kB
Buffers:           81232 kB
Cached:          1310948 kB
SwapCached:         1176 kB
";

    #[test]
    fn test_parse_meminfo() {
        let stats = parse_meminfo(SAMPLE).unwrap();
        assert_eq!(stats.total_bytes, 3809036 * 1024);
        assert_eq!(stats.available_bytes, 1560780 * 1024);
        assert_eq!(stats.free_bytes, 282012 * 1024);
    }

    #[test]
    fn test_parse_meminfo_without_mem_available() {
        let content = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 250 kB\n";
        let stats = parse_meminfo(content).unwrap();
        assert_eq!(stats.available_bytes, 400 * 1024);
    }

    #[test]
    fn test_parse_meminfo_missing_total() {
        let result = parse_meminfo("MemFree: 100 kB\n");
        assert!(matches!(result, Err(PlatformError::ParseError(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = ProcMeminfoSource::with_path("/definitely/not/here/meminfo");
        assert!(!source.is_available());
        assert!(matches!(source.read_stats(), Err(PlatformError::IoError(_))));
    }

    #[test]
    fn test_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, SAMPLE).unwrap();

        let source = ProcMeminfoSource::with_path(&path);
        assert!(source.is_available());
        let stats = source.read_stats().unwrap();
        assert_eq!(stats.total_bytes, 3809036 * 1024);
    }
}
