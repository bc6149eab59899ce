//! Memory statistics via `sysinfo`
//!
//! Portable fallback for hosts without a readable `/proc/meminfo`
//! (macOS simulators, Windows desktop builds of the reader).

use std::sync::{Mutex, PoisonError};

use sysinfo::System;

use super::traits::{MemoryStats, MemoryStatsSource, PlatformError, PlatformResult};

/// Memory source backed by `sysinfo::System`.
pub struct SysinfoMemorySource {
    sys: Mutex<System>,
}

impl SysinfoMemorySource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self { sys: Mutex::new(sys) }
    }
}

impl Default for SysinfoMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatsSource for SysinfoMemorySource {
    fn read_stats(&self) -> PlatformResult<MemoryStats> {
        let mut sys = self.sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(PlatformError::NotSupported(
                "sysinfo reported zero total memory".to_string(),
            ));
        }

        Ok(MemoryStats {
            total_bytes: total,
            available_bytes: sys.available_memory().min(total),
            free_bytes: sys.free_memory(),
        })
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_source() {
        let source = SysinfoMemorySource::new();
        assert_eq!(source.name(), "sysinfo");
        // Sandboxed CI may not expose memory stats, that's OK
        if let Ok(stats) = source.read_stats() {
            assert!(stats.total_bytes > 0);
            assert!(stats.available_bytes <= stats.total_bytes);
        }
    }
}
