//! Platform Abstraction Layer
//!
//! Everything the controller needs from the embedding host.
//!
//! ```text
//! src/platform/
//! +-- mod.rs           <- This file (module definitions, source selection)
//! +-- traits.rs        <- Host capability traits and error types
//! +-- meminfo.rs       <- /proc/meminfo memory source (Linux, Android)
//! +-- system.rs        <- sysinfo memory source (everything else)
//! +-- headless.rs      <- In-memory host used by the CLI and tests
//! ```

pub mod headless;
pub mod meminfo;
pub mod system;
pub mod traits;

use std::sync::Arc;

use tracing::debug;

pub use headless::{
    CountingDispatcher, HeadlessHost, RecordedScreen, RecordedView, StaticMemorySource,
    DEFAULT_SCREENS,
};
pub use meminfo::ProcMeminfoSource;
pub use system::SysinfoMemorySource;
pub use traits::{
    HostCapabilities, HostSurface, MemoryStats, MemoryStatsSource, NoopDispatcher,
    PlatformError, PlatformResult, ScrollTuning, ScrollableView, UiDispatcher,
};

/// Pick the best memory source for the current platform.
///
/// Prefers `/proc/meminfo` where it is readable, falling back to `sysinfo`.
pub fn default_memory_source() -> Arc<dyn MemoryStatsSource> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let proc_source = ProcMeminfoSource::new();
        if proc_source.is_available() {
            debug!("Using /proc/meminfo memory source");
            return Arc::new(proc_source);
        }
    }

    debug!("Using sysinfo memory source");
    Arc::new(SysinfoMemorySource::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_memory_source() {
        let source = default_memory_source();
        #[cfg(target_os = "linux")]
        {
            if ProcMeminfoSource::new().is_available() {
                assert_eq!(source.name(), "proc-meminfo");
            }
        }
        let _ = source.read_stats();
    }
}
