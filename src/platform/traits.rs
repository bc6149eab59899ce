//! Host Capability Traits
//!
//! The controller never touches views, windows or bitmaps itself. Everything
//! it needs from the embedding host goes through the traits in this module:
//!
//! ```text
//! +----------------------+        +-------------------------+
//! |  MemoryStatsSource   |  <---  | /proc/meminfo, sysinfo, |
//! |  (any thread)        |        | host ActivityManager    |
//! +----------------------+        +-------------------------+
//!
//! +----------------------+        +-------------------------+
//! |  HostSurface         |  <---  | screens, scroll views,  |
//! |  (UI thread only)    |        | window flags, GC hooks  |
//! +----------------------+        +-------------------------+
//!
//! +----------------------+        +-------------------------+
//! |  UiDispatcher        |  --->  | post a pump() onto the  |
//! |  (any thread)        |        | UI looper               |
//! +----------------------+        +-------------------------+
//! ```
//!
//! `MemoryStatsSource` is `Send + Sync` because the memory worker and the
//! UI thread both read from it. `HostSurface` is deliberately not required
//! to be `Send`: it is owned by the UI-thread `PerformanceManager`.

use std::fmt;

use crate::monitor::memory::PressureLevel;

// ============================================================================
// Error Types
// ============================================================================

/// Error type for all host/platform operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Operation not supported by this host
    NotSupported(String),
    /// I/O error occurred
    IoError(String),
    /// Host data could not be parsed
    ParseError(String),
    /// Permission denied by the OS
    PermissionDenied(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            PlatformError::IoError(msg) => write!(f, "I/O error: {}", msg),
            PlatformError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            PlatformError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                PlatformError::PermissionDenied(err.to_string())
            }
            _ => PlatformError::IoError(err.to_string()),
        }
    }
}

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

// ============================================================================
// Memory Types
// ============================================================================

/// Raw memory statistics reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Total memory in bytes
    pub total_bytes: u64,
    /// Memory available to the process without swapping, in bytes
    pub available_bytes: u64,
    /// Completely unused memory (excludes reclaimable caches), in bytes
    pub free_bytes: u64,
}

impl MemoryStats {
    /// Fraction of total memory still available (0.0 - 1.0).
    ///
    /// Returns `None` when the host reports a zero total.
    pub fn available_fraction(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.available_bytes.min(self.total_bytes) as f64 / self.total_bytes as f64)
    }

    /// Used memory in bytes.
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Total memory in megabytes.
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Available memory in megabytes.
    pub fn available_mb(&self) -> f64 {
        self.available_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// A source of memory statistics.
///
/// Implementations must be cheap enough to call once per poll interval and
/// must never block on anything slower than a procfs read.
pub trait MemoryStatsSource: Send + Sync {
    /// Read the current memory statistics.
    fn read_stats(&self) -> PlatformResult<MemoryStats>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Scroll View Types
// ============================================================================

/// Recycling/animation settings applied to a scrollable view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollTuning {
    /// Off-screen items kept bound and ready for reuse
    pub item_view_cache_size: u32,
    /// Maximum recycled views retained per view type
    pub max_recycled_views: u32,
    /// Item add/remove/move animations
    pub item_animations: bool,
    /// All items share a fixed extent, so the list skips re-measuring
    pub fixed_item_extent: bool,
    /// List-style views: keep a drawing cache while scrolling
    pub scrolling_cache: bool,
    /// List-style views: proportional smooth scrollbar
    pub smooth_scrollbar: bool,
}

/// A host-owned scrollable view (recycler or list style).
pub trait ScrollableView {
    /// Tuning currently applied to the view, if the host knows it.
    fn tuning(&self) -> Option<ScrollTuning>;

    /// Apply the given tuning to the view.
    fn apply_tuning(&mut self, tuning: &ScrollTuning);
}

// ============================================================================
// UI Thread Dispatch
// ============================================================================

/// Wakes the UI thread when background work is waiting.
///
/// Called from the memory worker after it posts work. Implementations
/// should schedule `PerformanceManager::pump` on the UI thread and return
/// without blocking.
pub trait UiDispatcher: Send + Sync {
    fn request_pump(&self);
}

/// Dispatcher for callers that pump on their own schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl UiDispatcher for NoopDispatcher {
    fn request_pump(&self) {}
}

/// Wakes a task awaiting `notified()`, e.g. an async UI loop.
impl UiDispatcher for tokio::sync::Notify {
    fn request_pump(&self) {
        self.notify_one();
    }
}

// ============================================================================
// Host Surface
// ============================================================================

/// Capability flags supplied by the host instead of OS-version checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Host can toggle hardware-backed layers per screen
    pub hardware_layers: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self { hardware_layers: true }
    }
}

/// UI-thread side of the host.
pub trait HostSurface {
    /// Capabilities of this host.
    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities::default()
    }

    /// Scrollable views of a screen, or `None` if the host has no such screen.
    fn scroll_views(&mut self, screen: &str) -> Option<Vec<&mut dyn ScrollableView>>;

    /// Enable or disable the decoded-image cache for a screen.
    fn set_image_cache_enabled(&mut self, screen: &str, enabled: bool);

    /// Hint whether a screen should render through hardware layers.
    fn set_hardware_layers(&mut self, screen: &str, enabled: bool);

    /// Host-side cleanup (GC hints, releasing scratch buffers) for `Low`
    /// and `Critical` pressure.
    fn request_memory_cleanup(&mut self, level: PressureLevel);

    /// Release host resources acquired for the controller. Called exactly
    /// once during shutdown.
    fn release_resources(&mut self) {}
}
