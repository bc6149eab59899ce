//! renderpace
//!
//! An in-process adaptive performance controller for image-heavy reading
//! apps. It watches frame cadence and memory pressure, keeps the decoded
//! image cache within what memory allows, and steps rendering quality down
//! and back up to hold the target frame rate.
//!
//! ## Components
//!
//! - **Frame Cadence Monitor**: FPS estimate from host vsync timestamps
//! - **Memory Pressure Monitor**: background polling plus host-pushed signals
//! - **Bounded Image Cache**: byte-capacity LRU for decoded images
//! - **Quality Controller**: hysteretic `Low`/`Medium`/`High` state machine
//! - **Screen Profiles**: per-screen optimization settings
//! - **Host Bridge**: JSON method channel and host events
//!
//! ## Threading
//!
//! [`PerfContext`] is shared across threads. [`PerformanceManager`] lives on
//! the UI thread and is the only place quality decisions are applied. The
//! memory worker wakes it through a [`UiDispatcher`], which should arrange a
//! call to [`PerformanceManager::pump`] on the UI thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderpace::{HeadlessHost, NoopDispatcher, PerfConfig, PerformanceManager};
//! use renderpace::platform::{default_memory_source, DEFAULT_SCREENS};
//!
//! let mut manager = PerformanceManager::start(
//!     PerfConfig::default(),
//!     default_memory_source(),
//!     HeadlessHost::with_screens(DEFAULT_SCREENS, 2),
//!     Arc::new(NoopDispatcher),
//! );
//! manager.optimize_screen("ReaderScreen");
//! manager.on_frame(0);
//! manager.shutdown();
//! ```

pub mod bridge;
pub mod cache;
pub mod core;
pub mod monitor;
pub mod platform;
pub mod quality;

// Re-exports
pub use bridge::{handle_method, HostEvent};
pub use cache::{BoundedImageCache, CacheError, CacheStats};
pub use core::config::{ConfigError, PerfConfig};
pub use core::context::{PerfContext, PerformanceManager};
pub use monitor::{FrameControl, HostMemorySignal, PressureLevel};
pub use platform::{
    HeadlessHost, HostCapabilities, HostSurface, MemoryStats, MemoryStatsSource, NoopDispatcher,
    PlatformError, PlatformResult, ScrollableView, UiDispatcher,
};
pub use quality::{ModeChange, QualityMode, ScreenProfile, TransitionReason};
