//! Runtime signal monitors
//!
//! - [`frame`]: frame cadence and FPS estimation, driven by the host vsync
//! - [`memory`]: memory pressure sampling on a background worker

pub mod frame;
pub mod memory;

pub use frame::{FpsCell, FpsEstimate, FrameCadenceMonitor, FrameControl};
pub use memory::{
    classify, classify_fraction, HostMemorySignal, MemoryPressureMonitor, MemorySnapshot,
    MemoryWorker, MonitorSignal, PressureLevel, SnapshotCell, SnapshotSource, UiMailbox, UiWork,
};
