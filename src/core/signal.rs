//! Shutdown coordination
//!
//! A single flag shared by the frame loop, the memory worker and every
//! host-facing entry point. Each loop iteration and callback checks it first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Thread-safe shutdown state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown. Returns `true` only for the first caller.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }
}
