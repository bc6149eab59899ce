//! Headless host
//!
//! An in-memory `HostSurface` with recorded screens and views. The CLI uses
//! it to drive the controller without a real UI, and tests use it to observe
//! what the controller asked the host to do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::traits::{
    HostCapabilities, HostSurface, MemoryStats, MemoryStatsSource, PlatformError,
    PlatformResult, ScrollTuning, ScrollableView, UiDispatcher,
};
use crate::monitor::memory::PressureLevel;

/// Screens of the reading app.
pub const DEFAULT_SCREENS: &[&str] = &["HomeScreen", "LibraryScreen", "ReaderScreen"];

/// A scroll view that just remembers its tuning.
#[derive(Debug, Clone, Default)]
pub struct RecordedView {
    pub tuning: Option<ScrollTuning>,
    /// Number of times a tuning was actually written
    pub applied_count: u32,
}

impl ScrollableView for RecordedView {
    fn tuning(&self) -> Option<ScrollTuning> {
        self.tuning
    }

    fn apply_tuning(&mut self, tuning: &ScrollTuning) {
        self.tuning = Some(*tuning);
        self.applied_count += 1;
    }
}

/// Per-screen state recorded by the headless host.
#[derive(Debug, Clone, Default)]
pub struct RecordedScreen {
    pub views: Vec<RecordedView>,
    pub image_cache_enabled: Option<bool>,
    pub hardware_layers: Option<bool>,
}

/// Host with no real UI behind it.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    pub capabilities: HostCapabilities,
    pub screens: HashMap<String, RecordedScreen>,
    pub cleanup_requests: Vec<PressureLevel>,
    pub release_count: u32,
}

impl HeadlessHost {
    /// Host without any screens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with the given screens, each holding `views_per_screen` views.
    pub fn with_screens(names: &[&str], views_per_screen: usize) -> Self {
        let screens = names
            .iter()
            .map(|name| {
                let screen = RecordedScreen {
                    views: vec![RecordedView::default(); views_per_screen],
                    ..Default::default()
                };
                (name.to_string(), screen)
            })
            .collect();

        Self {
            screens,
            ..Default::default()
        }
    }

    pub fn screen(&self, name: &str) -> Option<&RecordedScreen> {
        self.screens.get(name)
    }
}

impl HostSurface for HeadlessHost {
    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    fn scroll_views(&mut self, screen: &str) -> Option<Vec<&mut dyn ScrollableView>> {
        self.screens.get_mut(screen).map(|s| {
            s.views
                .iter_mut()
                .map(|v| v as &mut dyn ScrollableView)
                .collect()
        })
    }

    fn set_image_cache_enabled(&mut self, screen: &str, enabled: bool) {
        if let Some(s) = self.screens.get_mut(screen) {
            s.image_cache_enabled = Some(enabled);
        }
    }

    fn set_hardware_layers(&mut self, screen: &str, enabled: bool) {
        if let Some(s) = self.screens.get_mut(screen) {
            s.hardware_layers = Some(enabled);
        }
    }

    fn request_memory_cleanup(&mut self, level: PressureLevel) {
        debug!("headless host: cleanup requested at {:?}", level);
        self.cleanup_requests.push(level);
    }

    fn release_resources(&mut self) {
        self.release_count += 1;
    }
}

/// Dispatcher that only counts wake-ups.
#[derive(Debug, Default)]
pub struct CountingDispatcher {
    calls: AtomicUsize,
}

impl CountingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UiDispatcher for CountingDispatcher {
    fn request_pump(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Memory source that reports whatever it was last told.
///
/// Backs `renderpace simulate` and the tests.
#[derive(Debug)]
pub struct StaticMemorySource {
    reading: Mutex<PlatformResult<MemoryStats>>,
}

impl StaticMemorySource {
    pub fn new(stats: MemoryStats) -> Self {
        Self {
            reading: Mutex::new(Ok(stats)),
        }
    }

    /// `total_bytes` of memory with `fraction` of it available.
    pub fn with_fraction(total_bytes: u64, fraction: f64) -> Self {
        Self::new(Self::stats_for(total_bytes, fraction))
    }

    pub fn set(&self, stats: MemoryStats) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Ok(stats);
    }

    /// Keep the current total, change the available share.
    pub fn set_available_fraction(&self, fraction: f64) {
        let mut reading = self.reading.lock().unwrap_or_else(PoisonError::into_inner);
        let total = reading.as_ref().map(|s| s.total_bytes).unwrap_or(0);
        *reading = Ok(Self::stats_for(total, fraction));
    }

    /// Make subsequent reads fail.
    pub fn set_error(&self, message: &str) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) =
            Err(PlatformError::IoError(message.to_string()));
    }

    fn stats_for(total_bytes: u64, fraction: f64) -> MemoryStats {
        let available = (total_bytes as f64 * fraction.clamp(0.0, 1.0)).round() as u64;
        MemoryStats {
            total_bytes,
            available_bytes: available,
            free_bytes: available,
        }
    }
}

impl MemoryStatsSource for StaticMemorySource {
    fn read_stats(&self) -> PlatformResult<MemoryStats> {
        self.reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
