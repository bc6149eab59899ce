//! Runtime context
//!
//! [`PerfContext`] is the thread-safe half: published signals, the image
//! cache, the event bus and the shutdown flag. Decode workers and bridge
//! threads hold it through an `Arc`.
//!
//! [`PerformanceManager`] is the UI-thread half. It owns the quality
//! controller, the screen registry, the frame monitor and the host surface,
//! and takes work the memory worker leaves in its [`UiMailbox`]. The host's
//! [`UiDispatcher`] is told whenever there is something to take, so pressure
//! is handled even while no frames arrive.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bridge::HostEvent;
use crate::cache::BoundedImageCache;
use crate::core::config::PerfConfig;
use crate::core::signal::ShutdownSignal;
use crate::monitor::frame::{FpsCell, FrameCadenceMonitor, FrameControl};
use crate::monitor::memory::{
    HostMemorySignal, MemoryPressureMonitor, MemorySnapshot, MemoryWorker, PressureLevel,
    SnapshotCell, UiMailbox,
};
use crate::platform::{HostSurface, MemoryStats, MemoryStatsSource, NoopDispatcher, UiDispatcher};
use crate::quality::{
    ModeChange, QualityController, QualityControllerState, QualityMode, QualitySignals,
    ScreenProfile, ScreenProfileRegistry, ScrollRenderOptimizer,
};

/// Host events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Shared context
// ============================================================================

pub struct PerfContext {
    config: PerfConfig,
    cache: Arc<BoundedImageCache>,
    fps: FpsCell,
    snapshot: Arc<SnapshotCell>,
    shutdown: ShutdownSignal,
    events: broadcast::Sender<HostEvent>,
    worker: Mutex<Option<MemoryWorker>>,
    source: Arc<dyn MemoryStatsSource>,
}

impl PerfContext {
    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<BoundedImageCache> {
        &self.cache
    }

    /// Last published FPS, `0.0` before the first estimate.
    pub fn current_fps(&self) -> f64 {
        self.fps.load().unwrap_or(0.0)
    }

    /// Latest published memory snapshot.
    pub fn memory_snapshot(&self) -> Option<MemorySnapshot> {
        self.snapshot.load()
    }

    /// Fresh memory statistics, falling back to the last snapshot and then
    /// to zeros.
    pub fn memory_info(&self) -> MemoryStats {
        match self.source.read_stats() {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Fresh memory read failed ({}), using last snapshot", e);
                self.snapshot
                    .load()
                    .map(|snapshot| snapshot.stats)
                    .unwrap_or_default()
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Forward an OS low-memory signal to the memory worker.
    ///
    /// Returns `false` if no worker is running.
    pub fn push_pressure(&self, signal: HostMemorySignal) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        match worker.as_ref() {
            Some(worker) => worker.push(signal),
            None => {
                debug!("No memory worker running, dropping {:?}", signal);
                false
            }
        }
    }

    /// Send an event to subscribers. Nothing is sent after shutdown.
    pub fn emit(&self, event: HostEvent) {
        if self.is_shut_down() {
            return;
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Stop background work and drop cached payloads. Returns `false` if
    /// shutdown had already been requested.
    pub fn shutdown(&self) -> bool {
        if !self.shutdown.request() {
            debug!("Context shutdown already requested");
            return false;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop();
        }

        self.cache.evict_all();
        true
    }

    fn set_worker(&self, worker: MemoryWorker) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
    }
}

// ============================================================================
// UI-thread manager
// ============================================================================

pub struct PerformanceManager<H: HostSurface> {
    context: Arc<PerfContext>,
    host: H,
    controller: QualityController,
    registry: ScreenProfileRegistry,
    frames: FrameCadenceMonitor,
    scroll: ScrollRenderOptimizer,
    mailbox: Arc<UiMailbox>,
    pressure: PressureLevel,
    released: bool,
}

impl<H: HostSurface> PerformanceManager<H> {
    /// Build the manager and start the background memory worker.
    ///
    /// `dispatcher` is called from the worker thread after each sample; it
    /// must get [`pump`](Self::pump) run on the UI thread.
    pub fn start(
        config: PerfConfig,
        source: Arc<dyn MemoryStatsSource>,
        host: H,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Self {
        let (manager, monitor) = Self::build(config, source, host, dispatcher);

        match MemoryWorker::spawn(monitor) {
            Ok(worker) => manager.context.set_worker(worker),
            Err(e) => error!("Failed to spawn memory monitor thread: {}", e),
        }

        info!(
            "Performance manager started (cache {} bytes, fps threshold {})",
            manager.context.cache.capacity_bytes(),
            manager.context.config.fps_threshold
        );
        manager
    }

    /// Build the manager without a worker. The caller drives the returned
    /// monitor on its own schedule.
    pub fn with_external_polling(
        config: PerfConfig,
        source: Arc<dyn MemoryStatsSource>,
        host: H,
    ) -> (Self, MemoryPressureMonitor) {
        Self::build(config, source, host, Arc::new(NoopDispatcher))
    }

    fn build(
        config: PerfConfig,
        source: Arc<dyn MemoryStatsSource>,
        host: H,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> (Self, MemoryPressureMonitor) {
        let cache = Arc::new(BoundedImageCache::new(config.cache_capacity_bytes()));
        let snapshot = Arc::new(SnapshotCell::new());
        let shutdown = ShutdownSignal::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mailbox = Arc::new(UiMailbox::new(Arc::clone(&snapshot), dispatcher));

        let monitor = MemoryPressureMonitor::new(
            Arc::clone(&source),
            config.memory_pressure_thresholds,
            config.memory_poll_interval(),
            Arc::clone(&mailbox),
            shutdown.clone(),
        );
        let controller = QualityController::new(&config, Arc::clone(&cache));
        let frames = FrameCadenceMonitor::new(config.fps_update_interval());

        let context = Arc::new(PerfContext {
            config,
            cache,
            fps: FpsCell::new(),
            snapshot,
            shutdown,
            events,
            worker: Mutex::new(None),
            source,
        });

        let manager = Self {
            context,
            host,
            controller,
            registry: ScreenProfileRegistry::new(),
            frames,
            scroll: ScrollRenderOptimizer::new(),
            mailbox,
            pressure: PressureLevel::Normal,
            released: false,
        };
        (manager, monitor)
    }

    pub fn context(&self) -> &Arc<PerfContext> {
        &self.context
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn registry(&self) -> &ScreenProfileRegistry {
        &self.registry
    }

    pub fn quality_mode(&self) -> QualityMode {
        self.controller.mode()
    }

    pub fn controller_state(&self) -> QualityControllerState {
        self.controller.state()
    }

    /// Pressure level of the last memory sample seen on this thread.
    pub fn pressure_level(&self) -> PressureLevel {
        self.pressure
    }

    pub fn current_fps(&self) -> f64 {
        self.context.current_fps()
    }

    /// Vsync callback. The host re-arms its frame callback only while this
    /// returns [`FrameControl::Continue`].
    pub fn on_frame(&mut self, frame_time_nanos: u64) -> FrameControl {
        if self.context.is_shut_down() {
            return FrameControl::Stop;
        }
        self.pump();

        if let Some(fps) = self.frames.on_frame(frame_time_nanos) {
            self.context.fps.store(fps);
            self.context.emit(HostEvent::FpsUpdate { fps });
            self.evaluate(QualitySignals {
                fps: Some(fps),
                pressure: self.pressure,
            });
        }
        FrameControl::Continue
    }

    /// The host could not re-arm its frame callback. The estimate stays at
    /// its last value until frames arrive again.
    pub fn on_frame_callback_lost(&mut self) {
        warn!(
            "Frame callback lost, FPS estimate stalled at {:.1}",
            self.context.current_fps()
        );
        self.frames.reset_window();
    }

    /// Apply pending work from the memory worker: at most one evaluation
    /// with the newest sample and one cleanup at the most severe level seen.
    /// Returns how many of the two were handled.
    ///
    /// Runs at the start of every frame. Hosts also call it from their
    /// [`UiDispatcher`] so pressure is handled while frames are stopped.
    pub fn pump(&mut self) -> usize {
        if self.context.is_shut_down() {
            self.discard_requests();
            return 0;
        }

        let work = self.mailbox.take();
        if let Some(snapshot) = work.sample {
            let level = snapshot.pressure_level;
            if level != self.pressure {
                debug!("Memory pressure {} -> {}", self.pressure, level);
                self.pressure = level;
                self.context.emit(HostEvent::MemoryPressure { level });
            }
            self.evaluate(QualitySignals {
                fps: self.frames.current_fps(),
                pressure: level,
            });
        }
        if let Some(level) = work.cleanup {
            self.host.request_memory_cleanup(level);
        }
        work.len()
    }

    /// Apply the screen's profile: scroll tuning, image cache toggle and
    /// hardware layer hint. Returns `false` for screens the host doesn't know.
    pub fn optimize_screen(&mut self, screen: &str) -> bool {
        if self.context.is_shut_down() {
            return false;
        }

        let views = match self.host.scroll_views(screen) {
            Some(views) => views,
            None => {
                debug!("Unknown screen {}, nothing to optimize", screen);
                return false;
            }
        };

        let profile = *self.registry.get_or_create(screen);
        let mut tuned = 0;
        if profile.scroll_optimization_enabled {
            let level = profile.scroll_aggressiveness();
            for view in views {
                if self.scroll.apply(view, level) {
                    tuned += 1;
                }
            }
        }

        self.host
            .set_image_cache_enabled(screen, profile.image_cache_enabled);
        if self.host.capabilities().hardware_layers {
            self.host
                .set_hardware_layers(screen, profile.hardware_acceleration_enabled);
        }

        debug!(
            "Optimized {} at {} quality ({} views retuned)",
            screen, profile.quality_mode, tuned
        );
        true
    }

    /// Change a screen's profile and re-apply it.
    pub fn update_screen<F>(&mut self, screen: &str, mutator: F) -> ScreenProfile
    where
        F: FnOnce(&mut ScreenProfile),
    {
        let profile = self.registry.update(screen, mutator);
        self.optimize_screen(screen);
        profile
    }

    /// Ordered shutdown: flag, worker, cache, pending requests, host.
    pub fn shutdown(&mut self) {
        if self.released {
            warn!("Performance manager already shut down");
            return;
        }

        self.context.shutdown();
        self.discard_requests();
        self.host.release_resources();
        self.released = true;

        info!("Performance manager shut down");
    }

    fn evaluate(&mut self, signals: QualitySignals) -> Option<ModeChange> {
        let change = self.controller.evaluate(signals, &mut self.registry)?;

        for screen in self.registry.screens() {
            self.optimize_screen(&screen);
        }
        self.context.emit(HostEvent::QualityChanged(change));
        Some(change)
    }

    fn discard_requests(&mut self) {
        let discarded = self.mailbox.take();
        if !discarded.is_empty() {
            debug!("Discarded pending UI work {:?}", discarded);
        }
    }
}

impl<H: HostSurface> Drop for PerformanceManager<H> {
    fn drop(&mut self) {
        if !self.released {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        CountingDispatcher, HeadlessHost, ScrollTuning, StaticMemorySource, DEFAULT_SCREENS,
    };
    use crate::quality::{ScrollAggressiveness, TransitionReason};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    const SECOND: u64 = 1_000_000_000;

    fn test_config() -> PerfConfig {
        PerfConfig {
            cache_capacity_bytes: Some(1000),
            ..PerfConfig::default()
        }
    }

    fn manager_with(
        fraction: f64,
    ) -> (
        PerformanceManager<HeadlessHost>,
        MemoryPressureMonitor,
        Arc<StaticMemorySource>,
    ) {
        let source = Arc::new(StaticMemorySource::with_fraction(1_000_000, fraction));
        let (manager, monitor) = PerformanceManager::with_external_polling(
            test_config(),
            source.clone(),
            HeadlessHost::with_screens(DEFAULT_SCREENS, 2),
        );
        (manager, monitor, source)
    }

    fn feed_frames(manager: &mut PerformanceManager<HeadlessHost>, start: u64, count: u64) {
        for i in 0..count {
            manager.on_frame(start + i * SECOND / (count - 1));
        }
    }

    fn tuning_of(
        manager: &PerformanceManager<HeadlessHost>,
        screen: &str,
    ) -> Option<ScrollTuning> {
        manager.host().screen(screen).and_then(|s| s.views[0].tuning)
    }

    #[test]
    fn test_optimize_known_and_unknown_screens() {
        let (mut manager, _, _) = manager_with(0.5);

        assert!(manager.optimize_screen("ReaderScreen"));
        assert_eq!(
            tuning_of(&manager, "ReaderScreen"),
            Some(ScrollAggressiveness::Standard.tuning())
        );
        let screen = manager.host().screen("ReaderScreen").unwrap();
        assert_eq!(screen.image_cache_enabled, Some(true));
        assert_eq!(screen.hardware_layers, Some(true));

        assert!(!manager.optimize_screen("SettingsScreen"));
        assert!(!manager.registry().contains("SettingsScreen"));
    }

    #[test]
    fn test_hardware_layers_need_capability() {
        let (mut manager, _, _) = manager_with(0.5);
        manager.host_mut().capabilities.hardware_layers = false;

        assert!(manager.optimize_screen("HomeScreen"));
        assert_eq!(manager.host().screen("HomeScreen").unwrap().hardware_layers, None);
    }

    #[test]
    fn test_low_fps_degrades_and_retunes_screens() {
        let (mut manager, _, _) = manager_with(0.5);
        let mut events = manager.context().subscribe();
        manager.optimize_screen("ReaderScreen");

        feed_frames(&mut manager, 0, 25);

        assert_eq!(manager.current_fps(), 25.0);
        assert_eq!(manager.quality_mode(), QualityMode::Medium);
        assert_eq!(manager.context().cache().capacity_bytes(), 750);
        assert_eq!(
            tuning_of(&manager, "ReaderScreen"),
            Some(ScrollAggressiveness::Aggressive.tuning())
        );

        assert_eq!(events.try_recv().unwrap(), HostEvent::FpsUpdate { fps: 25.0 });
        match events.try_recv().unwrap() {
            HostEvent::QualityChanged(change) => {
                assert_eq!(change.to, QualityMode::Medium);
                assert_eq!(change.reason, TransitionReason::LowFps);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_critical_memory_evicts_and_requests_cleanup() {
        let (mut manager, mut monitor, _) = manager_with(0.05);
        let mut events = manager.context().subscribe();
        manager
            .context()
            .cache()
            .put("page-1", Bytes::from_static(b"decoded"), 100)
            .unwrap();

        monitor.poll();
        assert_eq!(manager.pump(), 2);

        assert!(manager.context().cache().is_empty());
        assert_eq!(manager.quality_mode(), QualityMode::Medium);
        assert_eq!(manager.pressure_level(), PressureLevel::Critical);
        assert_eq!(manager.host().cleanup_requests, vec![PressureLevel::Critical]);

        assert_eq!(
            events.try_recv().unwrap(),
            HostEvent::MemoryPressure {
                level: PressureLevel::Critical
            }
        );
        assert!(matches!(events.try_recv().unwrap(), HostEvent::QualityChanged(_)));
    }

    #[test]
    fn test_backlog_of_samples_evaluates_once() {
        let (mut manager, mut monitor, _) = manager_with(0.15);
        for _ in 0..3 {
            monitor.poll();
        }

        manager.on_frame(0);

        assert_eq!(manager.quality_mode(), QualityMode::Medium);
        assert_eq!(manager.pressure_level(), PressureLevel::Low);
        assert_eq!(manager.host().cleanup_requests, vec![PressureLevel::Low]);
        assert_eq!(manager.pump(), 0);
    }

    #[test]
    fn test_backlog_keeps_most_severe_cleanup() {
        let (mut manager, mut monitor, source) = manager_with(0.15);
        manager
            .context()
            .cache()
            .put("page-1", Bytes::from_static(b"decoded"), 100)
            .unwrap();

        monitor.poll();
        source.set_available_fraction(0.05);
        monitor.poll();
        assert_eq!(manager.pump(), 2);

        assert_eq!(manager.pressure_level(), PressureLevel::Critical);
        assert_eq!(manager.host().cleanup_requests, vec![PressureLevel::Critical]);
        assert!(manager.context().cache().is_empty());
    }

    #[test]
    fn test_normal_memory_changes_nothing() {
        let (mut manager, mut monitor, _) = manager_with(0.5);
        monitor.poll();
        assert_eq!(manager.pump(), 1);

        assert_eq!(manager.quality_mode(), QualityMode::High);
        assert!(manager.host().cleanup_requests.is_empty());
        assert_eq!(
            manager.context().memory_snapshot().map(|s| s.pressure_level),
            Some(PressureLevel::Normal)
        );
    }

    #[test]
    fn test_memory_info_falls_back_to_snapshot() {
        let (manager, mut monitor, source) = manager_with(0.5);
        monitor.poll();

        source.set_error("unavailable");
        let info = manager.context().memory_info();
        assert_eq!(info.total_bytes, 1_000_000);
        assert_eq!(info.available_bytes, 500_000);
    }

    #[test]
    fn test_update_screen_reapplies_profile() {
        let (mut manager, _, _) = manager_with(0.5);
        manager.optimize_screen("LibraryScreen");

        let profile = manager.update_screen("LibraryScreen", |p| p.image_cache_enabled = false);
        assert!(!profile.image_cache_enabled);
        assert_eq!(
            manager.host().screen("LibraryScreen").unwrap().image_cache_enabled,
            Some(false)
        );
    }

    #[test]
    fn test_shutdown_stops_everything_once() {
        let (mut manager, mut monitor, _) = manager_with(0.05);
        let mut events = manager.context().subscribe();
        manager
            .context()
            .cache()
            .put("page-1", Bytes::from_static(b"decoded"), 100)
            .unwrap();

        // Queued before shutdown, must never be applied
        monitor.poll();
        manager.shutdown();

        assert!(manager.context().is_shut_down());
        assert!(manager.context().cache().is_empty());
        assert_eq!(manager.on_frame(SECOND), FrameControl::Stop);
        assert_eq!(manager.pump(), 0);
        assert!(!manager.optimize_screen("ReaderScreen"));
        assert!(manager.host().cleanup_requests.is_empty());
        assert!(monitor.poll().is_none());
        assert!(events.try_recv().is_err());

        manager.shutdown();
        assert_eq!(manager.host().release_count, 1);
    }

    #[test]
    fn test_context_shutdown_elsewhere_still_releases_host() {
        let (mut manager, _, _) = manager_with(0.5);
        assert!(manager.context().shutdown());
        assert!(!manager.context().shutdown());

        manager.shutdown();
        assert_eq!(manager.host().release_count, 1);
    }

    #[test]
    fn test_worker_publishes_and_joins_on_shutdown() {
        let source = Arc::new(StaticMemorySource::with_fraction(1_000_000, 0.5));
        let mut manager = PerformanceManager::start(
            test_config(),
            source,
            HeadlessHost::with_screens(DEFAULT_SCREENS, 1),
            Arc::new(CountingDispatcher::new()),
        );
        let context = Arc::clone(manager.context());

        let deadline = Instant::now() + Duration::from_secs(5);
        while context.memory_snapshot().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(context.memory_snapshot().is_some());
        assert!(context.push_pressure(HostMemorySignal::RunningModerate));

        manager.shutdown();
        assert!(!context.push_pressure(HostMemorySignal::RunningLow));
        assert_eq!(manager.host().release_count, 1);
    }

    #[test]
    fn test_critical_sample_wakes_idle_ui_thread() {
        let source = Arc::new(StaticMemorySource::with_fraction(1_000_000, 0.05));
        let dispatcher = Arc::new(CountingDispatcher::new());
        let mut manager = PerformanceManager::start(
            test_config(),
            source,
            HeadlessHost::with_screens(DEFAULT_SCREENS, 1),
            dispatcher.clone(),
        );
        manager
            .context()
            .cache()
            .put("page-1", Bytes::from_static(b"decoded"), 100)
            .unwrap();

        // No frames: only the dispatcher tells us to pump
        let deadline = Instant::now() + Duration::from_secs(5);
        while dispatcher.calls() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(dispatcher.calls() > 0);

        manager.pump();
        assert!(manager.context().cache().is_empty());
        assert_eq!(manager.host().cleanup_requests, vec![PressureLevel::Critical]);
        assert_eq!(manager.quality_mode(), QualityMode::Medium);

        manager.shutdown();
    }
}
