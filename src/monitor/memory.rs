//! Memory pressure monitoring
//!
//! Polls the host's memory statistics on a dedicated background worker and
//! classifies them into a [`PressureLevel`]. Hosts can also push OS-level
//! low-memory signals, which are handled immediately and restart the poll
//! timer.
//!
//! The worker never touches controller state. It publishes the latest
//! [`MemorySnapshot`] through a [`UiMailbox`] and asks the host's
//! [`UiDispatcher`] to run a pump on the UI thread. The mailbox keeps only
//! the newest sample and the most severe pending cleanup, so nothing piles
//! up while the UI thread is idle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::core::config::PressureThresholds;
use crate::core::signal::ShutdownSignal;
use crate::platform::{MemoryStats, MemoryStatsSource, UiDispatcher};

/// How little free memory remains. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PressureLevel {
    Normal,
    Moderate,
    Low,
    Critical,
}

impl PressureLevel {
    /// `Low` and `Critical` ask the UI thread for a cleanup pass.
    pub fn needs_cleanup(self) -> bool {
        matches!(self, Self::Low | Self::Critical)
    }

    /// Non-zero encoding, so 0 can mean "nothing pending" in an atomic.
    fn rank(self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::Moderate => 2,
            Self::Low => 3,
            Self::Critical => 4,
        }
    }

    fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Normal),
            2 => Some(Self::Moderate),
            3 => Some(Self::Low),
            4 => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for PressureLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Moderate => write!(f, "moderate"),
            Self::Low => write!(f, "low"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Classify an available-memory fraction.
pub fn classify_fraction(
    available_fraction: f64,
    thresholds: &PressureThresholds,
) -> PressureLevel {
    if available_fraction < thresholds.critical {
        PressureLevel::Critical
    } else if available_fraction < thresholds.low {
        PressureLevel::Low
    } else if available_fraction < thresholds.moderate {
        PressureLevel::Moderate
    } else {
        PressureLevel::Normal
    }
}

/// Classify raw statistics. Unknown totals never count as pressure.
pub fn classify(stats: &MemoryStats, thresholds: &PressureThresholds) -> PressureLevel {
    match stats.available_fraction() {
        Some(fraction) => classify_fraction(fraction, thresholds),
        None => {
            debug!("Memory stats report zero total, treating as normal");
            PressureLevel::Normal
        }
    }
}

/// Low-memory signals pushed by the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostMemorySignal {
    /// Foreground, system starting to run low
    RunningModerate,
    /// Foreground, system running low
    RunningLow,
    /// Foreground, system about to kill background processes
    RunningCritical,
    /// App UI went to the background
    UiHidden,
    /// App process is in the background LRU list
    Background,
    /// App process is next to be killed
    Complete,
}

impl HostMemorySignal {
    pub fn pressure_level(self) -> PressureLevel {
        match self {
            Self::RunningModerate => PressureLevel::Moderate,
            Self::RunningLow => PressureLevel::Low,
            Self::RunningCritical => PressureLevel::Critical,
            Self::UiHidden => PressureLevel::Normal,
            Self::Background => PressureLevel::Moderate,
            Self::Complete => PressureLevel::Critical,
        }
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    Poll,
    Pushed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySnapshot {
    pub stats: MemoryStats,
    pub pressure_level: PressureLevel,
    pub source: SnapshotSource,
    pub captured_at: DateTime<Local>,
}

impl MemorySnapshot {
    pub fn new(stats: MemoryStats, pressure_level: PressureLevel, source: SnapshotSource) -> Self {
        Self {
            stats,
            pressure_level,
            source,
            captured_at: Local::now(),
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.stats.available_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.stats.total_bytes
    }
}

/// Latest published snapshot. Replaced as a whole, so readers never see a
/// half-written value.
#[derive(Debug, Default)]
pub struct SnapshotCell(RwLock<Option<MemorySnapshot>>);

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, snapshot: MemorySnapshot) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    pub fn load(&self) -> Option<MemorySnapshot> {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Work waiting for the UI thread, as returned by [`UiMailbox::take`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UiWork {
    /// Newest snapshot, if one was published since the last take
    pub sample: Option<MemorySnapshot>,
    /// Most severe cleanup level requested since the last take
    pub cleanup: Option<PressureLevel>,
}

impl UiWork {
    pub fn is_empty(&self) -> bool {
        self.sample.is_none() && self.cleanup.is_none()
    }

    /// Number of pending items, at most 2.
    pub fn len(&self) -> usize {
        usize::from(self.sample.is_some()) + usize::from(self.cleanup.is_some())
    }
}

/// Hand-off from the memory worker to the UI thread.
///
/// Holds a "sample pending" flag and the most severe pending cleanup level.
/// The snapshot itself lives in the shared [`SnapshotCell`]. Posting any
/// number of times between two takes yields one unit of work.
pub struct UiMailbox {
    cell: Arc<SnapshotCell>,
    sample_pending: AtomicBool,
    cleanup: AtomicU8,
    dispatcher: Arc<dyn UiDispatcher>,
}

impl UiMailbox {
    pub fn new(cell: Arc<SnapshotCell>, dispatcher: Arc<dyn UiDispatcher>) -> Self {
        Self {
            cell,
            sample_pending: AtomicBool::new(false),
            cleanup: AtomicU8::new(0),
            dispatcher,
        }
    }

    /// Publish a snapshot and wake the UI thread.
    pub fn post(&self, snapshot: MemorySnapshot) {
        self.cell.store(snapshot);
        if snapshot.pressure_level.needs_cleanup() {
            self.cleanup
                .fetch_max(snapshot.pressure_level.rank(), Ordering::SeqCst);
        }
        self.sample_pending.store(true, Ordering::SeqCst);
        self.dispatcher.request_pump();
    }

    /// Take everything pending, leaving the mailbox empty.
    pub fn take(&self) -> UiWork {
        let sample = if self.sample_pending.swap(false, Ordering::SeqCst) {
            self.cell.load()
        } else {
            None
        };
        let cleanup = PressureLevel::from_rank(self.cleanup.swap(0, Ordering::SeqCst));
        UiWork { sample, cleanup }
    }
}

impl fmt::Debug for UiMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiMailbox")
            .field("sample_pending", &self.sample_pending.load(Ordering::SeqCst))
            .field("cleanup", &PressureLevel::from_rank(self.cleanup.load(Ordering::SeqCst)))
            .finish()
    }
}

/// Samples memory and publishes snapshots. Runs on the memory worker, or is
/// driven directly by callers that poll on their own schedule.
pub struct MemoryPressureMonitor {
    source: Arc<dyn MemoryStatsSource>,
    thresholds: PressureThresholds,
    poll_interval: Duration,
    mailbox: Arc<UiMailbox>,
    shutdown: ShutdownSignal,
    last_stats: Option<MemoryStats>,
}

impl MemoryPressureMonitor {
    pub fn new(
        source: Arc<dyn MemoryStatsSource>,
        thresholds: PressureThresholds,
        poll_interval: Duration,
        mailbox: Arc<UiMailbox>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source,
            thresholds,
            poll_interval,
            mailbox,
            shutdown,
            last_stats: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Read and publish one sample. A failed read keeps the previous
    /// snapshot and publishes nothing.
    pub fn poll(&mut self) -> Option<MemorySnapshot> {
        if self.is_shut_down() {
            return None;
        }

        let stats = match self.source.read_stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Memory stat read from {} failed: {}", self.source.name(), e);
                return None;
            }
        };
        self.last_stats = Some(stats);

        let level = classify(&stats, &self.thresholds);
        Some(self.publish(MemorySnapshot::new(stats, level, SnapshotSource::Poll)))
    }

    /// Handle a host-pushed signal immediately.
    pub fn on_pushed(&mut self, signal: HostMemorySignal) -> Option<MemorySnapshot> {
        if self.is_shut_down() {
            return None;
        }

        let stats = match self.source.read_stats() {
            Ok(stats) => {
                self.last_stats = Some(stats);
                Some(stats)
            }
            Err(e) => {
                warn!("Memory stat read after pushed {:?} failed: {}", signal, e);
                self.last_stats
            }
        };

        let computed = stats
            .map(|s| classify(&s, &self.thresholds))
            .unwrap_or_default();
        let level = signal.pressure_level().max(computed);
        info!("Host pushed {:?}, pressure now {}", signal, level);

        Some(self.publish(MemorySnapshot::new(
            stats.unwrap_or_default(),
            level,
            SnapshotSource::Pushed,
        )))
    }

    fn publish(&self, snapshot: MemorySnapshot) -> MemorySnapshot {
        if snapshot.pressure_level > PressureLevel::Normal {
            debug!(
                "Memory pressure {} ({:.0} of {:.0} MB available)",
                snapshot.pressure_level,
                snapshot.stats.available_mb(),
                snapshot.stats.total_mb()
            );
        }

        self.mailbox.post(snapshot);
        snapshot
    }
}

/// Messages to the memory worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    Pressure(HostMemorySignal),
    Shutdown,
}

/// Handle to the background thread running a [`MemoryPressureMonitor`].
pub struct MemoryWorker {
    signals: UnboundedSender<MonitorSignal>,
    thread: Option<JoinHandle<()>>,
}

impl MemoryWorker {
    /// Start polling on a dedicated thread.
    pub fn spawn(monitor: MemoryPressureMonitor) -> std::io::Result<Self> {
        let (signals, rx) = unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("renderpace-memory".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start memory monitor runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(run_loop(monitor, rx));
            })?;

        Ok(Self {
            signals,
            thread: Some(thread),
        })
    }

    /// Forward a host signal. Returns `false` if the worker has exited.
    pub fn push(&self, signal: HostMemorySignal) -> bool {
        self.signals.send(MonitorSignal::Pressure(signal)).is_ok()
    }

    /// Ask the worker to exit and wait for it.
    pub fn stop(mut self) {
        let _ = self.signals.send(MonitorSignal::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Memory monitor thread panicked");
            }
        }
    }
}

async fn run_loop(
    mut monitor: MemoryPressureMonitor,
    mut signals: UnboundedReceiver<MonitorSignal>,
) {
    info!(
        "Memory monitor started (source: {}, interval: {:?})",
        monitor.source.name(),
        monitor.poll_interval
    );

    monitor.poll();
    loop {
        if monitor.is_shut_down() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(monitor.poll_interval) => {
                monitor.poll();
            }
            signal = signals.recv() => match signal {
                Some(MonitorSignal::Pressure(signal)) => {
                    monitor.on_pushed(signal);
                }
                Some(MonitorSignal::Shutdown) | None => break,
            },
        }
    }

    info!("Memory monitor stopped");
}
