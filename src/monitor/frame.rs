//! Frame cadence monitoring
//!
//! The host's vsync callback hands every frame timestamp to
//! [`FrameCadenceMonitor::on_frame`]. Frames are counted over a fixed
//! window and an FPS estimate is published once per window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Whether the host should re-arm its frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameControl {
    Continue,
    Stop,
}

impl FrameControl {
    pub fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Published FPS value, readable from any thread.
///
/// Stores the bit pattern of an `f64`; NaN means nothing was published yet.
#[derive(Debug)]
pub struct FpsCell(AtomicU64);

impl FpsCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(f64::NAN.to_bits()))
    }

    pub fn store(&self, fps: f64) {
        self.0.store(fps.to_bits(), Ordering::Release);
    }

    pub fn load(&self) -> Option<f64> {
        let fps = f64::from_bits(self.0.load(Ordering::Acquire));
        if fps.is_nan() {
            None
        } else {
            Some(fps)
        }
    }
}

impl Default for FpsCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling frame-rate window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsEstimate {
    pub frames_in_window: u32,
    /// Frame timestamp (ns) that opened the current window
    pub window_start_nanos: Option<u64>,
    pub current_fps: Option<f64>,
}

pub struct FrameCadenceMonitor {
    update_interval_nanos: u64,
    frames_in_window: u32,
    window_start: Option<u64>,
    last_frame: Option<u64>,
    last_frame_interval: Option<Duration>,
    current_fps: Option<f64>,
}

impl FrameCadenceMonitor {
    pub fn new(update_interval: Duration) -> Self {
        Self {
            update_interval_nanos: update_interval.as_nanos().max(1) as u64,
            frames_in_window: 0,
            window_start: None,
            last_frame: None,
            last_frame_interval: None,
            current_fps: None,
        }
    }

    /// Record one displayed frame. Returns the new estimate when a window
    /// closes.
    pub fn on_frame(&mut self, frame_time_nanos: u64) -> Option<f64> {
        self.last_frame_interval = self
            .last_frame
            .map(|prev| Duration::from_nanos(frame_time_nanos.saturating_sub(prev)));
        self.last_frame = Some(frame_time_nanos);

        self.frames_in_window += 1;
        let start = *self.window_start.get_or_insert(frame_time_nanos);
        let elapsed = frame_time_nanos.saturating_sub(start);
        if elapsed < self.update_interval_nanos {
            return None;
        }

        let fps = self.frames_in_window as f64 * 1_000_000_000.0 / elapsed as f64;
        self.current_fps = Some(fps);
        self.frames_in_window = 0;
        self.window_start = Some(frame_time_nanos);
        Some(fps)
    }

    /// Last published estimate.
    pub fn current_fps(&self) -> Option<f64> {
        self.current_fps
    }

    pub fn estimate(&self) -> FpsEstimate {
        FpsEstimate {
            frames_in_window: self.frames_in_window,
            window_start_nanos: self.window_start,
            current_fps: self.current_fps,
        }
    }

    /// Time between the two most recent frames.
    pub fn last_frame_interval(&self) -> Option<Duration> {
        self.last_frame_interval
    }

    /// Forget the open window, e.g. after the frame callback was lost and
    /// re-armed. The published estimate is kept.
    pub fn reset_window(&mut self) {
        self.frames_in_window = 0;
        self.window_start = None;
        self.last_frame = None;
        self.last_frame_interval = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000_000;

    /// `count` frames spread evenly so the first lands at 0 and the last at
    /// exactly one second.
    fn feed_evenly(monitor: &mut FrameCadenceMonitor, count: u64) -> Vec<f64> {
        (0..count)
            .filter_map(|i| monitor.on_frame(i * SECOND / (count - 1)))
            .collect()
    }

    #[test]
    fn test_sixty_frames_per_second() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        let published = feed_evenly(&mut monitor, 60);
        assert_eq!(published, vec![60.0]);
        assert_eq!(monitor.current_fps(), Some(60.0));
    }

    #[test]
    fn test_twenty_five_frames_per_second() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        let published = feed_evenly(&mut monitor, 25);
        assert_eq!(published, vec![25.0]);
        assert_eq!(monitor.current_fps(), Some(25.0));
    }

    #[test]
    fn test_first_frame_only_anchors_window() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        assert_eq!(monitor.on_frame(5 * SECOND), None);

        let estimate = monitor.estimate();
        assert_eq!(estimate.frames_in_window, 1);
        assert_eq!(estimate.window_start_nanos, Some(5 * SECOND));
        assert_eq!(estimate.current_fps, None);
        assert_eq!(monitor.last_frame_interval(), None);
    }

    #[test]
    fn test_estimate_not_interpolated_between_windows() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        feed_evenly(&mut monitor, 60);

        // Half a window of slow frames doesn't move the published value
        monitor.on_frame(SECOND + SECOND / 10);
        monitor.on_frame(SECOND + SECOND / 5);
        assert_eq!(monitor.current_fps(), Some(60.0));
        assert_eq!(monitor.estimate().frames_in_window, 2);
        assert_eq!(monitor.last_frame_interval(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_second_window_counts_from_boundary() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        feed_evenly(&mut monitor, 60);

        // 30 frames in the next second, the last one exactly on the boundary
        let mut published = None;
        for i in 1..=30u64 {
            published = monitor.on_frame(SECOND + i * SECOND / 30).or(published);
        }
        assert_eq!(published, Some(30.0));
    }

    #[test]
    fn test_reset_window_keeps_published_value() {
        let mut monitor = FrameCadenceMonitor::new(Duration::from_millis(1000));
        feed_evenly(&mut monitor, 60);
        monitor.on_frame(SECOND + 1);
        monitor.reset_window();

        assert_eq!(monitor.estimate().frames_in_window, 0);
        assert_eq!(monitor.current_fps(), Some(60.0));
    }

    #[test]
    fn test_fps_cell() {
        let cell = FpsCell::new();
        assert_eq!(cell.load(), None);
        cell.store(42.5);
        assert_eq!(cell.load(), Some(42.5));
    }
}
