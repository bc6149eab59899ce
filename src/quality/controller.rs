//! Quality Controller
//!
//! Hysteretic state machine over [`QualityMode`]. Degrades one level as soon
//! as the frame rate or memory pressure goes bad, and only upgrades one level
//! after a streak of good samples.
//!
//! The controller is the single writer of the quality mode and the only
//! caller that resizes the image cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{QualityMode, ScreenProfileRegistry};
use crate::cache::BoundedImageCache;
use crate::core::config::{CacheFractions, PerfConfig};
use crate::monitor::memory::PressureLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityControllerState {
    pub mode: QualityMode,
    pub consecutive_good_samples: u32,
}

/// Latest value of each input signal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QualitySignals {
    /// `None` until the first FPS estimate is published
    pub fps: Option<f64>,
    pub pressure: PressureLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionReason {
    LowFps,
    MemoryPressure,
    Recovered,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowFps => write!(f, "low fps"),
            Self::MemoryPressure => write!(f, "memory pressure"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

/// A completed quality transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChange {
    pub from: QualityMode,
    pub to: QualityMode,
    pub reason: TransitionReason,
}

pub struct QualityController {
    state: QualityControllerState,
    cache: Arc<BoundedImageCache>,
    base_capacity_bytes: u64,
    fractions: CacheFractions,
    fps_threshold: f64,
    fps_upgrade_threshold: f64,
    streak_required: u32,
}

impl QualityController {
    /// Start at `High` and size the cache for it.
    pub fn new(config: &PerfConfig, cache: Arc<BoundedImageCache>) -> Self {
        let controller = Self {
            state: QualityControllerState::default(),
            cache,
            base_capacity_bytes: config.cache_capacity_bytes(),
            fractions: config.quality_cache_fractions,
            fps_threshold: config.fps_threshold,
            fps_upgrade_threshold: config.fps_upgrade_threshold(),
            streak_required: config.good_sample_streak_required.max(1),
        };
        controller
            .cache
            .configure(controller.capacity_for(controller.state.mode));
        controller
    }

    pub fn state(&self) -> QualityControllerState {
        self.state
    }

    pub fn mode(&self) -> QualityMode {
        self.state.mode
    }

    /// Cache capacity used while running at `mode`.
    pub fn capacity_for(&self, mode: QualityMode) -> u64 {
        (self.base_capacity_bytes as f64 * self.fractions.for_mode(mode)).round() as u64
    }

    /// Advance the streak and pick the next mode, without side effects.
    ///
    /// Returns `None` when the mode stays the same, including degrade or
    /// upgrade requests that hit the floor or ceiling.
    pub fn decide(&mut self, signals: QualitySignals) -> Option<(QualityMode, TransitionReason)> {
        let mode = self.state.mode;
        let fps_low = signals.fps.map_or(false, |fps| fps < self.fps_threshold);
        let pressure_high = signals.pressure.needs_cleanup();

        if fps_low || pressure_high {
            self.state.consecutive_good_samples = 0;
            let reason = if pressure_high {
                TransitionReason::MemoryPressure
            } else {
                TransitionReason::LowFps
            };
            let next = mode.degraded();
            return (next != mode).then_some((next, reason));
        }

        let fps_good = signals
            .fps
            .map_or(false, |fps| fps >= self.fps_upgrade_threshold);
        if !(fps_good && signals.pressure == PressureLevel::Normal) {
            self.state.consecutive_good_samples = 0;
            return None;
        }

        self.state.consecutive_good_samples += 1;
        if self.state.consecutive_good_samples < self.streak_required {
            return None;
        }

        self.state.consecutive_good_samples = 0;
        let next = mode.upgraded();
        (next != mode).then_some((next, TransitionReason::Recovered))
    }

    /// Evaluate the signals and apply any transition to the cache and the
    /// registry. Host-side screen re-optimization is left to the caller.
    pub fn evaluate(
        &mut self,
        signals: QualitySignals,
        registry: &mut ScreenProfileRegistry,
    ) -> Option<ModeChange> {
        if signals.pressure == PressureLevel::Critical {
            debug!("Critical memory pressure, evicting image cache");
            self.cache.evict_all();
        }

        let (to, reason) = self.decide(signals)?;
        let from = self.state.mode;
        self.state.mode = to;

        let capacity = self.capacity_for(to);
        self.cache.configure(capacity);
        registry.set_quality_mode_all(to);

        info!(
            "Quality {} -> {} ({}), cache capacity {} bytes",
            from, to, reason, capacity
        );
        Some(ModeChange { from, to, reason })
    }
}
