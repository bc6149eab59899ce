//! Rendering quality: mode state machine, per-screen profiles and
//! scroll-view tuning.

pub mod controller;
pub mod profiles;
pub mod scroll;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use controller::{
    ModeChange, QualityController, QualityControllerState, QualitySignals, TransitionReason,
};
pub use profiles::{ScreenProfile, ScreenProfileRegistry};
pub use scroll::{ScrollAggressiveness, ScrollRenderOptimizer};

/// Rendering-fidelity tier. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityMode {
    Low,
    Medium,
    High,
}

impl QualityMode {
    /// One level down, saturating at `Low`.
    pub fn degraded(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    /// One level up, saturating at `High`.
    pub fn upgraded(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    /// Scroll tuning used by screens rendering at this quality.
    pub fn scroll_aggressiveness(self) -> ScrollAggressiveness {
        match self {
            Self::Low | Self::Medium => ScrollAggressiveness::Aggressive,
            Self::High => ScrollAggressiveness::Standard,
        }
    }
}

impl Default for QualityMode {
    fn default() -> Self {
        Self::High
    }
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}
