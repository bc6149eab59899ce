//! Scroll Render Optimizer
//!
//! Stateless tuning for scrollable views. The aggressiveness level is not
//! stored here; it comes from the screen's profile.

use serde::{Deserialize, Serialize};

use crate::platform::{ScrollTuning, ScrollableView};

/// How hard to cut per-frame scroll cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollAggressiveness {
    Standard,
    Aggressive,
}

impl ScrollAggressiveness {
    pub fn tuning(self) -> ScrollTuning {
        match self {
            Self::Standard => ScrollTuning {
                item_view_cache_size: 20,
                max_recycled_views: 30,
                item_animations: false,
                fixed_item_extent: true,
                scrolling_cache: false,
                smooth_scrollbar: true,
            },
            Self::Aggressive => ScrollTuning {
                item_view_cache_size: 10,
                max_recycled_views: 15,
                item_animations: false,
                fixed_item_extent: true,
                scrolling_cache: false,
                smooth_scrollbar: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollRenderOptimizer;

impl ScrollRenderOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Apply tuning for `level` to a view. Returns `false` if the view
    /// already carried exactly that tuning and nothing was written.
    pub fn apply(&self, view: &mut dyn ScrollableView, level: ScrollAggressiveness) -> bool {
        let tuning = level.tuning();
        if view.tuning() == Some(tuning) {
            return false;
        }
        view.apply_tuning(&tuning);
        true
    }
}
