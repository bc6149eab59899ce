//! Screen Profile Registry
//!
//! Per-screen record of which optimizations are enabled and at what
//! quality. Only touched from the UI thread.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{QualityMode, ScrollAggressiveness};

/// Settings a screen applies on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenProfile {
    pub scroll_optimization_enabled: bool,
    pub image_cache_enabled: bool,
    pub hardware_acceleration_enabled: bool,
    pub quality_mode: QualityMode,
}

impl Default for ScreenProfile {
    fn default() -> Self {
        Self {
            scroll_optimization_enabled: true,
            image_cache_enabled: true,
            hardware_acceleration_enabled: true,
            quality_mode: QualityMode::High,
        }
    }
}

impl ScreenProfile {
    pub fn scroll_aggressiveness(&self) -> ScrollAggressiveness {
        self.quality_mode.scroll_aggressiveness()
    }
}

#[derive(Debug, Default)]
pub struct ScreenProfileRegistry {
    profiles: HashMap<String, ScreenProfile>,
    /// Mode given to profiles created after a transition
    current_mode: QualityMode,
}

impl ScreenProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile for `screen`, created with defaults on first use.
    pub fn get_or_create(&mut self, screen: &str) -> &mut ScreenProfile {
        let mode = self.current_mode;
        self.profiles
            .entry(screen.to_string())
            .or_insert_with(|| ScreenProfile {
                quality_mode: mode,
                ..ScreenProfile::default()
            })
    }

    /// Profile for `screen`, or what a new profile would look like.
    pub fn get(&self, screen: &str) -> ScreenProfile {
        self.profiles.get(screen).copied().unwrap_or(ScreenProfile {
            quality_mode: self.current_mode,
            ..ScreenProfile::default()
        })
    }

    /// Mutate the profile for `screen`, creating it first if needed.
    pub fn update<F>(&mut self, screen: &str, mutator: F) -> ScreenProfile
    where
        F: FnOnce(&mut ScreenProfile),
    {
        let profile = self.get_or_create(screen);
        mutator(profile);
        *profile
    }

    /// Set the quality mode of every profile.
    pub fn set_quality_mode_all(&mut self, mode: QualityMode) {
        self.current_mode = mode;
        for profile in self.profiles.values_mut() {
            profile.quality_mode = mode;
        }
    }

    pub fn contains(&self, screen: &str) -> bool {
        self.profiles.contains_key(screen)
    }

    /// Identifiers of all known screens.
    pub fn screens(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
