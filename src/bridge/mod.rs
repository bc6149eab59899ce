//! Host bridge
//!
//! JSON method channel between the embedding host and the controller, plus
//! the events pushed back to the host. Method names and payload keys follow
//! the host's camelCase conventions.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::core::context::PerformanceManager;
use crate::monitor::memory::{HostMemorySignal, PressureLevel};
use crate::platform::{HostSurface, MemoryStats};
use crate::quality::ModeChange;

/// Events pushed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum HostEvent {
    /// A new FPS estimate, at most once per update interval
    #[serde(rename = "onFpsUpdate")]
    FpsUpdate { fps: f64 },
    #[serde(rename = "onQualityChanged")]
    QualityChanged(ModeChange),
    #[serde(rename = "onMemoryPressure")]
    MemoryPressure { level: PressureLevel },
}

impl HostEvent {
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize host event: {}", e);
                json!({"error": e.to_string()}).to_string()
            }
        }
    }
}

/// Reply to `getMemoryInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfoReply {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub free_bytes: u64,
}

impl From<MemoryStats> for MemoryInfoReply {
    fn from(stats: MemoryStats) -> Self {
        Self {
            total_bytes: stats.total_bytes,
            available_bytes: stats.available_bytes,
            free_bytes: stats.free_bytes,
        }
    }
}

/// Dispatch one method-channel call. Returns `None` for methods this side
/// doesn't implement, so the host can report them as such.
pub fn handle_method<H: HostSurface>(
    manager: &mut PerformanceManager<H>,
    method: &str,
    payload: &serde_json::Value,
) -> Option<String> {
    debug!("Method channel call: {}", method);
    match method {
        "optimizeScreen" => Some(match screen_name(payload) {
            Some(screen) => json!({ "optimized": manager.optimize_screen(screen) }).to_string(),
            None => missing("screenName"),
        }),
        "getCurrentFPS" => Some(json!({ "fps": manager.current_fps() }).to_string()),
        "getMemoryInfo" => {
            let reply = MemoryInfoReply::from(manager.context().memory_info());
            Some(json!(reply).to_string())
        }
        "getQualityMode" => {
            let state = manager.controller_state();
            Some(
                json!({
                    "mode": state.mode,
                    "consecutiveGoodSamples": state.consecutive_good_samples,
                    "pressureLevel": manager.pressure_level(),
                })
                .to_string(),
            )
        }
        "getScreenProfile" => Some(match screen_name(payload) {
            Some(screen) => json!(manager.registry().get(screen)).to_string(),
            None => missing("screenName"),
        }),
        "setScreenOptimization" => Some(set_screen_optimization(manager, payload)),
        "getCacheStats" => Some(json!(manager.context().cache().stats()).to_string()),
        "pushMemorySignal" => Some(push_memory_signal(manager, payload)),
        _ => None,
    }
}

fn screen_name(payload: &serde_json::Value) -> Option<&str> {
    payload.get("screenName").and_then(|v| v.as_str())
}

fn missing(key: &str) -> String {
    json!({ "error": format!("missing {}", key) }).to_string()
}

fn set_screen_optimization<H: HostSurface>(
    manager: &mut PerformanceManager<H>,
    payload: &serde_json::Value,
) -> String {
    let screen = match screen_name(payload) {
        Some(screen) => screen,
        None => return missing("screenName"),
    };

    let flag = |key: &str| payload.get(key).and_then(|v| v.as_bool());
    let scroll = flag("scrollOptimization");
    let image_cache = flag("imageCache");
    let hardware = flag("hardwareAcceleration");

    let profile = manager.update_screen(screen, |p| {
        if let Some(enabled) = scroll {
            p.scroll_optimization_enabled = enabled;
        }
        if let Some(enabled) = image_cache {
            p.image_cache_enabled = enabled;
        }
        if let Some(enabled) = hardware {
            p.hardware_acceleration_enabled = enabled;
        }
    });
    json!(profile).to_string()
}

fn push_memory_signal<H: HostSurface>(
    manager: &mut PerformanceManager<H>,
    payload: &serde_json::Value,
) -> String {
    let signal = payload
        .get("signal")
        .cloned()
        .map(serde_json::from_value::<HostMemorySignal>);

    match signal {
        Some(Ok(signal)) => {
            json!({ "accepted": manager.context().push_pressure(signal) }).to_string()
        }
        Some(Err(e)) => json!({ "error": format!("unknown signal: {}", e) }).to_string(),
        None => missing("signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PerfConfig;
    use crate::monitor::memory::MemoryPressureMonitor;
    use crate::platform::{HeadlessHost, StaticMemorySource, DEFAULT_SCREENS};
    use crate::quality::{QualityMode, TransitionReason};
    use bytes::Bytes;
    use std::sync::Arc;

    fn manager() -> (PerformanceManager<HeadlessHost>, MemoryPressureMonitor) {
        let source = Arc::new(StaticMemorySource::with_fraction(2048, 0.5));
        PerformanceManager::with_external_polling(
            PerfConfig::default(),
            source,
            HeadlessHost::with_screens(DEFAULT_SCREENS, 1),
        )
    }

    fn call(
        manager: &mut PerformanceManager<HeadlessHost>,
        method: &str,
        payload: serde_json::Value,
    ) -> serde_json::Value {
        let reply = handle_method(manager, method, &payload).unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[test]
    fn test_unknown_method_not_implemented() {
        let (mut manager, _) = manager();
        assert!(handle_method(&mut manager, "enableTurbo", &json!({})).is_none());
    }

    #[test]
    fn test_optimize_screen() {
        let (mut manager, _) = manager();
        let reply = call(&mut manager, "optimizeScreen", json!({"screenName": "HomeScreen"}));
        assert_eq!(reply["optimized"], true);

        let reply = call(&mut manager, "optimizeScreen", json!({"screenName": "Nope"}));
        assert_eq!(reply["optimized"], false);

        let reply = call(&mut manager, "optimizeScreen", json!({}));
        assert!(reply["error"].is_string());
    }

    #[test]
    fn test_fps_before_first_estimate() {
        let (mut manager, _) = manager();
        let reply = call(&mut manager, "getCurrentFPS", json!(null));
        assert_eq!(reply["fps"], 0.0);
    }

    #[test]
    fn test_memory_info() {
        let (mut manager, _) = manager();
        let reply = call(&mut manager, "getMemoryInfo", json!(null));
        assert_eq!(reply["totalBytes"], 2048);
        assert_eq!(reply["availableBytes"], 1024);
        assert_eq!(reply["freeBytes"], 1024);
    }

    #[test]
    fn test_quality_mode_and_profiles() {
        let (mut manager, _) = manager();
        let reply = call(&mut manager, "getQualityMode", json!(null));
        assert_eq!(reply["mode"], "High");
        assert_eq!(reply["pressureLevel"], "Normal");

        let reply = call(&mut manager, "getScreenProfile", json!({"screenName": "ReaderScreen"}));
        assert_eq!(reply["imageCacheEnabled"], true);
        assert_eq!(reply["qualityMode"], "High");
    }

    #[test]
    fn test_set_screen_optimization_is_partial() {
        let (mut manager, _) = manager();
        let reply = call(
            &mut manager,
            "setScreenOptimization",
            json!({"screenName": "ReaderScreen", "imageCache": false}),
        );
        assert_eq!(reply["imageCacheEnabled"], false);
        assert_eq!(reply["scrollOptimizationEnabled"], true);
        assert_eq!(
            manager.host().screen("ReaderScreen").unwrap().image_cache_enabled,
            Some(false)
        );
    }

    #[test]
    fn test_cache_stats() {
        let (mut manager, _) = manager();
        manager
            .context()
            .cache()
            .put("cover", Bytes::from_static(b"abc"), 3)
            .unwrap();
        let reply = call(&mut manager, "getCacheStats", json!(null));
        assert_eq!(reply["entries"], 1);
        assert_eq!(reply["usedBytes"], 3);
    }

    #[test]
    fn test_push_signal_without_worker() {
        let (mut manager, _) = manager();
        let reply = call(&mut manager, "pushMemorySignal", json!({"signal": "RunningLow"}));
        assert_eq!(reply["accepted"], false);

        let reply = call(&mut manager, "pushMemorySignal", json!({"signal": "Sideways"}));
        assert!(reply["error"].is_string());
    }

    #[test]
    fn test_event_json_shape() {
        let event = HostEvent::QualityChanged(ModeChange {
            from: QualityMode::High,
            to: QualityMode::Medium,
            reason: TransitionReason::MemoryPressure,
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["event"], "onQualityChanged");
        assert_eq!(json["payload"]["to"], "Medium");

        let json: serde_json::Value =
            serde_json::from_str(&HostEvent::FpsUpdate { fps: 58.5 }.to_json()).unwrap();
        assert_eq!(json["event"], "onFpsUpdate");
        assert_eq!(json["payload"]["fps"], 58.5);
    }
}
