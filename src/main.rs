//! renderpace - adaptive frame-rate and memory-pressure controller
//!
//! Diagnostic CLI: inspect live memory pressure, replay FPS traces through
//! the quality controller, or run the full manager against a simulated
//! vsync source.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use renderpace::cache::BoundedImageCache;
use renderpace::core::config::PerfConfig;
use renderpace::core::context::PerformanceManager;
use renderpace::monitor::memory::{classify, classify_fraction};
use renderpace::platform::{default_memory_source, HeadlessHost, DEFAULT_SCREENS};
use renderpace::quality::{QualityController, QualitySignals, ScreenProfileRegistry};

#[derive(Parser)]
#[command(name = "renderpace")]
#[command(about = "Adaptive frame-rate and memory-pressure controller", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current memory status and pressure level
    Status,

    /// Replay an FPS trace through the quality controller
    Simulate {
        /// Comma-separated FPS samples, e.g. 30,30,30,60,60,60
        #[arg(long, value_delimiter = ',', required = true)]
        fps: Vec<f64>,

        /// Available memory fraction to pair with every sample
        #[arg(long, default_value = "0.5")]
        available: f64,
    },

    /// Run the manager against a simulated vsync source
    Run {
        /// Stop after this many seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Display refresh rate
        #[arg(long, default_value = "60", value_parser = clap::value_parser!(u32).range(1..=1000))]
        refresh_hz: u32,

        /// Simulated render cost per frame; above the refresh period this
        /// drops the frame rate
        #[arg(long, default_value = "0")]
        frame_cost_ms: u64,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(short, long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(PerfConfig::default_path);
    let config = match &cli.config {
        Some(path) => PerfConfig::load(path)?,
        None => PerfConfig::load_or_default(&config_path)?,
    };
    config.validate()?;

    match cli.command {
        Commands::Status => {
            let source = default_memory_source();
            let stats = source.read_stats()?;
            let level = classify(&stats, &config.memory_pressure_thresholds);

            println!("Memory Status ({}):", source.name());
            println!("  Total:     {:.0} MB", stats.total_mb());
            println!("  Available: {:.0} MB", stats.available_mb());
            println!("  Free:      {:.0} MB", stats.free_bytes as f64 / (1024.0 * 1024.0));
            if let Some(fraction) = stats.available_fraction() {
                println!("  Avail %:   {:.1}%", fraction * 100.0);
            }
            println!("  Pressure:  {}", level);
        }

        Commands::Simulate { fps, available } => {
            let pressure = classify_fraction(available, &config.memory_pressure_thresholds);
            let cache = Arc::new(BoundedImageCache::new(config.cache_capacity_bytes()));
            let mut controller = QualityController::new(&config, Arc::clone(&cache));
            let mut registry = ScreenProfileRegistry::new();
            for screen in DEFAULT_SCREENS {
                registry.get_or_create(screen);
            }

            println!(
                "Replaying {} samples at {} pressure (threshold {} fps, upgrade at {:.1})",
                fps.len(),
                pressure,
                config.fps_threshold,
                config.fps_upgrade_threshold()
            );
            println!(
                "{:>4}  {:>7}  {:>7}  {:>6}  {:>12}",
                "#", "fps", "mode", "streak", "cache bytes"
            );

            for (i, sample) in fps.iter().enumerate() {
                let signals = QualitySignals {
                    fps: Some(*sample),
                    pressure,
                };
                let change = controller.evaluate(signals, &mut registry);
                let state = controller.state();
                print!(
                    "{:>4}  {:>7.1}  {:>7}  {:>6}  {:>12}",
                    i + 1,
                    sample,
                    state.mode.to_string(),
                    state.consecutive_good_samples,
                    cache.capacity_bytes()
                );
                match change {
                    Some(change) => {
                        println!("  {} -> {} ({})", change.from, change.to, change.reason)
                    }
                    None => println!(),
                }
            }
        }

        Commands::Run {
            seconds,
            refresh_hz,
            frame_cost_ms,
        } => {
            let period = frame_period(refresh_hz, frame_cost_ms);
            info!(
                "Running for {}s, frame period {:?} ({} Hz display)",
                seconds, period, refresh_hz
            );

            let wake = Arc::new(Notify::new());
            let mut manager = PerformanceManager::start(
                config,
                default_memory_source(),
                HeadlessHost::with_screens(DEFAULT_SCREENS, 2),
                wake.clone(),
            );
            let mut events = manager.context().subscribe();
            for screen in DEFAULT_SCREENS {
                manager.optimize_screen(screen);
            }

            let started = Instant::now();
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(deadline, ctrl_c);
            let mut vsync = tokio::time::interval(period);
            vsync.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("Interrupted");
                        break;
                    }
                    _ = &mut deadline => break,
                    _ = wake.notified() => {
                        manager.pump();
                    }
                    _ = vsync.tick() => {
                        let now = started.elapsed().as_nanos() as u64;
                        if !manager.on_frame(now).is_continue() {
                            warn!("Frame loop stopped");
                            break;
                        }
                    }
                }

                while let Ok(event) = events.try_recv() {
                    println!("{}", event.to_json());
                }
            }

            let stats = manager.context().cache().stats();
            manager.shutdown();
            println!(
                "Final: {} quality, {:.1} fps, cache {}/{} bytes",
                manager.quality_mode(),
                manager.current_fps(),
                stats.used_bytes,
                stats.capacity_bytes
            );
        }

        Commands::Config { write } => {
            if write {
                config.save(&config_path)?;
                println!("Wrote {}", config_path.display());
            } else {
                println!("# {}", config_path.display());
                print!("{}", config.to_toml()?);
            }
        }
    }

    Ok(())
}

/// Vsync period for the simulated display. Never zero, which
/// `tokio::time::interval` rejects.
fn frame_period(refresh_hz: u32, frame_cost_ms: u64) -> Duration {
    let refresh = Duration::from_secs(1) / refresh_hz.max(1);
    refresh
        .max(Duration::from_millis(frame_cost_ms))
        .max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_period_is_never_zero() {
        assert_eq!(frame_period(u32::MAX, 0), Duration::from_millis(1));
        assert_eq!(frame_period(0, 0), Duration::from_secs(1));
        assert_eq!(frame_period(60, 0), Duration::from_secs(1) / 60);
        assert_eq!(frame_period(60, 40), Duration::from_millis(40));
    }

    #[test]
    fn test_refresh_rate_range() {
        assert!(Cli::try_parse_from(["renderpace", "run", "--refresh-hz", "0"]).is_err());
        assert!(Cli::try_parse_from(["renderpace", "run", "--refresh-hz", "4294967295"]).is_err());
        assert!(Cli::try_parse_from(["renderpace", "run", "--refresh-hz", "120"]).is_ok());
    }
}
