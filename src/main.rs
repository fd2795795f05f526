//! # Fieldplay
//!
//! Command-line driver for the fieldplay playback core.
//!
//! ## Usage
//!
//! ```bash
//! # Watch the field learn over an hour of simulated listening
//! fieldplay simulate --steps 720
//!
//! # Inspect the field for a tired late-night listener
//! fieldplay distribution --hour 23 --energy 0.2 --flow 0.8
//!
//! # Show the configuration in effect
//! fieldplay config
//! ```

mod cli;
mod completion;

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use clap::{CommandFactory, Parser};
use fieldplay::config::{self, AppConfig};
use fieldplay::simulation::{self, SimulationOptions, SimulationReport};
use fieldplay::track::Playlist;
use fieldplay::tracker::{ListeningContext, MetricsSnapshot};
use log::{debug, info};

/// Main entry point for the fieldplay application.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug fieldplay simulate` - Enable debug logging
/// - `RUST_LOG=fieldplay::engine=trace fieldplay simulate` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let app_config = match &args.config {
        Some(path) if path.exists() => AppConfig::load_from(path)?,
        Some(path) => {
            info!("No config file at {}, using defaults", path.display());
            AppConfig::default()
        }
        None => AppConfig::load(),
    };
    debug!("Effective configuration: {app_config:?}");

    match args.command {
        cli::Command::Simulate {
            source,
            steps,
            step_seconds,
            seed,
            skip_chance,
            start_hour,
            shuffle,
            no_repeat,
            deterministic,
            json,
        } => {
            let playlist = load_playlist(&source)?;
            let start_time = NaiveTime::from_hms_opt(start_hour, 0, 0)
                .with_context(|| format!("Invalid start hour {start_hour}"))?;
            let start = Local::now().date_naive().and_time(start_time);
            let options = SimulationOptions {
                playlist,
                steps,
                step_seconds,
                seed,
                skip_chance: skip_chance.clamp(0.0, 1.0),
                shuffle,
                repeat: !no_repeat,
                probability_mode: !deterministic,
                start,
                ..SimulationOptions::default()
            };
            let report = simulation::simulate(&options, &app_config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        cli::Command::Distribution {
            source,
            hour,
            energy,
            flow,
            seed,
            json,
        } => {
            let playlist = load_playlist(&source)?;
            let context = ListeningContext {
                hour,
                day_of_week: 0,
                energy: energy.clamp(0.0, 1.0),
                flow: flow.clamp(0.0, 1.0),
                metrics: MetricsSnapshot::default(),
            };
            let field = simulation::distribution(&playlist, &context, &app_config, seed);
            if json {
                println!("{}", serde_json::to_string_pretty(&field)?);
            } else {
                println!(
                    "Probability field at {hour:02}:00 (energy {:.2}, flow {:.2})",
                    context.energy, context.flow
                );
                for (id, probability) in &field {
                    println!("  {id:<24} {probability:>8.4}  {}", bar(*probability));
                }
            }
        }
        cli::Command::Config { init } => {
            let path = match &args.config {
                Some(path) => path.clone(),
                None => config::config_path()?,
            };
            if init {
                app_config.save_to(&path)?;
                println!("Wrote configuration to {}", path.display());
            } else {
                println!("# {}", path.display());
                println!("{}", app_config.to_json()?);
            }
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            let gen = completion::shell_to_completion_shell(shell);
            completion::generate_completions(gen, &mut cmd);
        }
    }

    Ok(())
}

fn load_playlist(source: &cli::PlaylistArgs) -> Result<Playlist> {
    match &source.playlist {
        Some(path) => {
            info!("Loading playlist from {}", path.display());
            Playlist::from_json_file(path)
                .with_context(|| format!("Could not use playlist {}", path.display()))
        }
        None => Ok(Playlist::demo(source.tracks.max(1))),
    }
}

fn print_report(report: &SimulationReport) {
    println!("Simulated `{}' for {} steps", report.playlist, report.steps_run);
    println!(
        "  tracks started {}, completed {}, skipped {}, pauses {}, volume changes {}",
        report.tracks_started,
        report.completions,
        report.skips,
        report.pauses,
        report.volume_changes
    );
    println!(
        "  energy {:.3}, flow {:.3}, skip rate {:.2}/10, density {:.3}",
        report.energy, report.flow, report.metrics.skip_rate, report.metrics.interaction_density
    );
    println!(
        "  runtime clock {:.1}s (scale {:.2}), state {:?}",
        report.clock.internal_time / 1000.0,
        report.clock.time_scale,
        report.final_state
    );
    if let Some(reason) = &report.stop_reason {
        println!("  stopped: {reason}");
    }

    println!();
    println!("  {:<24} {:>6} {:>8} {:>8}", "track", "plays", "weight", "p(next)");
    for (id, weight) in &report.weights {
        let plays = report.play_counts.get(id).copied().unwrap_or(0);
        let probability = report.distribution.get(id).copied().unwrap_or(0.0);
        println!("  {id:<24} {plays:>6} {weight:>8.3} {probability:>8.4}");
    }
    println!();
    println!("  recent: {}", report.recent_selections.join(", "));
}

fn bar(probability: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let width = (probability * 200.0).round().clamp(0.0, 60.0) as usize;
    "#".repeat(width)
}
