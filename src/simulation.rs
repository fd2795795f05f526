//! # Listening Simulation
//!
//! Runs a [`ListeningSession`] over a [`SimulatedTransport`] on a
//! [`ManualClock`], with a seeded synthetic listener who now and then skips,
//! pauses or nudges the volume. Identical options give identical reports.
//!
//! Each step is played out in slices of `clock.tick_interval_ms`, with one
//! runtime clock tick per slice.

use crate::clock::ClockState;
use crate::config::AppConfig;
use crate::engine::ProbabilityEngine;
use crate::session::{ListeningSession, PlaybackState, SessionEvent};
use crate::source::{seeded_source, ManualClock};
use crate::track::Playlist;
use crate::tracker::{ListeningContext, MetricsSnapshot};
use crate::transport::SimulatedTransport;
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

/// Parameters of one simulated session.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub playlist: Playlist,
    /// Number of simulated steps.
    pub steps: usize,
    /// Seconds of playback per step.
    pub step_seconds: f64,
    pub seed: u64,
    /// Chance per step that the listener skips the current track.
    pub skip_chance: f64,
    /// Chance per step that the listener pauses for one step.
    pub pause_chance: f64,
    /// Chance per step that the listener moves the volume.
    pub volume_chance: f64,
    pub shuffle: bool,
    pub repeat: bool,
    pub probability_mode: bool,
    /// Local wall-clock time at which the session starts.
    pub start: NaiveDateTime,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2026, 1, 9)
            .and_then(|day| day.and_hms_opt(19, 0, 0))
            .unwrap_or_default();
        Self {
            playlist: Playlist::demo(12),
            steps: 720,
            step_seconds: 5.0,
            seed: 42,
            skip_chance: 0.02,
            pause_chance: 0.005,
            volume_chance: 0.01,
            shuffle: false,
            repeat: true,
            probability_mode: true,
            start,
        }
    }
}

/// Outcome of a simulated session.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub playlist: String,
    pub steps_run: usize,
    /// Runtime clock ticks driven over the whole run.
    pub clock_ticks: usize,
    pub tracks_started: usize,
    pub skips: usize,
    pub completions: usize,
    pub pauses: usize,
    pub volume_changes: usize,
    pub play_counts: BTreeMap<String, usize>,
    pub weights: BTreeMap<String, f64>,
    pub distribution: BTreeMap<String, f64>,
    pub recent_selections: Vec<String>,
    pub metrics: MetricsSnapshot,
    pub energy: f64,
    pub flow: f64,
    pub clock: ClockState,
    pub final_state: PlaybackState,
    pub stop_reason: Option<String>,
}

/// Run a session with the given options.
///
/// # Errors
///
/// Fails when the playlist is empty or the session hits a transport error.
pub fn simulate(options: &SimulationOptions, config: &AppConfig) -> Result<SimulationReport> {
    if options.playlist.is_empty() {
        bail!("playlist `{}' has no tracks", options.playlist.name);
    }

    let mut config = *config;
    config.session.shuffle = options.shuffle;
    config.session.repeat = options.repeat;
    config.session.probability_mode = options.probability_mode;

    let wall = ManualClock::new(options.start);
    let mut session = ListeningSession::with_sources(
        SimulatedTransport::for_playlist(&options.playlist),
        &config,
        wall.shared(),
        seeded_source(options.seed),
    );
    // The listener gets its own stream so its choices do not shift the engine's draws.
    let mut listener = StdRng::seed_from_u64(options.seed.wrapping_add(0x9e37_79b9));
    session.set_playlist(&options.playlist);
    let events = session.subscribe();

    info!(
        "Simulating {} steps of {}s over `{}'",
        options.steps, options.step_seconds, options.playlist.name
    );
    session.start().context("Simulation could not start")?;

    #[allow(clippy::cast_possible_truncation)]
    let step_ms = (options.step_seconds * 1000.0).round() as i64;
    let interval_ms = i64::try_from(config.clock.tick_interval_ms)
        .unwrap_or(i64::MAX)
        .max(1);
    let mut steps_run = 0;
    let mut clock_ticks = 0;
    let mut paused_for_step = false;
    for step in 0..options.steps {
        if session.state() == PlaybackState::Stopped {
            debug!("Session stopped after {step} steps");
            break;
        }
        steps_run += 1;
        clock_ticks += play_out_step(&mut session, &wall, step_ms, interval_ms);

        if paused_for_step {
            session.resume()?;
            paused_for_step = false;
            continue;
        }
        if listener.gen::<f64>() < options.volume_chance {
            session.set_volume(listener.gen_range(0.2..1.0));
        }
        if listener.gen::<f64>() < options.skip_chance {
            session.skip().with_context(|| format!("Skip failed at step {step}"))?;
            continue;
        }
        if listener.gen::<f64>() < options.pause_chance {
            session.pause();
            paused_for_step = true;
            continue;
        }

        for event in session.transport_mut().advance(options.step_seconds) {
            session
                .handle(event)
                .with_context(|| format!("Playback failed at step {step}"))?;
        }
    }

    let mut play_counts = BTreeMap::new();
    let mut stop_reason = None;
    for event in events.try_iter() {
        match event {
            SessionEvent::TrackChanged { track_id, .. } => {
                *play_counts.entry(track_id).or_insert(0) += 1;
            }
            SessionEvent::Stopped { reason } => stop_reason = Some(reason),
            SessionEvent::StateChanged { .. } | SessionEvent::VolumeChanged { .. } => {}
        }
    }

    let engine = session.queue().engine();
    let tracker = session.tracker();
    let snapshot = session.snapshot();
    Ok(SimulationReport {
        playlist: options.playlist.name.clone(),
        steps_run,
        clock_ticks,
        tracks_started: play_counts.values().sum(),
        skips: tracker.skips().len(),
        completions: tracker.completions().len(),
        pauses: tracker.pauses().len(),
        volume_changes: tracker.volume_changes().len(),
        play_counts,
        weights: engine.track_weights().into_iter().collect(),
        distribution: engine.probability_distribution().into_iter().collect(),
        recent_selections: engine.recent_selections(),
        metrics: snapshot.metrics,
        energy: snapshot.energy,
        flow: snapshot.flow,
        clock: snapshot.clock,
        final_state: snapshot.state,
        stop_reason,
    })
}

/// Move the wall clock through one step, ticking every `interval_ms`.
/// Returns the number of ticks.
fn play_out_step(
    session: &mut ListeningSession<SimulatedTransport>,
    wall: &ManualClock,
    step_ms: i64,
    interval_ms: i64,
) -> usize {
    let mut remaining = step_ms.max(0);
    let mut ticks = 0;
    loop {
        let slice = remaining.min(interval_ms);
        wall.advance_millis(slice);
        session.tick();
        ticks += 1;
        remaining -= slice;
        if remaining == 0 {
            return ticks;
        }
    }
}

/// One probability field over `playlist` for the given context, in playlist order.
#[must_use]
pub fn distribution(
    playlist: &Playlist,
    context: &ListeningContext,
    config: &AppConfig,
    seed: u64,
) -> Vec<(String, f64)> {
    let mut engine = ProbabilityEngine::with_config(config.engine, seeded_source(seed));
    engine.initialize_tracks(&playlist.tracks);
    let probabilities = engine.calculate_probabilities(&playlist.tracks, context);
    playlist
        .tracks
        .iter()
        .map(|track| track.id.clone())
        .zip(probabilities)
        .collect()
}
