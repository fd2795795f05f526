//! # Interaction Tracker
//!
//! Records discrete listener behaviour (volume changes, pauses, skips and
//! completions) and derives a rolling [`MetricsSnapshot`] from the full
//! history. The snapshot, together with the local hour and day, forms the
//! [`ListeningContext`] handed to the selection engine.
//!
//! ## Metrics
//!
//! - **Volume change frequency**: events per minute since the tracker started
//! - **Pause frequency**: events per hour
//! - **Skip rate**: skips per 10 outcomes (skips + completions)
//! - **Average listen duration**: mean completion percentage; keeps its last
//!   value while there are no completions
//! - **Interaction density**: mean of recent activity, volume activity and
//!   pause activity, in `[0, 1]`
//!
//! Every mutating call rescans the whole log. Nothing is windowed or capped,
//! so the cost of a call grows with the length of the session.

use crate::source::SharedClock;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

const MILLIS_PER_MINUTE: f64 = 60_000.0;
/// Idle minutes before recent activity starts to decay.
const ACTIVE_WINDOW_MINUTES: f64 = 5.0;
/// Idle minutes at which recent activity reaches zero.
const IDLE_CUTOFF_MINUTES: f64 = 30.0;

/// Direction of a volume change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeChange {
    pub timestamp: i64,
    /// Absolute change, `[0, 1]`.
    pub magnitude: f64,
    pub direction: VolumeDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseEvent {
    pub timestamp: i64,
    pub track_progress: f64,
    pub hour: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipEvent {
    pub timestamp: i64,
    pub track_progress: f64,
    pub track_id: String,
    pub hour: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub timestamp: i64,
    /// Fraction of the track heard, `[0, 1]`.
    pub percentage: f64,
    pub listened_seconds: f64,
}

/// Derived behaviour metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub volume_change_frequency: f64,
    pub pause_frequency: f64,
    pub skip_rate: f64,
    pub average_listen_duration: f64,
    pub interaction_density: f64,
}

/// Snapshot of time of day and behaviour passed into a selection decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListeningContext {
    pub hour: u32,
    /// `0` = Sunday.
    pub day_of_week: u32,
    pub energy: f64,
    pub flow: f64,
    pub metrics: MetricsSnapshot,
}

impl ListeningContext {
    /// Context with mid-range energy and flow at the given hour.
    #[must_use]
    pub fn neutral(hour: u32) -> Self {
        Self {
            hour,
            day_of_week: 0,
            energy: 0.5,
            flow: 0.5,
            metrics: MetricsSnapshot::default(),
        }
    }
}

/// Open start/complete bracket.
#[derive(Debug, Clone, Copy)]
struct TrackSession {
    duration: f64,
    started_at: i64,
}

/// Behaviour log and metric derivation for one listening session.
pub struct InteractionTracker {
    clock: SharedClock,
    started_at: i64,
    volume_changes: Vec<VolumeChange>,
    pauses: Vec<PauseEvent>,
    skips: Vec<SkipEvent>,
    completions: Vec<CompletionEvent>,
    last_interaction: Option<i64>,
    metrics: MetricsSnapshot,
    current: Option<TrackSession>,
}

impl std::fmt::Debug for InteractionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionTracker")
            .field("started_at", &self.started_at)
            .field("volume_changes", &self.volume_changes.len())
            .field("pauses", &self.pauses.len())
            .field("skips", &self.skips.len())
            .field("completions", &self.completions.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl InteractionTracker {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        let started_at = clock.now_millis();
        Self {
            clock,
            started_at,
            volume_changes: Vec::new(),
            pauses: Vec::new(),
            skips: Vec::new(),
            completions: Vec::new(),
            last_interaction: None,
            metrics: MetricsSnapshot::default(),
            current: None,
        }
    }

    /// Record a volume move from `from` to `to` (both on a `[0, 1]` scale).
    pub fn record_volume_change(&mut self, from: f64, to: f64) {
        let now = self.stamp();
        let direction = if to >= from {
            VolumeDirection::Up
        } else {
            VolumeDirection::Down
        };
        self.volume_changes.push(VolumeChange {
            timestamp: now,
            magnitude: (to - from).abs().clamp(0.0, 1.0),
            direction,
        });
        trace!("Volume change {from:.2} -> {to:.2}");
        self.recompute();
    }

    /// Record a pause at the given fraction of the current track.
    pub fn record_pause(&mut self, track_progress: f64) {
        let now = self.stamp();
        self.pauses.push(PauseEvent {
            timestamp: now,
            track_progress: clamp01(track_progress),
            hour: self.clock.local_hour(),
        });
        trace!("Pause at {track_progress:.2}");
        self.recompute();
    }

    /// Record a skip of `track_id` at the given fraction of the track.
    ///
    /// A skip also closes any open start/complete bracket.
    pub fn record_skip(&mut self, track_id: &str, track_progress: f64) {
        let now = self.stamp();
        self.skips.push(SkipEvent {
            timestamp: now,
            track_progress: clamp01(track_progress),
            track_id: track_id.to_string(),
            hour: self.clock.local_hour(),
        });
        self.current = None;
        debug!("Skip of `{track_id}' at {track_progress:.2}");
        self.recompute();
    }

    /// Record a completion outcome directly.
    pub fn record_completion(&mut self, percentage: f64, listened_seconds: f64) {
        let now = self.stamp();
        self.completions.push(CompletionEvent {
            timestamp: now,
            percentage: clamp01(percentage),
            listened_seconds: listened_seconds.max(0.0),
        });
        debug!("Completion at {percentage:.2} ({listened_seconds:.1}s)");
        self.recompute();
    }

    /// Open a listening bracket for a track of `duration` seconds.
    pub fn start_track(&mut self, duration: f64) {
        if duration > 0.0 {
            self.current = Some(TrackSession {
                duration,
                started_at: self.clock.now_millis(),
            });
        } else {
            debug!("Ignoring track start with non-positive duration {duration}");
            self.current = None;
        }
    }

    /// Close the open bracket, recording how much of the track was heard.
    ///
    /// Returns the recorded percentage, or `None` when no bracket was open.
    pub fn complete_track(&mut self, actual_listen_seconds: f64) -> Option<f64> {
        let session = self.current.take()?;
        let percentage = (actual_listen_seconds / session.duration).min(1.0);
        trace!(
            "Closing track bracket opened at {} after {actual_listen_seconds:.1}s",
            session.started_at
        );
        self.record_completion(percentage, actual_listen_seconds);
        Some(clamp01(percentage))
    }

    /// Whether a start/complete bracket is open.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.current.is_some()
    }

    /// Recompute metrics against the current time without recording anything.
    pub fn refresh(&mut self) {
        self.recompute();
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
    }

    /// Listener engagement in `[0, 1]`.
    #[must_use]
    pub fn energy_level(&self) -> f64 {
        let m = &self.metrics;
        clamp01(
            m.interaction_density
                - (m.skip_rate / 10.0).min(0.3)
                - (m.pause_frequency / 10.0).min(0.3),
        )
    }

    /// Listening continuity in `[0, 1]`.
    #[must_use]
    pub fn flow_state(&self) -> f64 {
        let m = &self.metrics;
        clamp01(
            m.average_listen_duration * 0.4
                + (1.0 - m.interaction_density.min(1.0)) * 0.3
                + (1.0 - (m.skip_rate / 10.0).min(1.0)) * 0.3,
        )
    }

    #[must_use]
    pub fn context(&self) -> ListeningContext {
        ListeningContext {
            hour: self.clock.local_hour(),
            day_of_week: self.clock.day_of_week(),
            energy: self.energy_level(),
            flow: self.flow_state(),
            metrics: self.metrics,
        }
    }

    /// Clear every log and restart the session clock.
    pub fn reset(&mut self) {
        self.started_at = self.clock.now_millis();
        self.volume_changes.clear();
        self.pauses.clear();
        self.skips.clear();
        self.completions.clear();
        self.last_interaction = None;
        self.metrics = MetricsSnapshot::default();
        self.current = None;
        debug!("Interaction tracker reset");
    }

    #[must_use]
    pub fn volume_changes(&self) -> &[VolumeChange] {
        &self.volume_changes
    }

    #[must_use]
    pub fn pauses(&self) -> &[PauseEvent] {
        &self.pauses
    }

    #[must_use]
    pub fn skips(&self) -> &[SkipEvent] {
        &self.skips
    }

    #[must_use]
    pub fn completions(&self) -> &[CompletionEvent] {
        &self.completions
    }

    #[must_use]
    pub fn last_interaction_time(&self) -> Option<i64> {
        self.last_interaction
    }

    fn stamp(&mut self) -> i64 {
        let now = self.clock.now_millis();
        self.last_interaction = Some(now);
        now
    }

    fn recompute(&mut self) {
        let now = self.clock.now_millis();
        self.metrics = self.compute_metrics(now);
        trace!("Metrics recomputed: {:?}", self.metrics);
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute_metrics(&self, now: i64) -> MetricsSnapshot {
        let runtime_minutes = (now - self.started_at) as f64 / MILLIS_PER_MINUTE;
        let runtime_hours = runtime_minutes / 60.0;

        let volume_change_frequency = if runtime_minutes > 0.0 {
            self.volume_changes.len() as f64 / runtime_minutes
        } else {
            0.0
        };
        let pause_frequency = if runtime_hours > 0.0 {
            self.pauses.len() as f64 / runtime_hours
        } else {
            0.0
        };

        let outcomes = self.skips.len() + self.completions.len();
        let skip_rate = match outcomes {
            0 => 0.0,
            n => self.skips.len() as f64 / n as f64 * 10.0,
        };

        let average_listen_duration = if self.completions.is_empty() {
            self.metrics.average_listen_duration
        } else {
            self.completions.iter().map(|c| c.percentage).sum::<f64>()
                / self.completions.len() as f64
        };

        let volume_activity = (volume_change_frequency / 2.0).min(1.0);
        let pause_activity = (pause_frequency / 3.0).min(1.0);
        let interaction_density =
            (self.recent_activity(now) + volume_activity + pause_activity) / 3.0;

        MetricsSnapshot {
            volume_change_frequency,
            pause_frequency,
            skip_rate,
            average_listen_duration,
            interaction_density,
        }
    }

    /// `1` while the listener was active in the last five minutes, falling
    /// linearly to `0` at thirty idle minutes.
    #[allow(clippy::cast_precision_loss)]
    fn recent_activity(&self, now: i64) -> f64 {
        let Some(last) = self.last_interaction else {
            return 0.0;
        };
        let idle_minutes = (now - last) as f64 / MILLIS_PER_MINUTE;
        if idle_minutes < ACTIVE_WINDOW_MINUTES {
            1.0
        } else {
            let span = IDLE_CUTOFF_MINUTES - ACTIVE_WINDOW_MINUTES;
            (1.0 - (idle_minutes - ACTIVE_WINDOW_MINUTES) / span).max(0.0)
        }
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
