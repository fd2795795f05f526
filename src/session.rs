//! # Listening Session
//!
//! Wires the queue, the interaction tracker and the runtime clock to a
//! [`Transport`]. The session reacts to transport events, turns listener
//! actions into tracker records and engine feedback, and publishes what
//! happened as [`SessionEvent`]s to any number of channel subscribers.
//!
//! ## Event Flow
//!
//! - `Ended` closes the tracker bracket, rewards the finished track and advances
//! - `TimeUpdate` moves the recorded playback position
//! - `Error` stops playback and is returned to the caller; nothing is retried
//!
//! Nothing in the selection core pushes notifications; every event
//! originates here.

use crate::clock::{ClockState, RuntimeClock};
use crate::config::AppConfig;
use crate::engine::{ProbabilityEngine, TrackFeedback};
use crate::queue::QueueManager;
use crate::source::{entropy_source, RandomSource, SharedClock};
use crate::track::{Playlist, Track};
use crate::tracker::{InteractionTracker, MetricsSnapshot};
use crate::transport::{Transport, TransportEvent};
use anyhow::{bail, Context, Result};
use log::{debug, info, log, Level};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

/// Session defaults loaded from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub initial_volume: f64,
    pub probability_mode: bool,
    pub shuffle: bool,
    pub repeat: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_volume: 0.8,
            probability_mode: true,
            shuffle: false,
            repeat: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
}

/// Notifications published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    TrackChanged { track_id: String, title: String },
    StateChanged { state: PlaybackState },
    VolumeChanged { volume: f64 },
    Stopped { reason: String },
}

/// Why playback stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StopCause {
    EndOfQueue,
    Failure(String),
}

impl StopCause {
    fn level(&self) -> Level {
        match self {
            Self::EndOfQueue => Level::Info,
            Self::Failure(_) => Level::Warn,
        }
    }

    fn into_reason(self) -> String {
        match self {
            Self::EndOfQueue => "end of queue".to_string(),
            Self::Failure(message) => message,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub current_track: Option<String>,
    pub state: PlaybackState,
    pub position: f64,
    pub volume: f64,
    pub clock: ClockState,
    pub metrics: MetricsSnapshot,
    pub energy: f64,
    pub flow: f64,
}

pub struct ListeningSession<T: Transport> {
    transport: T,
    queue: QueueManager,
    tracker: InteractionTracker,
    clock: RuntimeClock,
    state: PlaybackState,
    volume: f64,
    position: f64,
    // Feedback gathered for the track currently playing.
    pending: TrackFeedback,
    subscribers: Vec<mpsc::Sender<SessionEvent>>,
}

impl<T: Transport> std::fmt::Debug for ListeningSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListeningSession")
            .field("state", &self.state)
            .field("volume", &self.volume)
            .field("position", &self.position)
            .field("queue", &self.queue)
            .field("clock", &self.clock)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ListeningSession<T> {
    /// Session with an entropy-seeded random source.
    #[must_use]
    pub fn new(transport: T, config: &AppConfig, clock: SharedClock) -> Self {
        Self::with_sources(transport, config, clock, entropy_source())
    }

    #[must_use]
    pub fn with_sources(
        mut transport: T,
        config: &AppConfig,
        clock: SharedClock,
        rng: RandomSource,
    ) -> Self {
        let mut queue = QueueManager::new(ProbabilityEngine::with_config(config.engine, rng));
        queue.set_shuffle(config.session.shuffle);
        queue.set_repeat(config.session.repeat);
        queue.set_probability_mode(config.session.probability_mode);

        let volume = config.session.initial_volume.clamp(0.0, 1.0);
        transport.set_volume(volume);

        Self {
            transport,
            queue,
            tracker: InteractionTracker::new(clock.clone()),
            clock: RuntimeClock::with_config(clock, &config.clock),
            state: PlaybackState::Idle,
            volume,
            position: 0.0,
            pending: TrackFeedback::default(),
            subscribers: Vec::new(),
        }
    }

    pub fn set_playlist(&mut self, playlist: &Playlist) {
        self.queue.set_playlist(playlist);
        info!("Session playlist `{}' ({} tracks)", playlist.name, playlist.len());
    }

    /// Pick the first track and start playing it.
    ///
    /// # Errors
    ///
    /// Fails when the queue has nothing to offer or the transport cannot
    /// load or play the chosen track.
    pub fn start(&mut self) -> Result<()> {
        let context = self.tracker.context();
        let Some(track) = self.queue.next(Some(&context)).cloned() else {
            bail!("no track available to play");
        };
        self.play_track(&track)
    }

    /// React to a transport notification.
    ///
    /// # Errors
    ///
    /// Returns the transport's error for [`TransportEvent::Error`], and any
    /// failure loading the next track after [`TransportEvent::Ended`].
    pub fn handle(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Ended => {
                self.finish_current();
                self.advance()
            }
            TransportEvent::TimeUpdate(position) => {
                self.position = position.max(0.0);
                Ok(())
            }
            TransportEvent::Error(message) => {
                self.halt(StopCause::Failure(message.clone()));
                bail!("transport error: {message}");
            }
            TransportEvent::Play => {
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            TransportEvent::Pause => {
                self.set_state(PlaybackState::Paused);
                Ok(())
            }
            TransportEvent::Loading => {
                self.set_state(PlaybackState::Loading);
                Ok(())
            }
        }
    }

    /// Skip the current track and move on.
    ///
    /// # Errors
    ///
    /// Fails when nothing is playing or the next track cannot be loaded.
    pub fn skip(&mut self) -> Result<()> {
        let Some(track) = self.queue.current_track().cloned() else {
            bail!("nothing to skip");
        };
        self.tracker.record_skip(&track.id, self.progress());
        self.pending.skipped = true;
        let weight = self.queue.update_track_feedback(&track.id, &self.pending);
        debug!("Skipped `{}', weight now {weight:.3}", track.id);
        self.advance()
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.transport.pause();
        self.tracker.record_pause(self.progress());
        self.pending.paused = true;
        self.clock.pause();
        self.set_state(PlaybackState::Paused);
    }

    /// # Errors
    ///
    /// Fails when the transport refuses to play.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            return Ok(());
        }
        self.transport.play().context("Failed to resume playback")?;
        self.clock.resume();
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Set output volume, clamped to `[0, 1]`.
    pub fn set_volume(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        if (volume - self.volume).abs() < f64::EPSILON {
            return;
        }
        self.tracker.record_volume_change(self.volume, volume);
        self.pending.volume_changes += 1;
        self.transport.set_volume(volume);
        self.volume = volume;
        self.publish(&SessionEvent::VolumeChanged { volume });
    }

    /// Advance the runtime clock and let the tracker's metrics decay.
    ///
    /// Returns the number of clock events fired.
    pub fn tick(&mut self) -> usize {
        let fired = self.clock.tick();
        self.tracker.refresh();
        fired
    }

    /// Receive every event published from now on.
    pub fn subscribe(&mut self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_track: self.queue.current_track().map(|t| t.id.clone()),
            state: self.state,
            position: self.position,
            volume: self.volume,
            clock: self.clock.state(),
            metrics: self.tracker.metrics(),
            energy: self.tracker.energy_level(),
            flow: self.tracker.flow_state(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current_track()
    }

    #[must_use]
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut QueueManager {
        &mut self.queue
    }

    #[must_use]
    pub fn tracker(&self) -> &InteractionTracker {
        &self.tracker
    }

    #[must_use]
    pub fn runtime_clock(&self) -> &RuntimeClock {
        &self.clock
    }

    pub fn runtime_clock_mut(&mut self) -> &mut RuntimeClock {
        &mut self.clock
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn play_track(&mut self, track: &Track) -> Result<()> {
        self.set_state(PlaybackState::Loading);
        let loaded = self
            .transport
            .load(&track.url)
            .and_then(|()| self.transport.play());
        if let Err(e) = loaded {
            self.halt(StopCause::Failure(format!("{e:#}")));
            return Err(e).with_context(|| format!("Failed to play `{}'", track.id));
        }

        self.position = 0.0;
        self.pending = TrackFeedback::default();
        if self.clock.is_paused() {
            self.clock.resume();
        }
        self.tracker.start_track(track.duration);
        info!("Now playing `{}' ({})", track.title, track.id);
        self.publish(&SessionEvent::TrackChanged {
            track_id: track.id.clone(),
            title: track.title.clone(),
        });
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        let context = self.tracker.context();
        match self.queue.next(Some(&context)).cloned() {
            Some(track) => self.play_track(&track),
            None => {
                self.halt(StopCause::EndOfQueue);
                Ok(())
            }
        }
    }

    /// Reward the track that just ended with how much of it was heard.
    fn finish_current(&mut self) {
        let Some(id) = self.queue.current_track().map(|t| t.id.clone()) else {
            return;
        };
        let listened = if self.position > 0.0 {
            self.position
        } else {
            self.transport.duration()
        };
        if let Some(percentage) = self.tracker.complete_track(listened) {
            self.pending.listen_percentage = Some(percentage);
        }
        let weight = self.queue.update_track_feedback(&id, &self.pending);
        debug!("Finished `{id}', weight now {weight:.3}");
    }

    fn halt(&mut self, cause: StopCause) {
        self.transport.stop();
        let level = cause.level();
        let reason = cause.into_reason();
        log!(level, "Playback stopped: {reason}");
        self.set_state(PlaybackState::Stopped);
        self.publish(&SessionEvent::Stopped { reason });
    }

    fn progress(&self) -> f64 {
        let duration = self.transport.duration();
        if duration > 0.0 {
            (self.position / duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            self.state = state;
            self.publish(&SessionEvent::StateChanged { state });
        }
    }

    fn publish(&mut self, event: &SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
