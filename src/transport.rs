//! Audio transport boundary.
//!
//! Decoding and output live behind [`Transport`]. The session drives it and
//! reacts to the [`TransportEvent`]s it reports. [`SimulatedTransport`] keeps
//! a position counter in memory and is what the CLI and the tests run on.

use crate::track::Playlist;
use anyhow::{bail, Result};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

/// Notifications a transport reports back to its driver.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Play,
    Pause,
    Ended,
    /// Playback position in seconds.
    TimeUpdate(f64),
    Error(String),
    Loading,
}

/// Audio output driven by a listening session.
pub trait Transport {
    /// Prepare `url` for playback, replacing whatever was loaded.
    fn load(&mut self, url: &str) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn stop(&mut self);

    /// Move to `position` seconds into the loaded track.
    fn seek(&mut self, position: f64) -> Result<()>;

    /// Output volume in `[0, 1]`.
    fn set_volume(&mut self, volume: f64);

    fn volume(&self) -> f64;

    /// Position in seconds.
    fn position(&self) -> f64;

    /// Length of the loaded track in seconds, zero when nothing is loaded.
    fn duration(&self) -> f64;
}

/// In-memory transport with a manually advanced playhead.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    default_duration: f64,
    loaded: Option<String>,
    duration: f64,
    position: f64,
    volume: f64,
    playing: bool,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self {
            durations: HashMap::new(),
            failing: HashSet::new(),
            default_duration: 180.0,
            loaded: None,
            duration: 0.0,
            position: 0.0,
            volume: 1.0,
            playing: false,
        }
    }
}

impl SimulatedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that knows the duration of every track in `playlist`.
    #[must_use]
    pub fn for_playlist(playlist: &Playlist) -> Self {
        let mut transport = Self::new();
        for track in &playlist.tracks {
            transport.register(&track.url, track.duration);
        }
        transport
    }

    pub fn register(&mut self, url: &str, duration: f64) {
        self.durations.insert(url.to_string(), duration);
    }

    /// Make every later `load` of `url` fail.
    pub fn fail_on(&mut self, url: &str) {
        self.failing.insert(url.to_string());
    }

    #[must_use]
    pub fn loaded_url(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Move the playhead forward by `seconds` of playback.
    ///
    /// Reports the new position, followed by `Ended` when the end of the
    /// track is reached. Nothing happens while paused or stopped.
    pub fn advance(&mut self, seconds: f64) -> Vec<TransportEvent> {
        if !self.playing || seconds <= 0.0 {
            return Vec::new();
        }
        self.position = (self.position + seconds).min(self.duration);
        trace!("Simulated playhead at {:.1}s of {:.1}s", self.position, self.duration);

        let mut events = vec![TransportEvent::TimeUpdate(self.position)];
        if self.position >= self.duration {
            self.playing = false;
            events.push(TransportEvent::Ended);
        }
        events
    }
}

impl Transport for SimulatedTransport {
    fn load(&mut self, url: &str) -> Result<()> {
        self.playing = false;
        self.position = 0.0;
        if self.failing.contains(url) {
            self.loaded = None;
            self.duration = 0.0;
            bail!("Failed to load `{url}'");
        }
        self.duration = self
            .durations
            .get(url)
            .copied()
            .unwrap_or(self.default_duration);
        self.loaded = Some(url.to_string());
        debug!("Loaded `{url}' ({:.1}s)", self.duration);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.loaded.is_none() {
            bail!("Nothing loaded to play");
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.position = 0.0;
    }

    fn seek(&mut self, position: f64) -> Result<()> {
        if self.loaded.is_none() {
            bail!("Nothing loaded to seek in");
        }
        self.position = position.clamp(0.0, self.duration);
        Ok(())
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;

    #[test]
    fn test_registered_duration_is_used() {
        let playlist = Playlist::new("p", vec![Track::new("a", 42.0)]);
        let mut transport = SimulatedTransport::for_playlist(&playlist);
        transport.load("memory://a").expect("load");
        assert_eq!(transport.duration(), 42.0);
        transport.load("memory://unknown").expect("load");
        assert_eq!(transport.duration(), 180.0);
    }

    #[test]
    fn test_advance_reports_end() {
        let mut transport = SimulatedTransport::new();
        transport.register("x", 10.0);
        transport.load("x").expect("load");
        assert!(transport.advance(5.0).is_empty());

        transport.play().expect("play");
        assert_eq!(transport.advance(4.0), vec![TransportEvent::TimeUpdate(4.0)]);
        assert_eq!(
            transport.advance(30.0),
            vec![TransportEvent::TimeUpdate(10.0), TransportEvent::Ended]
        );
        assert!(!transport.is_playing());
    }

    #[test]
    fn test_failing_load() {
        let mut transport = SimulatedTransport::new();
        transport.fail_on("bad");
        assert!(transport.load("bad").is_err());
        assert!(transport.loaded_url().is_none());
        assert!(transport.play().is_err());
    }

    #[test]
    fn test_seek_and_volume_are_clamped() {
        let mut transport = SimulatedTransport::new();
        assert!(transport.seek(1.0).is_err());
        transport.register("x", 20.0);
        transport.load("x").expect("load");
        transport.seek(99.0).expect("seek");
        assert_eq!(transport.position(), 20.0);
        transport.set_volume(1.7);
        assert_eq!(transport.volume(), 1.0);
        transport.stop();
        assert_eq!(transport.position(), 0.0);
    }
}
