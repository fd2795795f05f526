//! Track and playlist data holders.
//!
//! These carry metadata only. The selection core reads `id` and `duration`
//! and never mutates a track.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A playable track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique identifier; the key of the probability field.
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Length in seconds.
    pub duration: f64,
    #[serde(default)]
    pub url: String,
}

impl Track {
    /// Track with only an id and a duration; title and url are derived from the id.
    #[must_use]
    pub fn new(id: impl Into<String>, duration: f64) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            artist: String::new(),
            url: format!("memory://{id}"),
            duration,
            id,
        }
    }
}

/// An ordered collection of tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub name: String,
    pub tracks: Vec<Track>,
}

/// Playlist files may hold a full playlist object or a bare track array.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlaylistFile {
    Playlist(Playlist),
    Tracks(Vec<Track>),
}

impl Playlist {
    #[must_use]
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            name: name.into(),
            tracks,
        }
    }

    /// Load a playlist from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a playlist.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read playlist file {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Invalid playlist file {}", path.display()))
    }

    /// Parse a playlist from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is neither a playlist object nor a track array.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let parsed: PlaylistFile =
            serde_json::from_str(contents).context("Playlist JSON could not be parsed")?;
        let playlist = match parsed {
            PlaylistFile::Playlist(playlist) => playlist,
            PlaylistFile::Tracks(tracks) => Self::new("untitled", tracks),
        };
        log::debug!("Parsed playlist `{}' with {} tracks", playlist.name, playlist.tracks.len());
        Ok(playlist)
    }

    /// Synthetic catalogue of `count` tracks with varied durations.
    #[must_use]
    pub fn demo(count: usize) -> Self {
        let tracks = (1..=count)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let duration = 150.0 + ((i * 37) % 180) as f64;
                Track {
                    id: format!("track-{i:03}"),
                    title: format!("Song {i}"),
                    artist: format!("Artist {}", (i - 1) / 4 + 1),
                    duration,
                    url: format!("memory://track-{i:03}"),
                }
            })
            .collect();
        Self::new("demo", tracks)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playlist_object() {
        let json = r#"{
            "name": "evening",
            "tracks": [
                {"id": "a", "title": "A", "artist": "X", "duration": 200.0, "url": "file:///a.flac"},
                {"id": "b", "duration": 95.5}
            ]
        }"#;
        let playlist = Playlist::from_json_str(json).expect("valid playlist");
        assert_eq!(playlist.name, "evening");
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.tracks[1].title, "");
        assert_eq!(playlist.tracks[1].duration, 95.5);
    }

    #[test]
    fn test_parse_bare_track_array() {
        let json = r#"[{"id": "a", "duration": 10}, {"id": "b", "duration": 20}]"#;
        let playlist = Playlist::from_json_str(json).expect("valid track list");
        assert_eq!(playlist.name, "untitled");
        assert_eq!(playlist.tracks[0].id, "a");
    }

    #[test]
    fn test_missing_duration_is_rejected() {
        assert!(Playlist::from_json_str(r#"[{"id": "a"}]"#).is_err());
    }

    #[test]
    fn test_demo_playlist_has_unique_ids() {
        let playlist = Playlist::demo(25);
        let mut ids: Vec<_> = playlist.tracks.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
        assert!(playlist.tracks.iter().all(|t| t.duration >= 150.0 && t.duration < 330.0));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("list.json");
        fs::write(&path, r#"[{"id": "only", "duration": 61}]"#).expect("write playlist");
        let playlist = Playlist::from_json_file(&path).expect("load playlist");
        assert_eq!(playlist.tracks[0].id, "only");

        let missing = dir.path().join("missing.json");
        assert!(Playlist::from_json_file(&missing).is_err());
    }
}
