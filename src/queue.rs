//! # Queue Manager
//!
//! Playback queue state machine over the current position, the shuffle and
//! repeat flags, and the probability-mode switch.
//!
//! ## Advancing
//!
//! - **Probability mode** (with a context): the [`ProbabilityEngine`] draws
//!   the next track from the whole collection; shuffle and repeat play no part
//! - **Deterministic**: step through the play order, wrapping only with repeat
//!
//! Positions are positions in the *play order*. With shuffle off the play
//! order is the collection order; with shuffle on it is a Fisher–Yates
//! permutation of it, regenerated whenever the collection changes.

use crate::engine::{ProbabilityEngine, TrackFeedback};
use crate::track::{Playlist, Track};
use crate::tracker::ListeningContext;
use log::{debug, trace};
use rand::seq::SliceRandom;

/// Ordered track collection with a cursor and the engine that learns over it.
#[derive(Debug)]
pub struct QueueManager {
    tracks: Vec<Track>,
    current: Option<usize>,
    repeat: bool,
    shuffle: bool,
    order: Vec<usize>,
    probability_mode: bool,
    engine: ProbabilityEngine,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(ProbabilityEngine::default())
    }
}

impl QueueManager {
    #[must_use]
    pub fn new(engine: ProbabilityEngine) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            repeat: false,
            shuffle: false,
            order: Vec::new(),
            probability_mode: false,
            engine,
        }
    }

    /// Replace the collection. Learned weights of known ids are kept.
    pub fn set_playlist(&mut self, playlist: &Playlist) {
        self.tracks = playlist.tracks.clone();
        self.current = None;
        self.regenerate_order();
        self.engine.initialize_tracks(&self.tracks);
        debug!(
            "Queue loaded playlist `{}' with {} tracks",
            playlist.name,
            self.tracks.len()
        );
    }

    /// Append a track, keeping the current track current.
    pub fn add_track(&mut self, track: Track) {
        let current_raw = self.current_raw_index();
        self.engine.initialize_tracks(std::slice::from_ref(&track));
        self.tracks.push(track);
        if self.shuffle {
            self.regenerate_order();
        }
        self.current = current_raw.map(|raw| self.position_of(raw));
    }

    /// Remove the track at `index` in collection order.
    ///
    /// Another track being removed leaves the current track current. Removing
    /// the current track leaves the cursor in place, clamped to the new length.
    pub fn remove_track(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        let current_raw = self.current_raw_index();
        let removed = self.tracks.remove(index);
        if self.shuffle {
            self.regenerate_order();
        }

        self.current = match (self.current, current_raw) {
            (Some(position), Some(raw)) if raw == index => {
                if self.tracks.is_empty() {
                    None
                } else {
                    Some(position.min(self.tracks.len() - 1))
                }
            }
            (Some(_), Some(raw)) => {
                let raw = if raw > index { raw - 1 } else { raw };
                Some(self.position_of(raw))
            }
            _ => None,
        };
        debug!("Removed `{}' from the queue", removed.id);
        Some(removed)
    }

    pub fn remove_track_by_id(&mut self, id: &str) -> Option<Track> {
        let index = self.tracks.iter().position(|t| t.id == id)?;
        self.remove_track(index)
    }

    /// Advance and return the new current track.
    ///
    /// With probability mode on and a context supplied, the next track is
    /// drawn from the field. Otherwise the play order is followed; at the end
    /// without repeat nothing changes and `None` is returned.
    pub fn next(&mut self, context: Option<&ListeningContext>) -> Option<&Track> {
        if self.probability_mode {
            if let Some(context) = context {
                return self.next_from_field(context);
            }
        }

        if self.tracks.is_empty() {
            return None;
        }
        let target = match self.current {
            None => 0,
            Some(position) if position + 1 < self.tracks.len() => position + 1,
            Some(_) if self.repeat => 0,
            Some(_) => return None,
        };
        self.current = Some(target);
        trace!("Advanced to position {target}");
        self.resolve(target)
    }

    /// Step back. Never consults the probability field.
    pub fn previous(&mut self) -> Option<&Track> {
        let position = self.current?;
        let target = if position > 0 {
            position - 1
        } else if self.repeat {
            self.tracks.len().checked_sub(1)?
        } else {
            return None;
        };
        self.current = Some(target);
        trace!("Stepped back to position {target}");
        self.resolve(target)
    }

    /// Move to a position in the play order.
    pub fn jump_to_track(&mut self, index: usize) -> Option<&Track> {
        if index >= self.tracks.len() {
            return None;
        }
        self.current = Some(index);
        self.resolve(index)
    }

    pub fn jump_to_track_by_id(&mut self, id: &str) -> Option<&Track> {
        let raw = self.tracks.iter().position(|t| t.id == id)?;
        let position = self.position_of(raw);
        self.current = Some(position);
        self.tracks.get(raw)
    }

    /// Whether a deterministic [`next`](Self::next) would return a track.
    #[must_use]
    pub fn has_next(&self) -> bool {
        match self.current {
            None => !self.tracks.is_empty(),
            Some(position) => position + 1 < self.tracks.len() || self.repeat,
        }
    }

    /// Whether [`previous`](Self::previous) would return a track.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        match self.current {
            None => false,
            Some(position) => position > 0 || self.repeat,
        }
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        let current_raw = self.current_raw_index();
        self.shuffle = enabled;
        if enabled {
            self.regenerate_order();
        } else {
            self.order.clear();
        }
        self.current = current_raw.map(|raw| self.position_of(raw));
        debug!("Shuffle {}", if enabled { "on" } else { "off" });
    }

    pub fn set_repeat(&mut self, enabled: bool) {
        self.repeat = enabled;
    }

    pub fn set_probability_mode(&mut self, enabled: bool) {
        self.probability_mode = enabled;
        debug!("Probability mode {}", if enabled { "on" } else { "off" });
    }

    /// Pass listener feedback on to the engine.
    pub fn update_track_feedback(&mut self, track_id: &str, feedback: &TrackFeedback) -> f64 {
        self.engine.update_track_weight(track_id, feedback)
    }

    /// Empty the collection. Learned weights survive.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = None;
        self.order.clear();
        debug!("Queue cleared");
    }

    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|position| self.resolve(position))
    }

    /// Current position in the play order.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// The collection in its original order.
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Collection indices in play order.
    #[must_use]
    pub fn play_order(&self) -> Vec<usize> {
        if self.shuffle {
            self.order.clone()
        } else {
            (0..self.tracks.len()).collect()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub fn is_repeating(&self) -> bool {
        self.repeat
    }

    #[must_use]
    pub fn is_probability_mode(&self) -> bool {
        self.probability_mode
    }

    #[must_use]
    pub fn engine(&self) -> &ProbabilityEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ProbabilityEngine {
        &mut self.engine
    }

    fn next_from_field(&mut self, context: &ListeningContext) -> Option<&Track> {
        let id = self.engine.select_next_track(&self.tracks, context)?.id.clone();
        let raw = self.tracks.iter().position(|t| t.id == id)?;
        self.current = Some(self.position_of(raw));
        self.tracks.get(raw)
    }

    fn resolve(&self, position: usize) -> Option<&Track> {
        let raw = if self.shuffle {
            *self.order.get(position)?
        } else {
            position
        };
        self.tracks.get(raw)
    }

    fn current_raw_index(&self) -> Option<usize> {
        let position = self.current?;
        if self.shuffle {
            self.order.get(position).copied()
        } else {
            Some(position)
        }
    }

    /// Play-order position of the collection index `raw`.
    fn position_of(&self, raw: usize) -> usize {
        if self.shuffle {
            self.order.iter().position(|&i| i == raw).unwrap_or(raw)
        } else {
            raw
        }
    }

    fn regenerate_order(&mut self) {
        let mut order: Vec<usize> = (0..self.tracks.len()).collect();
        order.shuffle(self.engine.rng_mut());
        trace!("Shuffle order regenerated: {order:?}");
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::seeded_source;
    use approx::assert_relative_eq;

    fn playlist(n: usize) -> Playlist {
        Playlist::new(
            "test",
            (0..n).map(|i| Track::new(format!("t{i}"), 180.0)).collect(),
        )
    }

    fn create_test_queue(n: usize) -> QueueManager {
        let mut queue = QueueManager::new(ProbabilityEngine::new(seeded_source(42)));
        queue.set_playlist(&playlist(n));
        queue
    }

    fn id(track: Option<&Track>) -> Option<String> {
        track.map(|t| t.id.clone())
    }

    #[test]
    fn test_sequential_advance_from_start() {
        let mut queue = create_test_queue(3);
        assert_eq!(queue.current_index(), None);
        assert_eq!(id(queue.next(None)).as_deref(), Some("t0"));
        assert_eq!(id(queue.next(None)).as_deref(), Some("t1"));
        assert_eq!(id(queue.next(None)).as_deref(), Some("t2"));
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn test_next_at_end_without_repeat_keeps_position() {
        let mut queue = create_test_queue(3);
        queue.jump_to_track(2);
        assert!(!queue.has_next());
        assert!(queue.next(None).is_none());
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn test_next_at_end_with_repeat_wraps() {
        let mut queue = create_test_queue(3);
        queue.set_repeat(true);
        queue.jump_to_track(2);
        assert!(queue.has_next());
        assert_eq!(id(queue.next(None)).as_deref(), Some("t0"));
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn test_previous_is_deterministic() {
        let mut queue = create_test_queue(3);
        assert!(queue.previous().is_none());
        assert!(!queue.has_previous());

        queue.jump_to_track(1);
        assert_eq!(id(queue.previous()).as_deref(), Some("t0"));
        assert!(!queue.has_previous());
        assert!(queue.previous().is_none());
        assert_eq!(queue.current_index(), Some(0));

        queue.set_repeat(true);
        assert!(queue.has_previous());
        assert_eq!(id(queue.previous()).as_deref(), Some("t2"));
    }

    #[test]
    fn test_jump_out_of_range_does_not_move() {
        let mut queue = create_test_queue(3);
        queue.jump_to_track(1);
        assert!(queue.jump_to_track(3).is_none());
        assert!(queue.jump_to_track_by_id("missing").is_none());
        assert_eq!(queue.current_index(), Some(1));
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let mut queue = create_test_queue(0);
        assert!(queue.next(None).is_none());
        assert!(!queue.has_next());
        queue.set_probability_mode(true);
        assert!(queue.next(Some(&ListeningContext::neutral(12))).is_none());
        assert!(queue.current_track().is_none());
    }

    #[test]
    fn test_shuffle_order_is_a_permutation() {
        let mut queue = create_test_queue(20);
        queue.set_shuffle(true);
        let mut order = queue.play_order();
        order.sort_unstable();
        assert_eq!(order, (0..20).collect::<Vec<_>>());

        let mut seen: Vec<String> = Vec::new();
        while let Some(track) = queue.next(None) {
            seen.push(track.id.clone());
        }
        seen.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_shuffle_off_restores_collection_order() {
        let mut queue = create_test_queue(5);
        queue.set_shuffle(true);
        queue.set_shuffle(false);
        assert_eq!(queue.play_order(), vec![0, 1, 2, 3, 4]);
        assert_eq!(id(queue.next(None)).as_deref(), Some("t0"));
    }

    #[test]
    fn test_toggling_shuffle_keeps_current_track() {
        let mut queue = create_test_queue(8);
        queue.jump_to_track(5);
        queue.set_shuffle(true);
        assert_eq!(id(queue.current_track()).as_deref(), Some("t5"));
        queue.set_shuffle(false);
        assert_eq!(queue.current_index(), Some(5));
    }

    #[test]
    fn test_jump_by_id_under_shuffle_lands_on_that_track() {
        let mut queue = create_test_queue(10);
        queue.set_shuffle(true);
        assert_eq!(id(queue.jump_to_track_by_id("t7")).as_deref(), Some("t7"));
        assert_eq!(id(queue.current_track()).as_deref(), Some("t7"));
    }

    #[test]
    fn test_probability_mode_draws_from_the_field() {
        let mut queue = create_test_queue(5);
        queue.set_probability_mode(true);
        let context = ListeningContext::neutral(9);
        for _ in 0..25 {
            let drawn = id(queue.next(Some(&context)));
            assert!(drawn.is_some());
            assert_eq!(id(queue.current_track()), drawn);
        }
        assert_eq!(queue.engine().recent_selections().len(), 5);
    }

    #[test]
    fn test_probability_mode_ignores_repeat_at_end() {
        let mut queue = create_test_queue(3);
        queue.set_probability_mode(true);
        queue.jump_to_track(2);
        assert!(queue.next(Some(&ListeningContext::neutral(9))).is_some());
    }

    #[test]
    fn test_probability_mode_without_context_is_sequential() {
        let mut queue = create_test_queue(3);
        queue.set_probability_mode(true);
        assert_eq!(id(queue.next(None)).as_deref(), Some("t0"));
        assert_eq!(id(queue.next(None)).as_deref(), Some("t1"));
        assert!(queue.engine().recent_selections().is_empty());
    }

    #[test]
    fn test_set_playlist_preserves_learned_weights() {
        let mut queue = create_test_queue(3);
        queue.next(None);
        queue.update_track_feedback("t1", &TrackFeedback::skipped());

        let mut bigger = playlist(4);
        bigger.tracks.reverse();
        queue.set_playlist(&bigger);
        assert_eq!(queue.current_index(), None);
        assert_relative_eq!(queue.engine().weight("t1").unwrap_or_default(), 0.6);
        assert_eq!(queue.engine().weight("t3"), Some(1.0));
    }

    #[test]
    fn test_clear_keeps_weights() {
        let mut queue = create_test_queue(3);
        queue.update_track_feedback("t0", &TrackFeedback::listened(0.95));
        queue.next(None);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);
        assert!(queue.play_order().is_empty());
        assert_relative_eq!(queue.engine().weight("t0").unwrap_or_default(), 1.1);
    }

    #[test]
    fn test_add_track_initializes_weight() {
        let mut queue = create_test_queue(2);
        queue.jump_to_track(1);
        queue.add_track(Track::new("late", 99.0));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.engine().weight("late"), Some(1.0));
        assert_eq!(id(queue.current_track()).as_deref(), Some("t1"));
        assert!(queue.has_next());
    }

    #[test]
    fn test_remove_before_current_keeps_current_track() {
        let mut queue = create_test_queue(4);
        queue.jump_to_track(2);
        let removed = queue.remove_track(0);
        assert_eq!(id(removed.as_ref()).as_deref(), Some("t0"));
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(id(queue.current_track()).as_deref(), Some("t2"));
    }

    #[test]
    fn test_remove_current_track_clamps_cursor() {
        let mut queue = create_test_queue(3);
        queue.jump_to_track(2);
        assert!(queue.remove_track_by_id("t2").is_some());
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(id(queue.current_track()).as_deref(), Some("t1"));

        assert!(queue.remove_track(5).is_none());
        queue.remove_track(0);
        queue.remove_track(0);
        assert_eq!(queue.current_index(), None);
    }

    #[test]
    fn test_remove_under_shuffle_keeps_current_track() {
        let mut queue = create_test_queue(12);
        queue.set_shuffle(true);
        queue.jump_to_track_by_id("t6");
        queue.remove_track_by_id("t2");
        assert_eq!(id(queue.current_track()).as_deref(), Some("t6"));
        let mut order = queue.play_order();
        order.sort_unstable();
        assert_eq!(order, (0..11).collect::<Vec<_>>());
    }
}
