//! Playback orchestration driven by a behaviour-weighted probability field.
//!
//! Core modules:
//! - [`engine`] - Probability field, weighted draws and feedback learning
//! - [`tracker`] - Interaction log and derived listening metrics
//! - [`queue`] - Queue state machine with shuffle, repeat and probability mode
//! - [`clock`] - Runtime clock with one-shot scheduled events
//!
//! ### Supporting Modules
//!
//! - [`source`] - Injectable wall clock and random source
//! - [`track`] - Track and playlist data holders
//! - [`transport`] - Audio transport boundary and an in-memory transport
//! - [`session`] - Listening session tying the core to a transport
//! - [`simulation`] - Seeded end-to-end listening simulation
//! - [`config`] - Configuration file loading
//!
//! ## Quick Start Example
//!
//! ```
//! use fieldplay::engine::{ProbabilityEngine, TrackFeedback};
//! use fieldplay::queue::QueueManager;
//! use fieldplay::source::{seeded_source, ManualClock};
//! use fieldplay::track::Playlist;
//! use fieldplay::tracker::InteractionTracker;
//!
//! let clock = ManualClock::at(2026, 6, 1, 21, 0).expect("valid date");
//! let mut tracker = InteractionTracker::new(clock.shared());
//! let mut queue = QueueManager::new(ProbabilityEngine::new(seeded_source(7)));
//! queue.set_playlist(&Playlist::demo(8));
//! queue.set_probability_mode(true);
//!
//! let context = tracker.context();
//! let first = queue.next(Some(&context)).map(|t| t.id.clone()).expect("non-empty queue");
//!
//! tracker.record_skip(&first, 0.1);
//! let weight = queue.update_track_feedback(&first, &TrackFeedback::skipped());
//! assert!(weight < 1.0);
//! ```
//!
//! ## Selection
//!
//! Each draw shapes the learned weight of every candidate by recency, the
//! listener's energy and flow, and the hour of day, floors it so nothing is
//! ever unreachable, and normalizes. Feedback after playback (completions,
//! skips, pauses, volume fiddling) moves the learned weights within
//! `[0.1, 5.0]`.

pub mod clock;
pub mod config;
pub mod engine;
pub mod queue;
pub mod session;
pub mod simulation;
pub mod source;
pub mod track;
pub mod tracker;
pub mod transport;
