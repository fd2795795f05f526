//! # Probability Engine
//!
//! Turns a per-track weight table into a normalized probability field and
//! draws the next track from it.
//!
//! ## Selection
//!
//! The raw weight of each candidate starts at its learned value and is then
//! shaped, in order, by:
//!
//! 1. **Recency**: the last five picks are penalized, up to 70% for the most
//!    recent one, decaying linearly with rank
//! 2. **Energy**: `1 + (energy - 0.5) * 0.3`
//! 3. **Flow**: a continuity boost above 0.7, random jitter in `[0.8, 1.2)`
//!    below 0.3
//! 4. **Time of day**: morning 1.0, afternoon 1.1, evening 1.2, night 0.9
//!
//! Weights are floored at 0.01 so that no track is ever excluded, then
//! divided by their sum.
//!
//! ## Learning
//!
//! After playback, [`ProbabilityEngine::update_track_weight`] folds listener
//! feedback into the table multiplicatively and clamps the result to
//! `[0.1, 5.0]`.

use crate::source::{self, RandomSource};
use crate::track::Track;
use crate::tracker::ListeningContext;
use anyhow::{ensure, Result};
use log::{debug, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Longest recency history a configuration may ask for.
pub const MAX_HISTORY_LENGTH: usize = 1024;

/// Tunable constants of the probability field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Weight of a track with no history.
    pub default_weight: f64,
    /// Lower bound of a learned weight.
    pub min_weight: f64,
    /// Upper bound of a learned weight.
    pub max_weight: f64,
    /// Smallest raw weight a candidate can carry into normalization.
    pub probability_floor: f64,
    /// Number of recent picks that are penalized.
    pub history_length: usize,
    /// Penalty applied to the most recent pick.
    pub recency_strength: f64,
    pub energy_skew: f64,
    /// Flow above which continuity is favoured.
    pub high_flow: f64,
    /// Flow below which weights are jittered.
    pub low_flow: f64,
    pub continuity_boost: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub feedback: FeedbackFactors,
}

/// Multipliers applied by [`ProbabilityEngine::update_track_weight`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackFactors {
    /// Listen fraction above which a play counts as a completion.
    pub completion_threshold: f64,
    pub completion: f64,
    pub skip: f64,
    pub pause: f64,
    /// Volume changes above which the listener counts as engaged.
    pub volume_threshold: u32,
    pub volume: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_weight: 1.0,
            min_weight: 0.1,
            max_weight: 5.0,
            probability_floor: 0.01,
            history_length: 5,
            recency_strength: 0.7,
            energy_skew: 0.3,
            high_flow: 0.7,
            low_flow: 0.3,
            continuity_boost: 1.2,
            jitter_min: 0.8,
            jitter_max: 1.2,
            feedback: FeedbackFactors::default(),
        }
    }
}

impl EngineConfig {
    /// Check that the engine can run with these settings.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first setting that is out of range.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("default_weight", self.default_weight),
            ("min_weight", self.min_weight),
            ("max_weight", self.max_weight),
            ("probability_floor", self.probability_floor),
            ("recency_strength", self.recency_strength),
            ("energy_skew", self.energy_skew),
            ("high_flow", self.high_flow),
            ("low_flow", self.low_flow),
            ("continuity_boost", self.continuity_boost),
            ("jitter_min", self.jitter_min),
            ("jitter_max", self.jitter_max),
        ];
        for (name, value) in finite {
            ensure!(value.is_finite(), "engine.{name} must be a finite number, got {value}");
        }

        ensure!(
            self.min_weight > 0.0 && self.min_weight <= self.max_weight,
            "engine.min_weight ({}) must be positive and not above engine.max_weight ({})",
            self.min_weight,
            self.max_weight
        );
        ensure!(
            self.default_weight > 0.0,
            "engine.default_weight must be positive, got {}",
            self.default_weight
        );
        ensure!(
            self.probability_floor > 0.0,
            "engine.probability_floor must be positive, got {}",
            self.probability_floor
        );
        ensure!(
            self.history_length <= MAX_HISTORY_LENGTH,
            "engine.history_length must be at most {MAX_HISTORY_LENGTH}, got {}",
            self.history_length
        );
        ensure!(
            (0.0..=1.0).contains(&self.recency_strength),
            "engine.recency_strength must lie in [0, 1], got {}",
            self.recency_strength
        );
        ensure!(
            self.low_flow <= self.high_flow,
            "engine.low_flow ({}) must not be above engine.high_flow ({})",
            self.low_flow,
            self.high_flow
        );
        ensure!(
            self.continuity_boost > 0.0,
            "engine.continuity_boost must be positive, got {}",
            self.continuity_boost
        );
        ensure!(
            self.jitter_min > 0.0 && self.jitter_min < self.jitter_max,
            "engine.jitter_min ({}) must be positive and below engine.jitter_max ({})",
            self.jitter_min,
            self.jitter_max
        );
        self.feedback.validate()
    }
}

impl FeedbackFactors {
    /// # Errors
    ///
    /// Returns an error if a multiplier is not a finite positive number.
    pub fn validate(&self) -> Result<()> {
        let factors = [
            ("completion", self.completion),
            ("skip", self.skip),
            ("pause", self.pause),
            ("volume", self.volume),
        ];
        for (name, value) in factors {
            ensure!(
                value.is_finite() && value > 0.0,
                "engine.feedback.{name} must be a finite positive number, got {value}"
            );
        }
        ensure!(
            self.completion_threshold.is_finite(),
            "engine.feedback.completion_threshold must be a finite number"
        );
        Ok(())
    }
}

impl Default for FeedbackFactors {
    fn default() -> Self {
        Self {
            completion_threshold: 0.8,
            completion: 1.1,
            skip: 0.6,
            pause: 0.9,
            volume_threshold: 3,
            volume: 1.05,
        }
    }
}

/// Post-playback observations about one track. Fields apply independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackFeedback {
    pub listen_percentage: Option<f64>,
    pub skipped: bool,
    pub paused: bool,
    pub volume_changes: u32,
}

impl TrackFeedback {
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn listened(percentage: f64) -> Self {
        Self {
            listen_percentage: Some(percentage),
            ..Self::default()
        }
    }
}

/// Multiplier for the hour of day.
#[must_use]
pub const fn time_of_day_multiplier(hour: u32) -> f64 {
    match hour {
        6..=11 => 1.0,
        12..=17 => 1.1,
        18..=23 => 1.2,
        _ => 0.9,
    }
}

/// Weight table, recent picks and the random stream behind every draw.
pub struct ProbabilityEngine {
    config: EngineConfig,
    weights: HashMap<String, f64>,
    recent: VecDeque<String>,
    last_distribution: HashMap<String, f64>,
    rng: RandomSource,
}

impl std::fmt::Debug for ProbabilityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbabilityEngine")
            .field("config", &self.config)
            .field("weights", &self.weights)
            .field("recent", &self.recent)
            .finish_non_exhaustive()
    }
}

impl Default for ProbabilityEngine {
    fn default() -> Self {
        Self::new(source::entropy_source())
    }
}

impl ProbabilityEngine {
    #[must_use]
    pub fn new(rng: RandomSource) -> Self {
        Self::with_config(EngineConfig::default(), rng)
    }

    #[must_use]
    pub fn with_config(config: EngineConfig, rng: RandomSource) -> Self {
        Self {
            config,
            weights: HashMap::new(),
            recent: VecDeque::with_capacity(config.history_length.min(MAX_HISTORY_LENGTH)),
            last_distribution: HashMap::new(),
            rng,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Give every unseen track the default weight. Known tracks keep theirs.
    pub fn initialize_tracks(&mut self, tracks: &[Track]) {
        let default = self.config.default_weight;
        let before = self.weights.len();
        for track in tracks {
            self.weights.entry(track.id.clone()).or_insert(default);
        }
        debug!(
            "Initialized {} new track weights ({} known)",
            self.weights.len() - before,
            self.weights.len()
        );
    }

    /// Normalized probability of each track in `tracks`, in the same order.
    ///
    /// A flow below the low threshold draws one jitter factor per track.
    pub fn calculate_probabilities(
        &mut self,
        tracks: &[Track],
        context: &ListeningContext,
    ) -> Vec<f64> {
        if tracks.is_empty() {
            self.last_distribution.clear();
            return Vec::new();
        }

        let time_multiplier = time_of_day_multiplier(context.hour);
        let mut raw = Vec::with_capacity(tracks.len());
        for track in tracks {
            let weight = self.shaped_weight(&track.id, context) * time_multiplier;
            raw.push(weight.max(self.config.probability_floor));
        }

        let total: f64 = raw.iter().sum();
        let probabilities: Vec<f64> = raw.iter().map(|weight| weight / total).collect();

        self.last_distribution = tracks
            .iter()
            .map(|track| track.id.clone())
            .zip(probabilities.iter().copied())
            .collect();
        trace!("Probability field over {} tracks: {probabilities:?}", tracks.len());
        probabilities
    }

    /// Draw one track from the field. `None` only for an empty list.
    pub fn select_next_track<'a>(
        &mut self,
        tracks: &'a [Track],
        context: &ListeningContext,
    ) -> Option<&'a Track> {
        let last = tracks.last()?;
        let probabilities = self.calculate_probabilities(tracks, context);
        let draw: f64 = self.rng.gen();

        let mut cumulative = 0.0;
        let selected = tracks
            .iter()
            .zip(&probabilities)
            .find_map(|(track, probability)| {
                cumulative += probability;
                (cumulative > draw).then_some(track)
            })
            // rounding can leave the draw just past the final sum
            .unwrap_or(last);

        self.record_selection(&selected.id);
        debug!("Selected `{}' (draw {draw:.4})", selected.id);
        Some(selected)
    }

    /// Fold feedback into the weight of `track_id` and return the new weight.
    ///
    /// Unknown ids start from the default weight and are stored afterwards.
    pub fn update_track_weight(&mut self, track_id: &str, feedback: &TrackFeedback) -> f64 {
        let factors = self.config.feedback;
        let mut weight = self
            .weights
            .get(track_id)
            .copied()
            .unwrap_or(self.config.default_weight);

        if feedback
            .listen_percentage
            .is_some_and(|pct| pct > factors.completion_threshold)
        {
            weight *= factors.completion;
        }
        if feedback.skipped {
            weight *= factors.skip;
        }
        if feedback.paused {
            weight *= factors.pause;
        }
        if feedback.volume_changes > factors.volume_threshold {
            weight *= factors.volume;
        }

        // never panics, even for inverted bounds
        let weight = weight.max(self.config.min_weight).min(self.config.max_weight);
        self.weights.insert(track_id.to_string(), weight);
        debug!("Weight of `{track_id}' is now {weight:.3} after {feedback:?}");
        weight
    }

    /// Forget all learned weights and recent picks.
    pub fn reset(&mut self) {
        self.weights.clear();
        self.recent.clear();
        self.last_distribution.clear();
        debug!("Probability engine reset");
    }

    #[must_use]
    pub fn weight(&self, track_id: &str) -> Option<f64> {
        self.weights.get(track_id).copied()
    }

    /// Copy of the weight table.
    #[must_use]
    pub fn track_weights(&self) -> HashMap<String, f64> {
        self.weights.clone()
    }

    /// Copy of the most recently computed probability field.
    #[must_use]
    pub fn probability_distribution(&self) -> HashMap<String, f64> {
        self.last_distribution.clone()
    }

    /// Recent picks, most recent first.
    #[must_use]
    pub fn recent_selections(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    /// The random stream, shared with the queue's shuffle.
    pub(crate) fn rng_mut(&mut self) -> &mut RandomSource {
        &mut self.rng
    }

    fn shaped_weight(&mut self, track_id: &str, context: &ListeningContext) -> f64 {
        let config = self.config;
        let mut weight = self
            .weights
            .get(track_id)
            .copied()
            .unwrap_or(config.default_weight);

        if let Some(rank) = self.recent.iter().position(|id| id == track_id) {
            weight *= recency_factor(rank, config.history_length, config.recency_strength);
        }

        let energy = context.energy.clamp(0.0, 1.0);
        weight *= 1.0 + (energy - 0.5) * config.energy_skew;

        if context.flow > config.high_flow {
            weight *= config.continuity_boost;
        } else if context.flow < config.low_flow && config.jitter_min < config.jitter_max {
            weight *= self.rng.gen_range(config.jitter_min..config.jitter_max);
        }

        weight
    }

    fn record_selection(&mut self, track_id: &str) {
        self.recent.push_front(track_id.to_string());
        self.recent.truncate(self.config.history_length);
    }
}

/// Multiplier for a track found at `rank` (0 = most recent) among the recent picks.
#[allow(clippy::cast_precision_loss)]
fn recency_factor(rank: usize, history_length: usize, strength: f64) -> f64 {
    if history_length == 0 || rank >= history_length {
        return 1.0;
    }
    let closeness = (history_length - rank) as f64 / history_length as f64;
    1.0 - closeness * strength
}
