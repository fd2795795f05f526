//! # Time and Randomness Sources
//!
//! Selection, metrics and runtime timing never read the wall clock or a
//! global random generator directly. They are handed a [`Clock`] and a
//! [`RandomSource`] at construction, which keeps every decision reproducible
//! under test.
//!
//! - [`SystemClock`] reads local time through `chrono`.
//! - [`ManualClock`] only moves when told to; the simulator and the tests
//!   share one instance between components.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Source of wall-clock readings.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Local hour of day, `0..=23`.
    fn local_hour(&self) -> u32;

    /// Local day of week, `0` = Sunday.
    fn day_of_week(&self) -> u32;
}

/// Clock handle shared between components.
pub type SharedClock = Arc<dyn Clock>;

/// Random stream owned by a component.
pub type RandomSource = Box<dyn RngCore + Send>;

/// Random source seeded from the operating system.
#[must_use]
pub fn entropy_source() -> RandomSource {
    Box::new(StdRng::from_entropy())
}

/// Reproducible random source.
#[must_use]
pub fn seeded_source(seed: u64) -> RandomSource {
    Box::new(StdRng::seed_from_u64(seed))
}

/// Local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Local::now().timestamp_millis()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }

    fn day_of_week(&self) -> u32 {
        Local::now().weekday().num_days_from_sunday()
    }
}

/// Clock that advances only on request.
///
/// Clones share the same instant, so a driver can keep one handle and give
/// another to the components it is stepping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock set to the given local date and time, or `None` if the date is invalid.
    #[must_use]
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, 0)
            .map(Self::new)
    }

    /// Handle of this clock usable as a [`SharedClock`].
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.lock();
        *now += by;
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(chrono::Duration::milliseconds(millis));
    }

    pub fn advance_secs(&self, secs: f64) {
        #[allow(clippy::cast_possible_truncation)]
        self.advance_millis((secs * 1000.0).round() as i64);
    }

    pub fn set(&self, instant: NaiveDateTime) {
        *self.lock() = instant;
    }

    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, NaiveDateTime> {
        // A poisoned instant is still a valid instant.
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }

    fn local_hour(&self) -> u32 {
        self.now().hour()
    }

    fn day_of_week(&self) -> u32 {
        self.now().weekday().num_days_from_sunday()
    }
}

/// Random sources that replay a fixed draw, for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use rand::rngs::mock::StepRng;

    /// Source whose every `gen::<f64>()` returns exactly `value`.
    ///
    /// `value` must be a multiple of 2^-53 in `[0, 1)` for the draw to be exact.
    pub(crate) fn constant_draw(value: f64) -> Box<StepRng> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bits = ((value * (1u64 << 53) as f64) as u64) << 11;
        Box::new(StepRng::new(bits, 0))
    }
}
