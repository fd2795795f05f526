//! # Runtime Clock
//!
//! Logical clock that advances independently of audio position. An external
//! driver calls [`RuntimeClock::tick`]; each tick credits the wall-clock time
//! elapsed since the previous tick, scaled by the time scale, and fires every
//! one-shot event that has come due.
//!
//! Internal time is measured in milliseconds.

use crate::source::SharedClock;
use anyhow::Result;
use log::{debug, error, trace};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

pub const MIN_TIME_SCALE: f64 = 0.1;
pub const MAX_TIME_SCALE: f64 = 2.0;

/// One-shot event callback.
pub type EventCallback = Box<dyn FnOnce() -> Result<()>>;

/// Handle of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(u64);

/// Clock settings loaded from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub time_scale: f64,
    /// Wall time a driver lets pass between calls to `tick`.
    pub tick_interval_ms: u64,
}

impl ClockConfig {
    /// # Errors
    ///
    /// Returns an error for a non-finite time scale or a zero tick interval.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.time_scale.is_finite(),
            "clock.time_scale must be a finite number, got {}",
            self.time_scale
        );
        anyhow::ensure!(self.tick_interval_ms > 0, "clock.tick_interval_ms must be positive");
        Ok(())
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            tick_interval_ms: 1000,
        }
    }
}

/// Reportable clock state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockState {
    pub internal_time: f64,
    pub time_scale: f64,
    pub paused: bool,
    pub pending_events: usize,
}

struct ScheduledEvent {
    id: EventId,
    fire_at: f64,
    callback: EventCallback,
}

pub struct RuntimeClock {
    clock: SharedClock,
    internal_time: f64,
    time_scale: f64,
    paused: bool,
    last_update: i64,
    events: Vec<ScheduledEvent>,
    next_id: u64,
}

impl std::fmt::Debug for RuntimeClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClock")
            .field("internal_time", &self.internal_time)
            .field("time_scale", &self.time_scale)
            .field("paused", &self.paused)
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeClock {
    /// Running clock at internal time zero.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        let last_update = clock.now_millis();
        Self {
            clock,
            internal_time: 0.0,
            time_scale: 1.0,
            paused: false,
            last_update,
            events: Vec::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub fn with_config(clock: SharedClock, config: &ClockConfig) -> Self {
        let mut runtime = Self::new(clock);
        runtime.set_time_scale(config.time_scale);
        runtime
    }

    /// Credit elapsed time and fire due events. Returns how many fired.
    ///
    /// Does nothing while paused. A failing or panicking callback is logged
    /// and does not stop the remaining events from firing.
    pub fn tick(&mut self) -> usize {
        if self.paused {
            return 0;
        }
        let now = self.clock.now_millis();
        // The wall clock may step backwards; that never rewinds internal time.
        let delta = (now - self.last_update).max(0);
        self.last_update = now;
        #[allow(clippy::cast_precision_loss)]
        let credited = delta as f64 * self.time_scale;
        self.internal_time += credited;
        trace!("Tick credited {credited:.1}ms, internal time {:.1}ms", self.internal_time);
        self.fire_due()
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!("Runtime clock paused at {:.1}ms", self.internal_time);
        }
    }

    /// Resume; time spent paused is never credited.
    pub fn resume(&mut self) {
        self.last_update = self.clock.now_millis();
        if self.paused {
            self.paused = false;
            debug!("Runtime clock resumed at {:.1}ms", self.internal_time);
        }
    }

    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = if scale.is_nan() {
            1.0
        } else {
            scale.clamp(MIN_TIME_SCALE, MAX_TIME_SCALE)
        };
    }

    /// Schedule `callback` for the first tick at which internal time reaches `fire_at`.
    pub fn schedule_event(&mut self, fire_at: f64, callback: EventCallback) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(ScheduledEvent {
            id,
            fire_at,
            callback,
        });
        trace!("Scheduled event {} at {fire_at:.1}ms", id.0);
        id
    }

    /// Schedule `callback` `delay` milliseconds after the current internal time.
    pub fn schedule_after(&mut self, delay: f64, callback: EventCallback) -> EventId {
        self.schedule_event(self.internal_time + delay.max(0.0), callback)
    }

    /// Drop a pending event. Returns `false` if it already fired or never existed.
    pub fn cancel_event(&mut self, id: EventId) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.id != id);
        self.events.len() != before
    }

    /// Back to time zero and running. Pending callbacks are dropped unrun.
    pub fn reset(&mut self) {
        self.internal_time = 0.0;
        self.paused = false;
        self.last_update = self.clock.now_millis();
        self.events.clear();
        debug!("Runtime clock reset");
    }

    #[must_use]
    pub fn state(&self) -> ClockState {
        ClockState {
            internal_time: self.internal_time,
            time_scale: self.time_scale,
            paused: self.paused,
            pending_events: self.events.len(),
        }
    }

    #[must_use]
    pub fn internal_time(&self) -> f64 {
        self.internal_time
    }

    #[must_use]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn fire_due(&mut self) -> usize {
        let now = self.internal_time;
        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|event| event.fire_at <= now);
        self.events = pending;
        due.sort_by(|a, b| a.fire_at.total_cmp(&b.fire_at).then(a.id.cmp(&b.id)));

        let fired = due.len();
        for event in due {
            let id = event.id.0;
            match panic::catch_unwind(AssertUnwindSafe(event.callback)) {
                Ok(Ok(())) => trace!("Event {id} fired"),
                Ok(Err(e)) => error!("Event {id} callback failed: {e:#}"),
                Err(_) => error!("Event {id} callback panicked"),
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ManualClock;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn create_test_clock() -> (ManualClock, RuntimeClock) {
        let wall = ManualClock::at(2026, 3, 1, 10, 0).expect("valid date");
        let runtime = RuntimeClock::new(wall.shared());
        (wall, runtime)
    }

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> EventCallback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = Rc::clone(&log);
        let make = move |name: &'static str| -> EventCallback {
            let log = Rc::clone(&handle);
            Box::new(move || -> Result<()> {
                log.borrow_mut().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_tick_credits_elapsed_wall_time() {
        let (wall, mut runtime) = create_test_clock();
        wall.advance_millis(1500);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 1500.0);
        wall.advance_millis(250);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 1750.0);
    }

    #[test]
    fn test_paused_tick_leaves_time_unchanged() {
        let (wall, mut runtime) = create_test_clock();
        wall.advance_millis(100);
        runtime.tick();
        runtime.pause();
        wall.advance_millis(60_000);
        assert_eq!(runtime.tick(), 0);
        assert_relative_eq!(runtime.internal_time(), 100.0);
    }

    #[test]
    fn test_resume_excludes_paused_interval() {
        let (wall, mut runtime) = create_test_clock();
        runtime.pause();
        wall.advance_millis(10_000);
        runtime.resume();
        wall.advance_millis(400);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 400.0);
        assert!(!runtime.is_paused());
    }

    #[test]
    fn test_time_scale_is_clamped_and_applied() {
        let (wall, mut runtime) = create_test_clock();
        runtime.set_time_scale(10.0);
        assert_relative_eq!(runtime.time_scale(), MAX_TIME_SCALE);
        runtime.set_time_scale(0.0);
        assert_relative_eq!(runtime.time_scale(), MIN_TIME_SCALE);

        runtime.set_time_scale(0.5);
        wall.advance_millis(1000);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 500.0);
    }

    #[test]
    fn test_backwards_wall_clock_is_ignored() {
        let (wall, mut runtime) = create_test_clock();
        wall.advance_millis(-5000);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 0.0);
        wall.advance_millis(300);
        runtime.tick();
        assert_relative_eq!(runtime.internal_time(), 300.0);
    }

    #[test]
    fn test_events_fire_once_in_time_order() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        runtime.schedule_event(2000.0, make("late"));
        runtime.schedule_event(500.0, make("early"));
        runtime.schedule_event(900.0, make("middle"));
        runtime.schedule_event(9000.0, make("future"));

        wall.advance_millis(5000);
        assert_eq!(runtime.tick(), 3);
        assert_eq!(*log.borrow(), vec!["early", "middle", "late"]);

        wall.advance_millis(100);
        assert_eq!(runtime.tick(), 0);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(runtime.state().pending_events, 1);
    }

    #[test]
    fn test_event_fires_at_exact_boundary() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        runtime.schedule_event(1000.0, make("edge"));
        wall.advance_millis(999);
        runtime.tick();
        assert!(log.borrow().is_empty());
        wall.advance_millis(1);
        runtime.tick();
        assert_eq!(*log.borrow(), vec!["edge"]);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        let id = runtime.schedule_event(100.0, make("cancelled"));
        runtime.schedule_event(100.0, make("kept"));
        assert!(runtime.cancel_event(id));
        assert!(!runtime.cancel_event(id));

        wall.advance_millis(200);
        runtime.tick();
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let (wall, mut runtime) = create_test_clock();
        let (_log, make) = recorder();
        let id = runtime.schedule_event(0.0, make("now"));
        wall.advance_millis(1);
        runtime.tick();
        assert!(!runtime.cancel_event(id));
    }

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        runtime.schedule_event(
            10.0,
            Box::new(|| -> Result<()> { anyhow::bail!("callback failure") }),
        );
        runtime.schedule_event(20.0, Box::new(|| -> Result<()> { panic!("callback panic") }));
        runtime.schedule_event(30.0, make("survivor"));

        wall.advance_millis(100);
        assert_eq!(runtime.tick(), 3);
        assert_eq!(*log.borrow(), vec!["survivor"]);
        assert_eq!(runtime.state().pending_events, 0);
    }

    #[test]
    fn test_schedule_after_is_relative() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        wall.advance_millis(1000);
        runtime.tick();
        runtime.schedule_after(500.0, make("relative"));
        wall.advance_millis(400);
        runtime.tick();
        assert!(log.borrow().is_empty());
        wall.advance_millis(100);
        runtime.tick();
        assert_eq!(*log.borrow(), vec!["relative"]);
    }

    #[test]
    fn test_reset_discards_pending_without_running() {
        let (wall, mut runtime) = create_test_clock();
        let (log, make) = recorder();
        runtime.schedule_event(100.0, make("dropped"));
        wall.advance_millis(50);
        runtime.tick();
        runtime.pause();

        runtime.reset();
        let state = runtime.state();
        assert_relative_eq!(state.internal_time, 0.0);
        assert!(!state.paused);
        assert_eq!(state.pending_events, 0);

        wall.advance_millis(1000);
        runtime.tick();
        assert!(log.borrow().is_empty());
        assert_relative_eq!(runtime.internal_time(), 1000.0);
    }

    #[test]
    fn test_config_sets_scale() {
        let wall = ManualClock::at(2026, 3, 1, 10, 0).expect("valid date");
        let config = ClockConfig {
            time_scale: 1.5,
            ..ClockConfig::default()
        };
        let runtime = RuntimeClock::with_config(wall.shared(), &config);
        assert_relative_eq!(runtime.time_scale(), 1.5);
    }
}
