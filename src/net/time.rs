//! Timer bookkeeping for the reactor's housekeeping pass.
//!
//! Adapted from the teacher's `TimeoutManager`: where that type tracked a
//! custom wall-clock `LocalTime` (guarding against `SystemTime` going
//! backwards), this one tracks `Instant`, which is monotonic by
//! construction, so the backwards-clock guard is unnecessary here.
use std::time::{Duration, Instant};

/// Tracks per-key wake-up times and reports the next one due.
///
/// Used by the reactor to bound its `popol::Sources::wait_timeout` call
/// tightly around the next reconnect attempt, instead of always blocking
/// for the full second allowed by §4.3.
pub struct TimeoutManager<K> {
    timeouts: Vec<(K, Instant)>,
}

impl<K: PartialEq> TimeoutManager<K> {
    pub fn new() -> Self {
        Self { timeouts: Vec::new() }
    }

    /// Register (or replace) the wake-up time for `key`.
    pub fn register(&mut self, key: K, at: Instant) {
        self.timeouts.retain(|(k, _)| k != &key);
        self.timeouts.push((key, at));
    }

    /// Stop tracking `key`, if present.
    pub fn unregister(&mut self, key: &K) {
        self.timeouts.retain(|(k, _)| k != key);
    }

    /// Duration until the earliest registered wake-up, if any.
    pub fn next(&self, now: Instant) -> Option<Duration> {
        self.timeouts
            .iter()
            .map(|(_, at)| at.saturating_duration_since(now))
            .min()
    }
}
