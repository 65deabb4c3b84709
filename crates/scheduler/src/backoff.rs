//! Retry backoff for failed resource loads
//!
//! A load that fails is retried after an exponentially growing delay with
//! random jitter, up to a fixed number of attempts. Timers live in a
//! [`RetryQueue`] that the scheduler drains on each tick.

use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Default base delay before the first retry
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Default upper bound (exclusive) of the random jitter
pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(250);

/// Default number of failures after which an item stays in the error state
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff policy
///
/// The delay after the `n`th consecutive failure is `base * 2^(n-1)` plus a
/// uniformly random jitter in `[0, max_jitter)`.
///
/// # Example
///
/// ```
/// use clipgrid_scheduler::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.base_delay(1), Duration::from_millis(500));
/// assert_eq!(policy.base_delay(2), Duration::from_millis(1000));
/// assert!(policy.is_exhausted(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base: Duration,

    /// Exclusive upper bound of the added jitter
    pub max_jitter: Duration,

    /// Failures after which no further retry is scheduled
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_RETRY_BASE,
            max_jitter: DEFAULT_RETRY_JITTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_jitter: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_jitter,
            max_attempts,
        }
    }

    /// Deterministic part of the delay after `failure` consecutive failures.
    ///
    /// `failure` is 1-based; zero is treated as one.
    pub fn base_delay(&self, failure: u32) -> Duration {
        let exponent = failure.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Full delay including jitter drawn from `rng`
    pub fn delay_for<R: Rng + ?Sized>(&self, failure: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        self.base_delay(failure).saturating_add(jitter)
    }

    /// True once `failures` has reached the attempt limit
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Pending retry timers keyed by item id
///
/// At most one timer per id; scheduling again replaces the deadline.
#[derive(Debug)]
pub struct RetryQueue<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> RetryQueue<K> {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }

    /// Arm (or re-arm) the timer for `id`
    pub fn schedule(&mut self, id: K, at: Instant) {
        self.deadlines.insert(id, at);
    }

    /// Disarm the timer for `id`. Returns `true` if one was pending.
    pub fn cancel(&mut self, id: &K) -> bool {
        self.deadlines.remove(id).is_some()
    }

    /// Remove and return every id whose deadline is at or before `now`,
    /// earliest deadline first
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*at, id.clone()))
            .collect();
        due.sort_by_key(|(at, _)| *at);

        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn deadline_of(&self, id: &K) -> Option<Instant> {
        self.deadlines.get(id).copied()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.deadlines.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for RetryQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
