//! Scroll event coalescing
//!
//! Scroll offsets arrive far faster than the grid needs to recompute its
//! windows. [`ScrollThrottle`] lets at most one offset through per cadence
//! window and keeps only the newest offset seen in between, so the final
//! resting position is never lost.

use std::time::{Duration, Instant};

/// Default recompute cadence (roughly one display frame)
pub const DEFAULT_SCROLL_CADENCE: Duration = Duration::from_millis(16);

/// Coalesces bursts of scroll offsets into at most one per cadence
///
/// Time is passed in explicitly so callers (and tests) control the clock.
///
/// # Example
///
/// ```
/// use clipgrid_scheduler::ScrollThrottle;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let mut throttle = ScrollThrottle::new(Duration::from_millis(16));
///
/// assert_eq!(throttle.offer(100.0, start), Some(100.0));
/// assert_eq!(throttle.offer(120.0, start + Duration::from_millis(4)), None);
/// assert_eq!(throttle.offer(140.0, start + Duration::from_millis(8)), None);
///
/// // Trailing edge delivers the newest offset
/// assert_eq!(throttle.poll(start + Duration::from_millis(16)), Some(140.0));
/// ```
#[derive(Debug, Clone)]
pub struct ScrollThrottle {
    cadence: Duration,
    last_emit: Option<Instant>,
    pending: Option<f64>,
    coalesced: u64,
}

impl ScrollThrottle {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            last_emit: None,
            pending: None,
            coalesced: 0,
        }
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Offer a new offset.
    ///
    /// Returns the offset to apply now, or `None` when it was held back
    /// for the trailing edge.
    pub fn offer(&mut self, offset: f64, now: Instant) -> Option<f64> {
        if self.window_open(now) {
            self.pending = None;
            self.last_emit = Some(now);
            return Some(offset);
        }
        if self.pending.replace(offset).is_some() {
            self.coalesced += 1;
        }
        None
    }

    /// Flush the held offset once its window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        if self.pending.is_none() || !self.window_open(now) {
            return None;
        }
        self.last_emit = Some(now);
        self.pending.take()
    }

    /// When the held offset becomes deliverable, if one is held
    pub fn next_due(&self) -> Option<Instant> {
        self.pending?;
        self.last_emit.map(|at| at + self.cadence)
    }

    /// Drop the held offset without delivering it
    pub fn discard(&mut self) -> Option<f64> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of offsets overwritten before they were delivered
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    fn window_open(&self, now: Instant) -> bool {
        match self.last_emit {
            Some(at) => now.saturating_duration_since(at) >= self.cadence,
            None => true,
        }
    }
}

impl Default for ScrollThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_CADENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_offer_passes_through() {
        let mut throttle = ScrollThrottle::default();
        assert_eq!(throttle.offer(10.0, Instant::now()), Some(10.0));
        assert!(!throttle.has_pending());
    }

    #[test]
    fn test_burst_is_coalesced_to_latest() {
        let start = Instant::now();
        let mut throttle = ScrollThrottle::new(ms(16));

        assert_eq!(throttle.offer(0.0, start), Some(0.0));
        for (i, offset) in [10.0, 20.0, 30.0, 40.0].into_iter().enumerate() {
            assert_eq!(throttle.offer(offset, start + ms(i as u64 + 1)), None);
        }

        assert_eq!(throttle.coalesced(), 3);
        assert_eq!(throttle.next_due(), Some(start + ms(16)));
        assert_eq!(throttle.poll(start + ms(10)), None);
        assert_eq!(throttle.poll(start + ms(16)), Some(40.0));
        assert_eq!(throttle.poll(start + ms(40)), None);
    }

    #[test]
    fn test_offer_after_window_passes_and_drops_pending() {
        let start = Instant::now();
        let mut throttle = ScrollThrottle::new(ms(16));

        throttle.offer(0.0, start);
        throttle.offer(50.0, start + ms(5));
        assert!(throttle.has_pending());

        assert_eq!(throttle.offer(80.0, start + ms(20)), Some(80.0));
        assert!(!throttle.has_pending());
        assert_eq!(throttle.next_due(), None);
    }

    #[test]
    fn test_discard_drops_held_offset() {
        let start = Instant::now();
        let mut throttle = ScrollThrottle::new(ms(16));
        throttle.offer(10.0, start);
        throttle.offer(20.0, start + ms(2));

        assert_eq!(throttle.discard(), Some(20.0));
        assert_eq!(throttle.poll(start + ms(40)), None);
        assert_eq!(throttle.next_due(), None);
    }

    #[test]
    fn test_zero_cadence_never_holds() {
        let start = Instant::now();
        let mut throttle = ScrollThrottle::new(Duration::ZERO);

        assert_eq!(throttle.offer(1.0, start), Some(1.0));
        assert_eq!(throttle.offer(2.0, start), Some(2.0));
        assert_eq!(throttle.coalesced(), 0);
    }
}
