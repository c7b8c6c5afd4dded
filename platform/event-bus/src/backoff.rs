//! Bounded exponential backoff for polling loops
//!
//! Poll loops (outbox relay, worker consume loops) sleep briefly after a busy
//! pass and back off exponentially after consecutive empty passes so idle
//! services do not hammer the database or the bus.

use std::time::Duration;

/// Bounded exponential backoff driven by empty/busy poll outcomes
///
/// Growth factor is 1.5× per consecutive empty pass, capped at `max`.
///
/// # Example
/// ```rust
/// use event_bus::PollBackoff;
/// use std::time::Duration;
///
/// let mut backoff = PollBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
/// assert_eq!(backoff.next_empty(), Duration::from_secs(5));
/// backoff.reset();
/// ```
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max: Duration,
    consecutive_empty: u32,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            consecutive_empty: 0,
        }
    }

    /// Record an empty pass and return how long to sleep before the next one
    pub fn next_empty(&mut self) -> Duration {
        let exponent = self.consecutive_empty.min(5);
        self.consecutive_empty = self.consecutive_empty.saturating_add(1);
        let factor = 1.5f64.powi(exponent as i32);
        let delay = self.base.mul_f64(factor);
        delay.min(self.max)
    }

    /// Record a busy pass; the next empty pass starts from the base interval
    pub fn reset(&mut self) {
        self.consecutive_empty = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_cap() {
        let mut backoff = PollBackoff::new(Duration::from_secs(5), Duration::from_secs(30));

        assert_eq!(backoff.next_empty(), Duration::from_secs(5));
        assert_eq!(backoff.next_empty(), Duration::from_millis(7500));
        assert_eq!(backoff.next_empty(), Duration::from_millis(11250));

        // Keep polling empty; the delay never exceeds the cap
        for _ in 0..10 {
            assert!(backoff.next_empty() <= Duration::from_secs(30));
        }
        assert_eq!(backoff.next_empty(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset_on_busy_pass() {
        let mut backoff = PollBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
        backoff.next_empty();
        backoff.next_empty();
        backoff.reset();
        assert_eq!(backoff.next_empty(), Duration::from_secs(5));
    }
}
