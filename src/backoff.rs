//! Capped exponential delay for loops that never give up
//!
//! Each consecutive failure doubles the wait up to `max`; a success resets
//! it. There is no attempt limit: the chat command loop keeps polling at the
//! cap for as long as the process runs.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    consecutive_failures: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            consecutive_failures: 0,
        }
    }

    /// Wait to use after the next failure; advances the failure count
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2_u32.saturating_pow(self.consecutive_failures.min(31));
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    /// Upper bound for any wait, including server-provided hints
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_never_runs_out_of_attempts() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..1000 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.consecutive_failures(), 1001);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(8));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
