//! Reconnection backoff schedule.

use std::time::Duration;

/// Exponential backoff without jitter.
///
/// Attempt `n` (starting at 0) waits `min(base * 2^n, max)`. The counter
/// advances on every unsuccessful open and resets on a successful one.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Delay for the current attempt without advancing.
    pub fn peek_delay(&self) -> Duration {
        let exponent = self.attempt.min(63);
        let delay = self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        Duration::from_millis(delay)
    }

    /// Delay for the current attempt, then advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(1000, 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();

        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek_delay(), Duration::from_millis(8000));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_large_attempt_saturates_at_cap() {
        let mut backoff = Backoff::new(1000, 30_000);
        for _ in 0..200 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_custom_base_and_cap() {
        let mut backoff = Backoff::new(10, 50);
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
