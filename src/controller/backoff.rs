//! # Fibonacci Backoff
//!
//! Progressive retry delay for Catalogs whose reconcile keeps failing.
//! Grows slower than exponential: 1m, 1m, 2m, 3m, 5m, 8m, then capped.

use std::time::Duration;

/// Fibonacci sequence in minutes, capped at `max_minutes`
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes: max_minutes.max(min_minutes),
        }
    }

    /// Current delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let seconds = self.current_minutes * 60;
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        seconds
    }

    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

/// Per-Catalog failure tracking used by the error policy
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    /// Record one more failure and return the delay before the next attempt
    pub fn increment_error(&mut self) -> Duration {
        self.error_count = self.error_count.saturating_add(1);
        self.backoff.next_backoff()
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_capped() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        let seconds: Vec<u64> = (0..9).map(|_| backoff.next_backoff_seconds()).collect();

        assert_eq!(seconds, vec![60, 60, 120, 180, 300, 480, 600, 600, 600]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
    }

    #[test]
    fn test_max_below_min_is_raised() {
        let mut backoff = FibonacciBackoff::new(5, 2);

        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_backoff_state_counts_errors() {
        let mut state = BackoffState::new(1, 10);

        assert_eq!(state.increment_error(), Duration::from_secs(60));
        assert_eq!(state.increment_error(), Duration::from_secs(60));
        assert_eq!(state.increment_error(), Duration::from_secs(120));
        assert_eq!(state.error_count, 3);

        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.increment_error(), Duration::from_secs(60));
    }
}
