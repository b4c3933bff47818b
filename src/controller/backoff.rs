//! # Fibonacci Backoff
//!
//! Progressive retry intervals for reconciliation errors.
//!
//! The sequence in minutes is `min, min, 2*min, 3*min, 5*min, ...` capped at `max`.

/// Stateful Fibonacci backoff for one resource
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            min_minutes,
            max_minutes: max_minutes.max(min_minutes),
            previous: 0,
            current: min_minutes,
        }
    }

    /// Next interval in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let minutes = self.current.min(self.max_minutes);
        if self.current < self.max_minutes {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        minutes.saturating_mul(60)
    }

    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_minutes;
    }

    /// Interval for the `error_count`-th consecutive error (0-indexed)
    pub fn calculate_for_error_count(
        error_count: u32,
        min_minutes: u64,
        max_minutes: u64,
    ) -> std::time::Duration {
        let mut backoff = Self::new(min_minutes, max_minutes);
        let mut seconds = backoff.next_backoff_seconds();
        for _ in 0..error_count {
            seconds = backoff.next_backoff_seconds();
        }
        std::time::Duration::from_secs(seconds)
    }
}

/// Per-resource error tracking used by the error policy
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}
