//! # Fibonacci Backoff
//!
//! Progressive retry delays that grow more slowly than exponential backoff.
//! Used by the App error policy (per-App state) and by repository index
//! downloads.
//!
//! ```rust
//! use app_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(60, 600);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 120);
//! assert_eq!(backoff.next_backoff_seconds(), 180);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator in whole seconds, capped at a maximum
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// App reconcile errors: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max)
    #[must_use]
    pub fn for_reconcile_errors() -> Self {
        Self::new(60, 600)
    }

    /// Index downloads: 1s, 1s, 2s, 3s, 5s, 8s, 10s (max)
    #[must_use]
    pub fn for_http_retries() -> Self {
        Self::new(1, 10)
    }

    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs.min(max_secs),
            max_secs,
        }
    }

    /// Current delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        result
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a success
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs.min(self.max_secs);
    }
}
