//! Retry delays for the accept loop.

use std::time::Duration;

const FLOOR: Duration = Duration::from_millis(1);

/// Exponential back-off applied when `accept()` fails.
///
/// Consecutive failures wait `initial_delay`, then twice that, and so on up
/// to `max_delay`. A successful accept starts over from `initial_delay`.
/// Defaults are 10 ms and 1 s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Wait after the first failure in a row.
    pub initial_delay: Duration,
    /// Longest wait between retries.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Raise both delays to at least 1 ms and put the smaller one first.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use framepipe::server::BackoffConfig;
    ///
    /// let backoff = BackoffConfig {
    ///     initial_delay: Duration::from_secs(3),
    ///     max_delay: Duration::ZERO,
    /// }
    /// .normalized();
    /// assert_eq!(backoff.initial_delay, Duration::from_millis(1));
    /// assert_eq!(backoff.max_delay, Duration::from_secs(3));
    /// ```
    #[must_use]
    pub fn normalized(self) -> Self {
        let a = self.initial_delay.max(FLOOR);
        let b = self.max_delay.max(FLOOR);
        Self {
            initial_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    /// Delay to use after `current` failed again.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }

    /// Begin tracking a run of failures.
    pub(super) fn start(self) -> Backoff {
        let config = self.normalized();
        Backoff {
            current: config.initial_delay,
            config,
        }
    }
}

/// Delay state carried across accept attempts.
#[derive(Debug)]
pub(super) struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Forget earlier failures.
    pub(super) fn reset(&mut self) { self.current = self.config.initial_delay; }

    /// How long to wait after this failure. The next call returns a longer
    /// delay until [`reset`](Self::reset).
    pub(super) fn failed(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.config.next_delay(wait);
        wait
    }
}
