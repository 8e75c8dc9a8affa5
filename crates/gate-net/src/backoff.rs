//! Capped exponential backoff for transient accept errors.

use std::time::Duration;

/// First delay after a transient accept failure.
pub const INITIAL_DELAY: Duration = Duration::from_millis(5);
/// Upper bound on the delay between retries.
pub const MAX_DELAY: Duration = Duration::from_secs(1);

/// Tracks consecutive accept failures.
///
/// The first failure waits [`INITIAL_DELAY`], every further one doubles the
/// wait up to [`MAX_DELAY`], and a successful accept resets the sequence.
#[derive(Debug, Default, Clone)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns how long to sleep before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => INITIAL_DELAY,
            Some(prev) => (prev * 2).min(MAX_DELAY),
        };
        self.current = Some(delay);
        delay
    }

    /// Records a success.
    pub fn reset(&mut self) {
        self.current = None;
    }
}
