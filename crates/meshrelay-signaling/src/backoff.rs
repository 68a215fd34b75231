//! Reconnect backoff schedule: exponential with jitter, base 1 s, cap
//! 30 s, unlimited attempts (spec §4.3, §5, scenario S6).

use std::time::Duration;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(30);
const JITTER_CEILING: Duration = Duration::from_millis(300);

/// Tracks the reconnect attempt counter and produces the delay before
/// the next attempt. The counter resets to 0 on a successful open.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// A fresh backoff with no recorded attempts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next reconnect attempt, incrementing the
    /// internal attempt counter. `1 * 2^attempt` capped at 30 s, plus a
    /// flat jitter of up to 300 ms (spec S6: "waits 1 s (+≤0.3 s
    /// jitter)").
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(5); // 1 * 2^5 = 32s already exceeds CAP
        self.attempt = self.attempt.saturating_add(1);

        let unjittered = BASE.checked_mul(1u32 << exponent).unwrap_or(CAP).min(CAP);
        let jitter_millis = rand::random::<u64>() % (JITTER_CEILING.as_millis() as u64 + 1);

        unjittered + Duration::from_millis(jitter_millis)
    }

    /// Reset the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failed attempts recorded so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt
    }
}
