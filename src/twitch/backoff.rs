use std::time::Duration;

use crate::config::BackoffConfig;

/// Reconnect delay bookkeeping for the session loop.
///
/// The wait before the k-th consecutive retry is `base ^ k` seconds, clamped
/// to `max`. A completed scheduler round resets the escalation, so one fault
/// after a stable run waits `base ^ 1` again.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_secs: u64,
    max_secs: u64,
    attempt: u32,
    consecutive_successes: u32,
}

impl Backoff {
    pub fn new(base_secs: u64, max_secs: u64) -> Self {
        Self {
            base_secs,
            max_secs,
            attempt: 0,
            consecutive_successes: 0,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_secs, config.max_secs)
    }

    /// Records a transport fault and returns how long to wait before reconnecting.
    pub fn on_fault(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.consecutive_successes = 0;
        self.interval()
    }

    /// Records one full scheduler round that finished without a fault.
    pub fn on_stable_round(&mut self) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        if self.attempt != 0 {
            tracing::debug!(
                previous_attempt = self.attempt,
                "Connection stable, resetting reconnect backoff"
            );
            self.attempt = 0;
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Rounds completed since the last fault.
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// The current delay. With no fault recorded this is the base delay.
    pub fn interval(&self) -> Duration {
        let secs = self
            .base_secs
            .checked_pow(self.attempt.max(1))
            .unwrap_or(u64::MAX)
            .min(self.max_secs);
        Duration::from_secs(secs)
    }
}
