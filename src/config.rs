//! Ambient configuration: the reported server version and the retry policy
//! [`crate::client::Client::retry`] applies to transient errors.
//!
//! Grounded on the teacher library's `SERVER_VERSION` constant
//! (`proto::SERVER_VERSION`), repurposed here as the version this emulator
//! reports through the four-letter `envi` command (SPEC_FULL §7).

use std::time::Duration;

/// The `(major, minor, patch)` version this emulator claims to be, as
/// reported by the `envi` four-letter command.
pub const SERVER_VERSION: (u16, u16, u16) = (3, 4, 0);

/// Governs [`crate::client::Client::retry`]: how many times a transient
/// error is retried, and the exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: f64,
}

impl RetryPolicy {
    /// The delay before the `attempt`-th retry (0-indexed), capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_tries: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            backoff: 2.0,
        }
    }
}

/// Top-level configuration for a [`crate::client::Client`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub server_version: (u16, u16, u16),
    pub retry_policy: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_version: SERVER_VERSION,
            retry_policy: RetryPolicy::default(),
        }
    }
}
