//! Transient error classification and exponential backoff.
//!
//! Connection drops, pooler hiccups, prepared-statement clashes after a
//! pooler reconnect, server shutdowns and libSQL lock contention all resolve
//! on their own. Everything else should reach the caller at once.
//!
//! # Backoff Schedule (defaults)
//!
//! | Attempt | Base delay | With jitter `[0, 100ms)` |
//! |---------|-----------|--------------------------|
//! | 1       | 400ms     | 400-500ms                |
//! | 2       | 800ms     | 800-900ms                |
//! | 3       | 1600ms    | 1600-1700ms              |
//! | 4       | 3200ms    | 3200-3300ms              |
//! | 5+      | 5000ms    | 5000-5100ms              |

use std::time::Duration;

use taskhub_config::RetrySettings;

use crate::error::{DatabaseError, DatabaseErrorKind};

/// Delay before the first retry; doubled for every further attempt.
pub const INITIAL_DELAY: Duration = Duration::from_millis(200);

/// Cap on the exponential part of the delay.
pub const MAX_DELAY: Duration = Duration::from_secs(5);

/// Exclusive upper bound of the random jitter.
pub const MAX_JITTER: Duration = Duration::from_millis(100);

/// Lower-cased markers of transient failures.
///
/// Postgres SQLSTATE codes cover errors relayed through a pooled Postgres
/// backend; the libSQL/Turso messages cover cloud node recycling and local
/// lock contention.
pub const TRANSIENT_MARKERS: &[&str] = &[
    // prepared statement does not exist / already exists
    "26000",
    "42p05",
    "prepared statement",
    // connection exceptions
    "08000",
    "08001",
    "08003",
    "08004",
    "08006",
    "08p01",
    // admin shutdown, crash shutdown, cannot connect now
    "57p01",
    "57p02",
    "57p03",
    "shutting down",
    "connection",
    "pool",
    "pgbouncer",
    "unable to acquire shared lock",
    "deletion must be in progress",
    "database is locked",
];

/// Configuration for retry behavior on transient database errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum exponential delay between retries (jitter comes on top).
    pub max_delay: Duration,
    /// Exclusive upper bound of the uniform jitter.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: taskhub_config::DEFAULT_MAX_RETRIES,
            base_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            jitter: MAX_JITTER,
        }
    }
}

impl RetryConfig {
    /// Build from loaded settings. The attempt budget is never below one.
    pub fn from_settings(settings: &RetrySettings, production: bool) -> Self {
        Self {
            max_retries: settings.max_retries_for(production).max(1),
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            jitter: settings.jitter(),
        }
    }

    /// `min(base_delay * 2^attempt, max_delay)`, saturating at the cap.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Exponential delay plus uniform jitter in `[0, jitter)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.exponential_delay(attempt) + random_jitter(self.jitter)
    }
}

/// Backoff delay for `attempt` using the default constants.
pub fn backoff_delay(attempt: u32) -> Duration {
    RetryConfig::default().delay_for(attempt)
}

fn random_jitter(bound: Duration) -> Duration {
    let bound_us = u64::try_from(bound.as_micros()).unwrap_or(u64::MAX);
    if bound_us == 0 {
        return Duration::ZERO;
    }
    // No entropy means no jitter, not a failed query.
    let sample = getrandom::u64().unwrap_or(0);
    Duration::from_micros(sample % bound_us)
}

/// Classify a free-form error message by marker lookup.
///
/// Matching is case-insensitive. Messages with no marker are `Unknown`.
pub fn classify_message(message: &str) -> DatabaseErrorKind {
    let msg = message.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker)) {
        DatabaseErrorKind::Transient
    } else {
        DatabaseErrorKind::Unknown
    }
}

/// Whether the executor should back off and try `error` again.
pub fn is_retryable(error: &DatabaseError) -> bool {
    error.is_transient()
}
