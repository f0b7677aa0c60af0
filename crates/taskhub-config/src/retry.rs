//! Retry and backoff configuration for database operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt budget when running in production.
pub const PRODUCTION_MAX_RETRIES: u32 = 5;

/// Attempt budget everywhere else.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const fn default_base_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    5_000
}

const fn default_jitter_ms() -> u64 {
    100
}

const fn default_transaction_max_wait_ms() -> u64 {
    5_000
}

const fn default_transaction_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Explicit attempt budget. When unset, derived from the environment.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay before the first retry, doubled on each subsequent one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the exponential part of the delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound (exclusive) of the uniform jitter added to every delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// How long a transaction may wait to begin.
    #[serde(default = "default_transaction_max_wait_ms")]
    pub transaction_max_wait_ms: u64,

    /// How long a transaction may run, commit included.
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            transaction_max_wait_ms: default_transaction_max_wait_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
        }
    }
}

impl RetrySettings {
    /// Attempt budget for the given environment, honoring an explicit override.
    pub fn max_retries_for(&self, production: bool) -> u32 {
        self.max_retries.unwrap_or(if production {
            PRODUCTION_MAX_RETRIES
        } else {
            DEFAULT_MAX_RETRIES
        })
    }

    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub const fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub const fn transaction_max_wait(&self) -> Duration {
        Duration::from_millis(self.transaction_max_wait_ms)
    }

    pub const fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}
