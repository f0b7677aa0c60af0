//! Connection health and reset configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const fn default_error_threshold() -> u32 {
    3
}

const fn default_reset_cooldown_ms() -> u64 {
    30_000
}

const fn default_reset_settle_ms() -> u64 {
    1_000
}

const fn default_check_interval_ms() -> u64 {
    60_000
}

const fn default_middleware_settle_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthSettings {
    /// Exhausted retry sequences in a row before the connection is reset.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Minimum time between two completed resets.
    #[serde(default = "default_reset_cooldown_ms")]
    pub reset_cooldown_ms: u64,

    /// Pause between disconnect and reconnect when resetting after exhausted retries.
    #[serde(default = "default_reset_settle_ms")]
    pub reset_settle_ms: u64,

    /// Interval between liveness pings issued by the request middleware.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Pause between disconnect and reconnect in the middleware, and the wait
    /// applied to requests that find a reset already in flight.
    #[serde(default = "default_middleware_settle_ms")]
    pub middleware_settle_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            reset_cooldown_ms: default_reset_cooldown_ms(),
            reset_settle_ms: default_reset_settle_ms(),
            check_interval_ms: default_check_interval_ms(),
            middleware_settle_ms: default_middleware_settle_ms(),
        }
    }
}

impl HealthSettings {
    pub const fn reset_cooldown(&self) -> Duration {
        Duration::from_millis(self.reset_cooldown_ms)
    }

    pub const fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub const fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub const fn middleware_settle(&self) -> Duration {
        Duration::from_millis(self.middleware_settle_ms)
    }
}
