//! Shared connection health and single-flight reset coordination.
//!
//! One [`ConnectionHealth`] exists per process. The safe executors report
//! exhausted retry sequences to it, and the HTTP health-check middleware asks
//! it to reset the connection when a liveness ping fails. Both paths go
//! through the same in-flight flag, so at most one disconnect/reconnect cycle
//! runs at a time no matter who triggered it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use taskhub_config::HealthSettings;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::DatabaseClient;
use crate::error::DatabaseError;

/// When to reset the connection after repeated retry exhaustion.
#[derive(Debug, Clone)]
pub struct ResetPolicy {
    /// Consecutive exhausted sequences that trigger a reset.
    pub error_threshold: u32,
    /// Minimum time between two completed resets.
    pub cooldown: Duration,
    /// Pause between disconnect and reconnect.
    pub settle: Duration,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            cooldown: Duration::from_secs(30),
            settle: Duration::from_secs(1),
        }
    }
}

impl ResetPolicy {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self {
            error_threshold: settings.error_threshold.max(1),
            cooldown: settings.reset_cooldown(),
            settle: settings.reset_settle(),
        }
    }
}

/// Result of a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Disconnected and reconnected.
    Completed,
    /// Reconnect failed; the client is left disconnected.
    Failed,
    /// Another caller holds the reset; nothing was done.
    AlreadyInProgress,
}

/// Point-in-time view of the connection state, for logs and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub consecutive_errors: u32,
    pub resetting: bool,
    pub resets_completed: u64,
    /// `None` until the first completed reset.
    pub ms_since_last_reset: Option<u64>,
}

/// Milliseconds since `at`, saturating at `u64::MAX`.
#[must_use]
pub fn elapsed_ms(at: Instant) -> u64 {
    u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Process-wide connection state plus the reset procedure.
pub struct ConnectionHealth {
    client: Arc<dyn DatabaseClient>,
    policy: ResetPolicy,
    consecutive_errors: AtomicU32,
    resetting: AtomicBool,
    last_reset: Mutex<Option<Instant>>,
    resets_completed: AtomicU64,
}

/// Clears the in-flight flag on every exit path, cancellation included.
struct ResetGuard<'a>(&'a AtomicBool);

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ConnectionHealth {
    pub fn new(client: Arc<dyn DatabaseClient>, policy: ResetPolicy) -> Self {
        Self {
            client,
            policy,
            consecutive_errors: AtomicU32::new(0),
            resetting: AtomicBool::new(false),
            last_reset: Mutex::new(None),
            resets_completed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn DatabaseClient> {
        &self.client
    }

    #[must_use]
    pub const fn policy(&self) -> &ResetPolicy {
        &self.policy
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_resetting(&self) -> bool {
        self.resetting.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_reset(&self) -> Option<Instant> {
        *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn resets_completed(&self) -> u64 {
        self.resets_completed.load(Ordering::Acquire)
    }

    /// Run the client's liveness query.
    ///
    /// # Errors
    ///
    /// Whatever the client's ping returns.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        self.client.ping().await
    }

    /// Record an exhausted retry sequence and reset the connection if the
    /// threshold is reached and the cooldown has passed.
    ///
    /// Returns the reset outcome when a reset was attempted.
    pub async fn on_retry_exhausted(&self) -> Option<ResetOutcome> {
        let count = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        if count < self.policy.error_threshold {
            debug!(count, threshold = self.policy.error_threshold, "retry exhaustion recorded");
            return None;
        }
        if !self.cooldown_elapsed() {
            debug!(count, "reset threshold reached but still cooling down");
            return None;
        }
        warn!(count, "consecutive retry exhaustion, resetting database connection");
        Some(self.reset_connection().await)
    }

    /// Reset with the policy's settle pause.
    pub async fn reset_connection(&self) -> ResetOutcome {
        self.try_reset(self.policy.settle).await
    }

    /// Disconnect, wait `settle`, reconnect. Single-flight.
    ///
    /// Never returns an error: a failed reconnect is logged and reported as
    /// [`ResetOutcome::Failed`].
    pub async fn try_reset(&self, settle: Duration) -> ResetOutcome {
        if self
            .resetting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connection reset already in progress");
            return ResetOutcome::AlreadyInProgress;
        }
        let _guard = ResetGuard(&self.resetting);

        if let Err(error) = self.client.disconnect().await {
            warn!(%error, "disconnect failed during reset, reconnecting anyway");
        }
        tokio::time::sleep(settle).await;

        match self.client.connect().await {
            Ok(()) => {
                self.consecutive_errors.store(0, Ordering::Release);
                *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Instant::now());
                let total = self.resets_completed.fetch_add(1, Ordering::AcqRel) + 1;
                info!(settle_ms = settle.as_millis(), total, "database connection reset");
                ResetOutcome::Completed
            }
            Err(error) => {
                error!(%error, "database reconnect failed");
                ResetOutcome::Failed
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            consecutive_errors: self.consecutive_errors(),
            resetting: self.is_resetting(),
            resets_completed: self.resets_completed(),
            ms_since_last_reset: self.last_reset().map(elapsed_ms),
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_reset()
            .is_none_or(|at| at.elapsed() >= self.policy.cooldown)
    }
}
