//! Safe query and transaction execution.
//!
//! Service code hands its database work to [`SafeExecutor`] instead of
//! calling the client directly. Transient failures are retried with
//! exponential backoff; anything else is returned on the first failure.
//! A sequence that spends its whole budget is reported to
//! [`ConnectionHealth`], which may reset the connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use taskhub_config::RetrySettings;
use tracing::{debug, error, warn};

use crate::error::{DatabaseError, TransactionPhase};
use crate::health::ConnectionHealth;
use crate::retry::{RetryConfig, is_retryable};

const BEGIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Hard caps applied to every safe transaction.
#[derive(Debug, Clone, Copy)]
pub struct TransactionBounds {
    /// How long to wait for the transaction to begin.
    pub max_wait: Duration,
    /// How long the callback plus commit may take.
    pub timeout: Duration,
}

impl Default for TransactionBounds {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

impl TransactionBounds {
    pub const fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_wait: settings.transaction_max_wait(),
            timeout: settings.transaction_timeout(),
        }
    }
}

/// Retry loop shared by queries and transactions.
#[derive(Clone)]
pub struct SafeExecutor {
    config: RetryConfig,
    health: Arc<ConnectionHealth>,
}

impl SafeExecutor {
    pub const fn new(config: RetryConfig, health: Arc<ConnectionHealth>) -> Self {
        Self { config, health }
    }

    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub const fn health(&self) -> &Arc<ConnectionHealth> {
        &self.health
    }

    /// Start a fresh attempt counter for one logical operation.
    pub const fn begin<'a>(&'a self, context: &'a str) -> RetryAttempt<'a> {
        RetryAttempt {
            executor: self,
            context,
            attempt: 0,
            last_error: None,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or the last transient error once
    /// `max_retries` attempts have failed. Errors are never rewritten.
    pub async fn execute_safe_query<T, F, Fut>(
        &self,
        context: Option<&str>,
        mut operation: F,
    ) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let mut attempt = self.begin(context.unwrap_or("query"));
        while attempt.has_budget() {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => attempt.record_failure(error).await?,
            }
        }
        Err(attempt.exhausted().await)
    }
}

/// Per-call retry state: the attempt number and the last error seen.
pub struct RetryAttempt<'a> {
    executor: &'a SafeExecutor,
    context: &'a str,
    attempt: u32,
    last_error: Option<DatabaseError>,
}

impl RetryAttempt<'_> {
    /// Failed attempts so far.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn has_budget(&self) -> bool {
        self.attempt < self.executor.config.max_retries
    }

    /// Absorb a failure. Retryable errors are stored and followed by a
    /// backoff sleep; anything else comes straight back as `Err`.
    ///
    /// # Errors
    ///
    /// Returns `error` unchanged when it is not retryable.
    pub async fn record_failure(&mut self, error: DatabaseError) -> Result<(), DatabaseError> {
        if !is_retryable(&error) {
            debug!(context = self.context, %error, "non-retryable database error");
            return Err(error);
        }
        self.attempt += 1;
        let delay = self.executor.config.delay_for(self.attempt);
        warn!(
            context = self.context,
            attempt = self.attempt,
            max_retries = self.executor.config.max_retries,
            delay_ms = delay.as_millis(),
            %error,
            "transient database error, retrying"
        );
        self.last_error = Some(error);
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Report exhaustion to the connection health coordinator and hand back
    /// the last error.
    pub async fn exhausted(self) -> DatabaseError {
        error!(
            context = self.context,
            attempts = self.attempt,
            "database retry budget exhausted"
        );
        self.executor.health.on_retry_exhausted().await;
        self.last_error.unwrap_or_else(|| {
            DatabaseError::InvalidState(format!("{}: retry budget allowed no attempts", self.context))
        })
    }
}

/// One bounded transaction attempt on `conn`, which should be dedicated to it.
///
/// The callback error (or a timeout) rolls the transaction back; success
/// commits it.
pub(crate) async fn run_transaction<T, F>(
    conn: &libsql::Connection,
    bounds: TransactionBounds,
    operation: &mut F,
) -> Result<T, DatabaseError>
where
    F: for<'t> FnMut(&'t libsql::Transaction) -> BoxFuture<'t, Result<T, DatabaseError>>,
{
    let tx = tokio::time::timeout(bounds.max_wait, begin_immediate(conn))
        .await
        .map_err(|_| DatabaseError::TransactionTimeout {
            phase: TransactionPhase::Begin,
            limit: bounds.max_wait,
        })??;

    let deadline = tokio::time::Instant::now() + bounds.timeout;
    let body_timeout = || DatabaseError::TransactionTimeout {
        phase: TransactionPhase::Body,
        limit: bounds.timeout,
    };

    let result = tokio::time::timeout_at(deadline, operation(&tx)).await;
    let value = match result {
        Ok(Ok(value)) => value,
        Ok(Err(error)) => {
            rollback(tx).await;
            return Err(error);
        }
        Err(_) => {
            rollback(tx).await;
            return Err(body_timeout());
        }
    };

    tokio::time::timeout_at(deadline, tx.commit())
        .await
        .map_err(|_| body_timeout())??;
    Ok(value)
}

/// `BEGIN IMMEDIATE`, polling while another connection holds the write lock.
///
/// Taking the write lock up front means a transaction waits here for a
/// competing writer instead of failing halfway through its body.
async fn begin_immediate(conn: &libsql::Connection) -> Result<libsql::Transaction, DatabaseError> {
    loop {
        match conn
            .transaction_with_behavior(libsql::TransactionBehavior::Immediate)
            .await
        {
            Ok(tx) => return Ok(tx),
            Err(e) => {
                let error = DatabaseError::from(e);
                if !error.is_transient() {
                    return Err(error);
                }
                debug!(%error, "write lock busy, waiting to begin transaction");
                tokio::time::sleep(BEGIN_POLL_INTERVAL).await;
            }
        }
    }
}

async fn rollback(tx: libsql::Transaction) {
    if let Err(error) = tx.rollback().await {
        warn!(%error, "transaction rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ResetPolicy;
    use crate::test_support::FakeClient;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn test_executor(max_retries: u32) -> (SafeExecutor, Arc<FakeClient>) {
        let client = Arc::new(FakeClient::default());
        let health = Arc::new(ConnectionHealth::new(client.clone(), ResetPolicy::default()));
        let config = RetryConfig {
            max_retries,
            ..Default::default()
        };
        (SafeExecutor::new(config, health), client)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_runs_once() {
        let (executor, _) = test_executor(3);
        let calls = AtomicU32::new(0);

        let value = executor
            .execute_safe_query(None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DatabaseError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.health().consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_budget() {
        let (executor, client) = test_executor(3);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute_safe_query(Some("list projects"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DatabaseError::Query("connection reset".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "Query failed: connection reset");
        assert_eq!(executor.health().consecutive_errors(), 1);
        // One exhaustion is below the reset threshold.
        assert_eq!(client.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn production_budget_is_five_calls() {
        let (executor, _) = test_executor(5);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute_safe_query(None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DatabaseError::Connection("pool timed out".into()))
            })
            .await;

        assert!(matches!(result, Err(DatabaseError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_without_delay() {
        let (executor, _) = test_executor(3);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = executor
            .execute_safe_query(None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DatabaseError::Query("validation failed".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(err.to_string(), "Query failed: validation failed");
        assert_eq!(executor.health().consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_one_transient_failure() {
        let (executor, _) = test_executor(3);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let value = executor
            .execute_safe_query(None, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DatabaseError::Query("57P01 admin shutdown".into()))
                } else {
                    Ok("ok")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // One backoff of attempt 1: 400ms plus jitter.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(400) && waited < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn third_exhaustion_resets_connection() {
        let (executor, client) = test_executor(2);

        for _ in 0..3 {
            let _ = executor
                .execute_safe_query(None, || async {
                    Err::<(), _>(DatabaseError::Connection("server closed the connection".into()))
                })
                .await;
        }

        assert_eq!(client.disconnects(), 1);
        assert_eq!(client.connects(), 1);
        assert_eq!(executor.health().consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_tracks_failures() {
        let (executor, _) = test_executor(2);
        let mut attempt = executor.begin("manual");
        assert!(attempt.has_budget());

        attempt
            .record_failure(DatabaseError::Connection("dropped".into()))
            .await
            .unwrap();
        assert_eq!(attempt.number(), 1);

        let permanent = attempt.record_failure(DatabaseError::NoResult).await;
        assert!(matches!(permanent, Err(DatabaseError::NoResult)));
        assert_eq!(attempt.number(), 1);
    }
}
