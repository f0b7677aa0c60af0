//! # taskhub-db
//!
//! Connection-resilient libSQL access for the Taskhub backend.
//!
//! Route handlers call service functions, and service functions run their
//! database work through [`TaskDb::execute_safe_query`] or
//! [`TaskDb::execute_safe_transaction`] rather than touching the connection
//! directly. Transient failures (dropped connections, pooler errors, lock
//! contention) are retried with exponential backoff; repeated exhaustion
//! resets the shared connection through [`health::ConnectionHealth`].

pub mod client;
pub mod error;
pub mod executor;
pub mod health;
pub mod retry;

#[cfg(test)]
mod test_support;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use taskhub_config::TaskhubConfig;

use client::{DatabaseClient, LibsqlClient};
use error::DatabaseError;
use executor::{SafeExecutor, TransactionBounds, run_transaction};
use health::{ConnectionHealth, ResetPolicy};
use retry::RetryConfig;

/// Central database handle for the Taskhub backend.
///
/// Owns the shared libSQL client, the process-wide [`ConnectionHealth`] and
/// the retrying executor. Cheap to share behind an `Arc`.
pub struct TaskDb {
    client: Arc<LibsqlClient>,
    health: Arc<ConnectionHealth>,
    executor: SafeExecutor,
    transaction_bounds: TransactionBounds,
}

impl TaskDb {
    /// Open the configured database with the configured retry and reset policy.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or connected.
    pub async fn open(config: &TaskhubConfig) -> Result<Self, DatabaseError> {
        let client = LibsqlClient::open(&config.database).await?;
        Ok(Self::from_parts(
            Arc::new(client),
            RetryConfig::from_settings(&config.retry, config.general.is_production()),
            ResetPolicy::from_settings(&config.health),
            TransactionBounds::from_settings(&config.retry),
        ))
    }

    /// Open a local database with default policies.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let client = LibsqlClient::open_local(path).await?;
        Ok(Self::from_parts(
            Arc::new(client),
            RetryConfig::default(),
            ResetPolicy::default(),
            TransactionBounds::default(),
        ))
    }

    /// Assemble from an existing client and explicit policies.
    pub fn from_parts(
        client: Arc<LibsqlClient>,
        retry: RetryConfig,
        reset: ResetPolicy,
        transaction_bounds: TransactionBounds,
    ) -> Self {
        let shared: Arc<dyn DatabaseClient> = client.clone();
        let health = Arc::new(ConnectionHealth::new(shared, reset));
        let executor = SafeExecutor::new(retry, health.clone());
        Self {
            client,
            health,
            executor,
            transaction_bounds,
        }
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<LibsqlClient> {
        &self.client
    }

    #[must_use]
    pub const fn health(&self) -> &Arc<ConnectionHealth> {
        &self.health
    }

    #[must_use]
    pub const fn executor(&self) -> &SafeExecutor {
        &self.executor
    }

    #[must_use]
    pub const fn transaction_bounds(&self) -> TransactionBounds {
        self.transaction_bounds
    }

    /// The live connection, for use inside a safe query closure.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Connection` while the client is disconnected.
    pub fn connection(&self) -> Result<libsql::Connection, DatabaseError> {
        self.client.connection()
    }

    /// See [`SafeExecutor::execute_safe_query`].
    ///
    /// # Errors
    ///
    /// The first non-retryable error or the last transient one.
    pub async fn execute_safe_query<T, F, Fut>(
        &self,
        context: Option<&str>,
        operation: F,
    ) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        self.executor.execute_safe_query(context, operation).await
    }

    /// Run `operation` inside a bounded transaction, retrying the whole
    /// transaction on transient failure.
    ///
    /// Each attempt opens its own connection from the live client, so a
    /// retry after a reset lands on the fresh database handle and writes on
    /// the shared connection stay outside the transaction.
    ///
    /// # Errors
    ///
    /// The first non-retryable error or the last transient one, including
    /// `DatabaseError::TransactionTimeout` when a bound is exceeded.
    pub async fn execute_safe_transaction<T, F>(
        &self,
        context: Option<&str>,
        mut operation: F,
    ) -> Result<T, DatabaseError>
    where
        F: for<'t> FnMut(&'t libsql::Transaction) -> BoxFuture<'t, Result<T, DatabaseError>>,
    {
        let mut attempt = self.executor.begin(context.unwrap_or("transaction"));
        while attempt.has_budget() {
            let result = match self.client.transaction_connection().await {
                Ok(conn) => run_transaction(&conn, self.transaction_bounds, &mut operation).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(error) => attempt.record_failure(error).await?,
            }
        }
        Err(attempt.exhausted().await)
    }

    /// Drop the connection for shutdown.
    ///
    /// # Errors
    ///
    /// Whatever the client's disconnect returns.
    pub async fn disconnect(&self) -> Result<(), DatabaseError> {
        self.client.disconnect().await
    }
}
