//! Database client seam.
//!
//! [`ConnectionHealth`](crate::health::ConnectionHealth) only needs to
//! disconnect, reconnect and ping; [`DatabaseClient`] is that contract.
//! [`LibsqlClient`] is the production implementation.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use libsql::Builder;
use taskhub_config::DatabaseConfig;
use tracing::debug;

use crate::error::DatabaseError;

/// The operations the resilience layer performs on the shared client.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Open a fresh connection, replacing any existing one.
    async fn connect(&self) -> Result<(), DatabaseError>;

    /// Drop the live connection. Subsequent queries fail until `connect`.
    async fn disconnect(&self) -> Result<(), DatabaseError>;

    /// Run a trivial liveness query.
    async fn ping(&self) -> Result<(), DatabaseError>;
}

/// libSQL-backed client holding one shared connection.
///
/// `connection()` hands out clones of the live connection, so a reset swaps
/// the connection for new callers while in-flight ones finish on the old one.
/// Clones share one SQLite handle and therefore one transaction state, which
/// is why transactions run on their own connection from
/// [`Self::transaction_connection`].
///
/// A `:memory:` database does not survive a reset: each new connection sees
/// a fresh empty database.
pub struct LibsqlClient {
    db: libsql::Database,
    conn: RwLock<Option<libsql::Connection>>,
    remote: bool,
    in_memory: bool,
}

impl LibsqlClient {
    /// Open a local database file (or `:memory:`) and connect to it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or the first
    /// connection fails.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        Self::from_database(db, false, path == ":memory:").await
    }

    /// Open a remote libSQL database over HTTP(S)/Hrana.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the client cannot be built or connected.
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await?;
        Self::from_database(db, true, false).await
    }

    /// Open whatever `config.url` points at.
    ///
    /// # Errors
    ///
    /// See [`Self::open_local`] and [`Self::open_remote`].
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if config.is_remote() {
            Self::open_remote(&config.url, &config.auth_token).await
        } else {
            Self::open_local(&config.url).await
        }
    }

    async fn from_database(
        db: libsql::Database,
        remote: bool,
        in_memory: bool,
    ) -> Result<Self, DatabaseError> {
        let client = Self {
            db,
            conn: RwLock::new(None),
            remote,
            in_memory,
        };
        client.connect().await?;
        Ok(client)
    }

    async fn open_connection(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.db.connect()?;
        if !self.remote {
            // Must be per-connection in SQLite
            conn.execute("PRAGMA foreign_keys = ON", ())
                .await
                .map_err(|e| DatabaseError::Query(format!("PRAGMA foreign_keys: {e}")))?;
        }
        Ok(conn)
    }

    /// A handle on the live connection.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Connection` while disconnected (e.g. mid-reset).
    pub fn connection(&self) -> Result<libsql::Connection, DatabaseError> {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DatabaseError::Connection("database client is not connected".into()))
    }

    /// A dedicated connection for one transaction attempt.
    ///
    /// Opened fresh on every call so concurrent transactions, and writes on
    /// the shared connection, never land in each other's `BEGIN`. An
    /// in-memory database cannot be reopened and gets the shared connection.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Connection` while disconnected, or the open
    /// error.
    pub async fn transaction_connection(&self) -> Result<libsql::Connection, DatabaseError> {
        let shared = self.connection()?;
        if self.in_memory {
            return Ok(shared);
        }
        self.open_connection().await
    }

    /// Whether a live connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether this client talks to a remote server.
    pub const fn is_remote(&self) -> bool {
        self.remote
    }
}

#[async_trait]
impl DatabaseClient for LibsqlClient {
    async fn connect(&self) -> Result<(), DatabaseError> {
        let conn = self.open_connection().await?;
        let previous = self
            .conn
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(conn);
        debug!(replaced = previous.is_some(), "libSQL connection opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DatabaseError> {
        let previous = self
            .conn
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(was_connected = previous.is_some(), "libSQL connection dropped");
        Ok(())
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let conn = self.connection()?;
        let mut rows = conn.query("SELECT 1", ()).await?;
        rows.next().await?.ok_or(DatabaseError::NoResult)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_local_connects_and_pings() {
        let client = LibsqlClient::open_local(":memory:").await.unwrap();
        assert!(client.is_connected());
        assert!(!client.is_remote());
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn disconnected_client_refuses_work() {
        let client = LibsqlClient::open_local(":memory:").await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connection(_)));
        assert!(err.is_transient());

        client.connect().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_enabled_on_every_connection() {
        let client = LibsqlClient::open_local(":memory:").await.unwrap();
        client.connect().await.unwrap();

        let conn = client.connection().unwrap();
        let mut rows = conn.query("PRAGMA foreign_keys", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn transaction_connection_is_separate_from_shared() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tx.db");
        let client = LibsqlClient::open_local(path.to_str().unwrap()).await.unwrap();
        let shared = client.connection().unwrap();
        shared
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", ())
            .await
            .unwrap();

        let dedicated = client.transaction_connection().await.unwrap();
        let tx = dedicated.transaction().await.unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)", ()).await.unwrap();

        // The shared handle is outside the open transaction.
        assert!(shared.is_autocommit());
        assert!(!dedicated.is_autocommit());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn transaction_connection_requires_live_client() {
        let client = LibsqlClient::open_local(":memory:").await.unwrap();
        client.disconnect().await.unwrap();
        let err = client.transaction_connection().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connection(_)));
    }
}
