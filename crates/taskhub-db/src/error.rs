//! Database error types for taskhub-db.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::retry::classify_message;

/// SQLite primary result codes that signal contention rather than a bad query.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// Invalid state encountered (e.g., bad data in DB).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The client has no live connection, or lost it mid-operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A transaction did not begin or finish within its bound.
    #[error("Transaction {phase} exceeded {limit:?}")]
    TransactionTimeout {
        phase: TransactionPhase,
        limit: Duration,
    },

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Which bound a transaction overran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Waiting to begin (`max_wait`).
    Begin,
    /// Running the callback and committing (`timeout`).
    Body,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Body => write!(f, "body"),
        }
    }
}

/// Retry-relevant classification of a [`DatabaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Expected to clear up on its own; safe to retry.
    Transient,
    /// Will fail the same way every time.
    Permanent,
    /// Nothing identifies it either way. Treated as non-retryable.
    Unknown,
}

impl DatabaseError {
    /// Classify this error once, preferring structured driver codes and
    /// falling back to message markers.
    pub fn kind(&self) -> DatabaseErrorKind {
        match self {
            Self::Connection(_) | Self::TransactionTimeout { .. } => DatabaseErrorKind::Transient,
            Self::NoResult | Self::InvalidState(_) => DatabaseErrorKind::Permanent,
            Self::LibSql(e) => {
                libsql_kind(e).unwrap_or_else(|| classify_message(&e.to_string()))
            }
            Self::Query(msg) => classify_message(msg),
            Self::Other(e) => classify_message(&format!("{e:#}")),
        }
    }

    /// Shorthand for `kind() == DatabaseErrorKind::Transient`.
    pub fn is_transient(&self) -> bool {
        self.kind() == DatabaseErrorKind::Transient
    }
}

fn libsql_kind(e: &libsql::Error) -> Option<DatabaseErrorKind> {
    match e {
        libsql::Error::ConnectionFailed(_) => Some(DatabaseErrorKind::Transient),
        libsql::Error::SqliteFailure(code, _) => match code & 0xff {
            SQLITE_BUSY | SQLITE_LOCKED => Some(DatabaseErrorKind::Transient),
            SQLITE_CONSTRAINT => Some(DatabaseErrorKind::Permanent),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_timeouts_are_transient() {
        assert!(DatabaseError::Connection("not connected".into()).is_transient());
        assert!(
            DatabaseError::TransactionTimeout {
                phase: TransactionPhase::Begin,
                limit: Duration::from_secs(5),
            }
            .is_transient()
        );
    }

    #[test]
    fn logical_errors_are_permanent() {
        assert_eq!(DatabaseError::NoResult.kind(), DatabaseErrorKind::Permanent);
        // "connection" in the text must not override the structured variant.
        assert_eq!(
            DatabaseError::InvalidState("connection row missing".into()).kind(),
            DatabaseErrorKind::Permanent
        );
    }

    #[test]
    fn sqlite_codes_take_precedence_over_text() {
        let busy = DatabaseError::LibSql(libsql::Error::SqliteFailure(5, "database is busy".into()));
        assert_eq!(busy.kind(), DatabaseErrorKind::Transient);

        // Extended code SQLITE_LOCKED_SHAREDCACHE (262) still maps to LOCKED.
        let locked = DatabaseError::LibSql(libsql::Error::SqliteFailure(262, "locked".into()));
        assert_eq!(locked.kind(), DatabaseErrorKind::Transient);

        let unique = DatabaseError::LibSql(libsql::Error::SqliteFailure(
            2067,
            "UNIQUE constraint failed: connection_pool.id".into(),
        ));
        assert_eq!(unique.kind(), DatabaseErrorKind::Permanent);
    }

    #[test]
    fn driver_connection_failure_is_transient() {
        let err = DatabaseError::LibSql(libsql::Error::ConnectionFailed("refused".into()));
        assert!(err.is_transient());
    }

    #[test]
    fn unmatched_query_error_is_unknown() {
        let err = DatabaseError::Query("validation failed".into());
        assert_eq!(err.kind(), DatabaseErrorKind::Unknown);
    }

    #[test]
    fn timeout_display_names_phase() {
        let err = DatabaseError::TransactionTimeout {
            phase: TransactionPhase::Body,
            limit: Duration::from_secs(15),
        };
        assert_eq!(err.to_string(), "Transaction body exceeded 15s");
    }
}
