//! Shared test utilities for taskhub-db unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::client::DatabaseClient;
use crate::error::DatabaseError;

/// In-process stand-in for a database client that counts calls and fails on demand.
#[derive(Default)]
pub(crate) struct FakeClient {
    connects: AtomicU32,
    disconnects: AtomicU32,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
}

impl FakeClient {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseClient for FakeClient {
    async fn connect(&self) -> Result<(), DatabaseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("connection refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DatabaseError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("already closed".into()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
