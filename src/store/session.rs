use std::ops::Deref;
use std::sync::MutexGuard;

use rusqlite::Connection;

use crate::error::Result;

/// A write transaction on the catalog.
///
/// Holds the connection for its whole lifetime. Queries run through `Deref`
/// to [`Connection`]. Unless [`Session::commit`] succeeds the transaction is
/// rolled back when the session is dropped, including during unwinding.
pub struct Session<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl<'a> Session<'a> {
    pub(super) fn begin(conn: MutexGuard<'a, Connection>) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Deref for Session<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        // A failed COMMIT may already have ended the transaction.
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %e, "failed to roll back session");
        }
    }
}
