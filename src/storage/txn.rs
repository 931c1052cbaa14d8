//! Transaction scopes over the store's single connection.
//!
//! A [`WriteTx`] holds the connection lock for its whole lifetime and runs
//! inside `BEGIN IMMEDIATE`; a [`ReadTx`] runs inside `BEGIN DEFERRED`.
//! Dropping either without finishing it rolls back.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::MutexGuard;
use rusqlite::Connection;
use tracing::{trace, warn};

use crate::storage::metrics::StorageMetrics;
use crate::types::{Result, Timestamp};

/// Wall clock that never runs backwards within one store handle.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    /// Creates a clock with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current time, clamped to be at least every previous reading.
    pub fn now(&self) -> Timestamp {
        let wall = Timestamp::now().0;
        let prev = self.last.fetch_max(wall, Ordering::SeqCst);
        Timestamp(prev.max(wall))
    }
}

pub(crate) mod sealed {
    use rusqlite::Connection;

    use crate::storage::metrics::StorageMetrics;

    pub trait Sealed {
        fn conn(&self) -> &Connection;
        fn metrics(&self) -> &dyn StorageMetrics;
    }
}

/// Any open transaction. Read operations accept either kind.
pub trait TxView: sealed::Sealed {}

/// Exclusive write transaction.
pub struct WriteTx<'g> {
    conn: MutexGuard<'g, Connection>,
    clock: &'g Clock,
    metrics: &'g dyn StorageMetrics,
    finished: bool,
}

impl<'g> WriteTx<'g> {
    pub(crate) fn begin(
        conn: MutexGuard<'g, Connection>,
        clock: &'g Clock,
        metrics: &'g dyn StorageMetrics,
    ) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        trace!("write transaction started");
        Ok(Self {
            conn,
            clock,
            metrics,
            finished: false,
        })
    }

    /// Makes every write of this transaction durable.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        trace!("write transaction committed");
        Ok(())
    }

    /// Discards every write of this transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        trace!("write transaction rolled back");
        Ok(())
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Runs `f` inside a savepoint so a failed multi-row operation leaves no
    /// partial writes behind, even if the caller keeps using the transaction.
    pub(crate) fn atomic<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.conn.execute_batch("SAVEPOINT sediment_op")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE sediment_op")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO sediment_op; RELEASE sediment_op")
                {
                    warn!(error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of abandoned write transaction failed");
            }
        }
    }
}

impl sealed::Sealed for WriteTx<'_> {
    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn metrics(&self) -> &dyn StorageMetrics {
        self.metrics
    }
}

impl TxView for WriteTx<'_> {}

/// Read transaction.
pub struct ReadTx<'g> {
    conn: MutexGuard<'g, Connection>,
    metrics: &'g dyn StorageMetrics,
    finished: bool,
}

impl<'g> ReadTx<'g> {
    pub(crate) fn begin(
        conn: MutexGuard<'g, Connection>,
        metrics: &'g dyn StorageMetrics,
    ) -> Result<Self> {
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self {
            conn,
            metrics,
            finished: false,
        })
    }

    /// Ends the transaction.
    pub fn finish(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for ReadTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of read transaction failed");
            }
        }
    }
}

impl sealed::Sealed for ReadTx<'_> {
    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn metrics(&self) -> &dyn StorageMetrics {
        self.metrics
    }
}

impl TxView for ReadTx<'_> {}
