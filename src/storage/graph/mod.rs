use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::debug;

use crate::types::{EntityId, Result, ShardId};

use super::context::ContextRegistry;
use super::digest::{PhoneticEncoder, ValueDigest};
use super::ids::{IdentityAllocator, ShardLayout};
use super::metrics::{default_metrics, StorageMetrics};
use super::options::StoreOptions;
use super::schema;
use super::txn::{Clock, ReadTx, WriteTx};

mod entity_ops;
mod graph_types;
mod helpers;
mod list_ops;
mod lookup_ops;
mod prop_ops;
mod rel_ops;
mod tree_ops;

pub use graph_types::{
    ChildEntry, EntityRecord, ListEntry, NameMatch, Page, RelEntry, Relationship,
};

/// Handle to one store.
///
/// The handle owns a single SQLite connection; transactions lock it for
/// their whole lifetime, so a thread must not open a second transaction on
/// the same handle while one is live. Independent handles on the same file
/// serialize through SQLite's own locking. Each handle allocates
/// identifiers for its configured shard and re-reads the shard's stored
/// high water inside every entity-creating write, so handles sharing a shard
/// never issue the same id.
pub struct Graph {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    allocator: IdentityAllocator,
    contexts: ContextRegistry,
    digest: Arc<dyn ValueDigest>,
    phonetic: Arc<dyn PhoneticEncoder>,
    prefix_lengths: Vec<u32>,
    clock: Clock,
    metrics: Arc<dyn StorageMetrics>,
}

impl Graph {
    /// Opens or creates the store at `path`.
    pub fn open(path: impl AsRef<Path>, opts: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opening store");
        Self::from_connection(conn, Some(path.to_path_buf()), opts)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory(opts: StoreOptions) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None, opts)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, opts: StoreOptions) -> Result<Self> {
        conn.busy_timeout(opts.busy_timeout)?;
        conn.pragma_update(None, "synchronous", opts.synchronous.pragma_value())?;
        schema::install(&conn, opts.layout)?;
        let high_water = Self::high_water(&conn, opts.layout, opts.shard)?;
        let mut allocator = IdentityAllocator::resume(opts.layout, opts.shard, high_water)?;
        if let Some(limit) = opts.max_counter {
            allocator = allocator.with_max_counter(limit)?;
        }
        debug!(
            shard = %opts.shard,
            shard_bits = opts.layout.shard_bits(),
            high_water = ?high_water,
            "store ready"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            allocator,
            contexts: opts.contexts,
            digest: opts.digest,
            phonetic: opts.phonetic,
            prefix_lengths: opts.prefix_lengths,
            clock: Clock::new(),
            metrics: opts.metrics.unwrap_or_else(default_metrics),
        })
    }

    /// Largest entity id ever written in `shard`, tombstoned rows included.
    fn high_water(conn: &Connection, layout: ShardLayout, shard: ShardId) -> Result<Option<EntityId>> {
        let range = layout.id_range(shard);
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(id) FROM entity WHERE id BETWEEN ? AND ?",
            (*range.start() as i64, *range.end() as i64),
            |row| row.get(0),
        )?;
        Ok(max.map(EntityId::from_sql))
    }

    /// Starts a write transaction.
    pub fn begin_write(&self) -> Result<WriteTx<'_>> {
        WriteTx::begin(self.conn.lock(), &self.clock, &*self.metrics)
    }

    /// Starts a read transaction.
    pub fn begin_read(&self) -> Result<ReadTx<'_>> {
        ReadTx::begin(self.conn.lock(), &*self.metrics)
    }

    /// Runs `f` in a write transaction, committing on `Ok` and rolling back on `Err`.
    pub fn write<R>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<R>) -> Result<R> {
        let mut tx = self.begin_write()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Runs `f` in a read transaction.
    pub fn read<R>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<R>) -> Result<R> {
        let tx = self.begin_read()?;
        let value = f(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    /// Declared contexts.
    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// This handle's identifier allocator.
    pub fn allocator(&self) -> &IdentityAllocator {
        &self.allocator
    }

    /// Prefix lengths maintained by the name prefix index.
    pub fn prefix_lengths(&self) -> &[u32] {
        &self.prefix_lengths
    }

    pub(crate) fn digest(&self) -> &dyn ValueDigest {
        &*self.digest
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
