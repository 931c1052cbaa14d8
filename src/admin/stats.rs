use std::fs;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::storage::schema::{SCHEMA_VERSION, TABLES};
use crate::storage::txn::sealed::Sealed;
use crate::storage::Graph;
use crate::types::{ContextId, Result as StoreResult};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::{open_graph, wal_path};
use crate::admin::Result;

/// Store statistics gathered by [`stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Layout and allocator state.
    pub store: StoreStatsSection,
    /// Row counts per table.
    pub tables: Vec<TableStats>,
    /// Current row counts per context.
    pub contexts: Vec<ContextStats>,
    /// File sizes, absent for in-memory stores.
    pub filesystem: Option<FilesystemStats>,
}

/// Layout and allocator state of the opened handle.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsSection {
    /// Schema version the store was opened with.
    pub schema_version: i64,
    /// Identifier bits reserved for the shard tag.
    pub shard_bits: u8,
    /// Shard this handle allocates for.
    pub shard: u16,
    /// Identifiers left in this shard.
    pub ids_remaining: u64,
    /// Indexed prefix lengths.
    pub prefix_lengths: Vec<u32>,
    /// Number of declared contexts.
    pub contexts_declared: usize,
}

/// Row counts of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    /// Table name.
    pub table: &'static str,
    /// Rows with no removal time.
    pub current: u64,
    /// Superseded or removed rows.
    pub tombstoned: u64,
}

/// Current rows carrying one context id in one table.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    /// Table name.
    pub table: &'static str,
    /// Context id.
    pub ctx: ContextId,
    /// Declared name, if any.
    pub name: Option<String>,
    /// Declared kind, `None` when the id is undeclared.
    pub kind: Option<&'static str>,
    /// Current rows.
    pub current: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub wal_path: String,
    pub wal_size_bytes: u64,
}

/// Opens the store at `path` and reports its statistics.
pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let graph = open_graph(path.as_ref(), opts)?;
    stats_graph(&graph)
}

/// Reports statistics of an open store.
pub fn stats_graph(graph: &Graph) -> Result<StatsReport> {
    let (tables, contexts) = graph.read(|tx| {
        let conn = tx.conn();
        Ok((table_stats(conn)?, context_stats(graph, conn)?))
    })?;
    let allocator = graph.allocator();
    let store = StoreStatsSection {
        schema_version: SCHEMA_VERSION,
        shard_bits: allocator.layout().shard_bits(),
        shard: allocator.shard().0,
        ids_remaining: allocator.remaining(),
        prefix_lengths: graph.prefix_lengths().to_vec(),
        contexts_declared: graph.contexts().iter().count(),
    };
    let filesystem = match graph.path() {
        Some(path) => Some(filesystem_stats(path)?),
        None => None,
    };
    Ok(StatsReport {
        store,
        tables,
        contexts,
        filesystem,
    })
}

fn table_stats(conn: &Connection) -> StoreResult<Vec<TableStats>> {
    let mut out = Vec::with_capacity(TABLES.len());
    for &table in TABLES {
        let (total, tombstoned): (i64, i64) = conn.query_row(
            &format!("SELECT COUNT(*), COUNT(time_removed) FROM {table}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        out.push(TableStats {
            table,
            current: (total - tombstoned) as u64,
            tombstoned: tombstoned as u64,
        });
    }
    Ok(out)
}

fn context_stats(graph: &Graph, conn: &Connection) -> StoreResult<Vec<ContextStats>> {
    let mut out = Vec::new();
    for &table in TABLES {
        let mut stmt = conn.prepare(&format!(
            "SELECT ctx, COUNT(*) FROM {table} WHERE time_removed IS NULL GROUP BY ctx ORDER BY ctx"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u16>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (ctx, current) = row?;
            let def = graph.contexts().get(ContextId(ctx));
            out.push(ContextStats {
                table,
                ctx: ContextId(ctx),
                name: def.and_then(|d| d.name.clone()),
                kind: def.map(|d| d.kind.label()),
                current: current as u64,
            });
        }
    }
    Ok(out)
}

fn filesystem_stats(path: &Path) -> Result<FilesystemStats> {
    let db_meta = fs::metadata(path)?;
    let wal_path = wal_path(path);
    let wal_size = fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
    Ok(FilesystemStats {
        db_path: path.display().to_string(),
        db_size_bytes: db_meta.len(),
        wal_path: wal_path.display().to_string(),
        wal_size_bytes: wal_size,
    })
}
