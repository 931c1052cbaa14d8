//! SQLite schema and store metadata.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::storage::ids::ShardLayout;
use crate::types::{Result, SedimentError};

/// Version stamped into `sediment_meta` by [`install`].
pub const SCHEMA_VERSION: i64 = 1;

/// Every versioned table, in dependency order.
pub const TABLES: &[&str] = &[
    "entity",
    "property",
    "alias",
    "alias_lookup",
    "name",
    "prefix_lookup",
    "phonetic_lookup",
    "relationship",
    "edge",
];

// Partial unique indexes carry the one-current-row-per-key rule; the plain
// indexes serve history reads, which include tombstoned rows.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS sediment_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity (
    id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS entity_current ON entity (id) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS entity_key ON entity (id);

CREATE TABLE IF NOT EXISTS property (
    base_id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    num INTEGER,
    value BLOB,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER,
    CHECK ((num IS NULL) <> (value IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS property_current
    ON property (base_id, ctx) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS property_key ON property (base_id, ctx);

CREATE TABLE IF NOT EXISTS alias (
    base_id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    pos INTEGER NOT NULL,
    value TEXT NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS alias_current
    ON alias (base_id, ctx, pos) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS alias_key ON alias (base_id, ctx, pos);

CREATE TABLE IF NOT EXISTS alias_lookup (
    hash BLOB NOT NULL,
    ctx INTEGER NOT NULL,
    base_id INTEGER NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS alias_lookup_current
    ON alias_lookup (hash, ctx) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS alias_lookup_key ON alias_lookup (hash, ctx);

CREATE TABLE IF NOT EXISTS name (
    base_id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    pos INTEGER NOT NULL,
    value TEXT NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS name_current
    ON name (base_id, ctx, pos) WHERE time_removed IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS name_value_current
    ON name (base_id, ctx, value) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS name_key ON name (base_id, ctx, pos);

CREATE TABLE IF NOT EXISTS prefix_lookup (
    prefix TEXT NOT NULL,
    plen INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    base_id INTEGER NOT NULL,
    value TEXT NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS prefix_lookup_current
    ON prefix_lookup (ctx, base_id, value, plen) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS prefix_lookup_search
    ON prefix_lookup (ctx, plen, prefix) WHERE time_removed IS NULL;

CREATE TABLE IF NOT EXISTS phonetic_lookup (
    code TEXT NOT NULL,
    ctx INTEGER NOT NULL,
    base_id INTEGER NOT NULL,
    value TEXT NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS phonetic_lookup_current
    ON phonetic_lookup (ctx, base_id, value, code) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS phonetic_lookup_search
    ON phonetic_lookup (ctx, code) WHERE time_removed IS NULL;

CREATE TABLE IF NOT EXISTS relationship (
    base_id INTEGER NOT NULL,
    rel_id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    forward INTEGER NOT NULL CHECK (forward IN (0, 1)),
    pos INTEGER NOT NULL,
    num INTEGER,
    value BLOB,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER,
    CHECK (num IS NULL OR value IS NULL)
);
CREATE UNIQUE INDEX IF NOT EXISTS relationship_current
    ON relationship (base_id, ctx, rel_id, forward) WHERE time_removed IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS relationship_forward_pos
    ON relationship (base_id, ctx, pos) WHERE time_removed IS NULL AND forward = 1;
CREATE UNIQUE INDEX IF NOT EXISTS relationship_backward_pos
    ON relationship (rel_id, ctx, pos) WHERE time_removed IS NULL AND forward = 0;
CREATE INDEX IF NOT EXISTS relationship_key ON relationship (base_id, ctx, rel_id);
CREATE INDEX IF NOT EXISTS relationship_target ON relationship (rel_id, ctx);

CREATE TABLE IF NOT EXISTS edge (
    base_id INTEGER NOT NULL,
    child_id INTEGER NOT NULL,
    ctx INTEGER NOT NULL,
    pos INTEGER NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL,
    time_removed INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS edge_current
    ON edge (base_id, ctx, pos) WHERE time_removed IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS edge_child_current
    ON edge (base_id, ctx, child_id) WHERE time_removed IS NULL;
CREATE INDEX IF NOT EXISTS edge_key ON edge (base_id, ctx, pos);
CREATE INDEX IF NOT EXISTS edge_child ON edge (child_id);
";

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM sediment_meta WHERE key = ?",
            [key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Creates every table and index if missing and checks the stored layout.
///
/// A fresh database records `layout`; an existing one must have been created
/// with the same layout.
pub fn install(conn: &Connection, layout: ShardLayout) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match install_inner(conn, layout) {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(err)
        }
    }
}

fn install_inner(conn: &Connection, layout: ShardLayout) -> Result<()> {
    conn.execute_batch(DDL)?;
    match read_meta(conn, "schema_version")? {
        None => {
            conn.execute(
                "INSERT INTO sediment_meta (key, value) VALUES ('schema_version', ?), ('shard_bits', ?)",
                (SCHEMA_VERSION.to_string(), layout.shard_bits().to_string()),
            )?;
            debug!(shard_bits = layout.shard_bits(), "schema installed");
        }
        Some(version) => {
            if version != SCHEMA_VERSION.to_string() {
                return Err(SedimentError::Corruption(format!(
                    "unsupported schema version {version}"
                )));
            }
            let bits = read_meta(conn, "shard_bits")?
                .ok_or_else(|| SedimentError::Corruption("shard_bits missing".into()))?;
            if bits != layout.shard_bits().to_string() {
                return Err(SedimentError::Invalid(
                    "store was created with a different shard layout",
                ));
            }
        }
    }
    Ok(())
}

/// Reads the shard layout recorded in an existing store.
pub fn stored_layout(conn: &Connection) -> Result<Option<ShardLayout>> {
    match read_meta(conn, "shard_bits")? {
        None => Ok(None),
        Some(bits) => {
            let bits: u8 = bits
                .parse()
                .map_err(|_| SedimentError::Corruption(format!("bad shard_bits {bits:?}")))?;
            ShardLayout::new(bits).map(Some)
        }
    }
}
