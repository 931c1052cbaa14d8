use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::warn;

use crate::storage::schema::{self, SCHEMA_VERSION, TABLES};
use crate::storage::txn::sealed::Sealed;
use crate::storage::{ContextKind, Graph};
use crate::types::{ContextId, Result as StoreResult};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_graph;
use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

// Every key that may have at most one current row, as
// (table, key columns, extra filter).
const UNIQUE_KEYS: &[(&str, &str, &str)] = &[
    ("entity", "id", ""),
    ("property", "base_id, ctx", ""),
    ("alias", "base_id, ctx, pos", ""),
    ("alias_lookup", "hash, ctx", ""),
    ("name", "base_id, ctx, pos", ""),
    ("name", "base_id, ctx, value", ""),
    ("prefix_lookup", "ctx, base_id, value, plen", ""),
    ("phonetic_lookup", "ctx, base_id, value, code", ""),
    ("relationship", "base_id, ctx, rel_id, forward", ""),
    ("relationship", "base_id, ctx, pos", " AND forward = 1"),
    ("relationship", "rel_id, ctx, pos", " AND forward = 0"),
    ("edge", "base_id, ctx, pos", ""),
    ("edge", "base_id, ctx, child_id", ""),
];

// Columns that must name a current entity while their row is current.
const REFERENCES: &[(&str, &str)] = &[
    ("property", "base_id"),
    ("alias", "base_id"),
    ("name", "base_id"),
    ("relationship", "base_id"),
    ("relationship", "rel_id"),
    ("edge", "base_id"),
    ("edge", "child_id"),
];

// Context kind each table's `ctx` column must resolve to.
const TABLE_KINDS: &[(&str, &str)] = &[
    ("entity", "entity"),
    ("property", "property"),
    ("alias", "alias"),
    ("alias_lookup", "alias"),
    ("name", "name"),
    ("prefix_lookup", "name"),
    ("phonetic_lookup", "name"),
    ("relationship", "relationship"),
    ("edge", "tree"),
];

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Schema metadata, SQLite's quick check, key uniqueness, and tombstone
    /// ordering.
    Fast,
    /// Everything in `Fast` plus relationship pairing, lookup consistency,
    /// dangling references, and context declarations.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating an integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Rows examined across all tables, tombstones included.
    pub rows_scanned: u64,
    /// Current rows across all tables.
    pub current_rows: u64,
    /// Current relationship rows checked for a mirror.
    pub relationship_rows: u64,
    /// Current aliases checked against the digest index.
    pub aliases_checked: u64,
    /// Current names checked against the search indexes.
    pub names_checked: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without any error finding.
    pub success: bool,
    /// Issues discovered during verification, capped at 32.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the tables examined.
    pub counts: VerifyCounts,
}

/// Verifies the store at `path`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read. Integrity problems
/// are reported as findings, not errors.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let graph = open_graph(path.as_ref(), opts)?;
    verify_graph(&graph, level)
}

/// Verifies an open store inside one read transaction.
pub fn verify_graph(graph: &Graph, level: VerifyLevel) -> Result<VerifyReport> {
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();
    graph.read(|tx| {
        let conn = tx.conn();
        check_schema(conn, &mut findings)?;
        check_row_counts(conn, &mut counts)?;
        check_uniqueness(conn, &mut findings)?;
        check_tombstone_order(conn, &mut findings)?;
        if level == VerifyLevel::Full {
            check_relationship_pairs(conn, &mut findings, &mut counts)?;
            check_alias_index(graph, conn, &mut findings, &mut counts)?;
            check_name_index(graph, conn, &mut findings, &mut counts)?;
            check_references(conn, &mut findings)?;
            check_contexts(graph, conn, &mut findings)?;
        }
        Ok(())
    })?;
    findings.truncate(MAX_FINDINGS);
    let success = !findings
        .iter()
        .any(|finding| finding.severity == VerifySeverity::Error);
    if !success {
        warn!(findings = findings.len(), "verification failed");
    }
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

fn push(findings: &mut Vec<VerifyFinding>, finding: VerifyFinding) {
    if findings.len() < MAX_FINDINGS {
        findings.push(finding);
    }
}

fn count(conn: &Connection, sql: &str) -> StoreResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

fn check_schema(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> StoreResult<()> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM sediment_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match version {
        None => push(findings, VerifyFinding::error("schema_version missing from metadata")),
        Some(v) if v != SCHEMA_VERSION.to_string() => push(
            findings,
            VerifyFinding::error(format!("unexpected schema version {v}")),
        ),
        Some(_) => {}
    }
    if schema::stored_layout(conn)?.is_none() {
        push(findings, VerifyFinding::error("shard layout missing from metadata"));
    }
    let quick: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if quick != "ok" {
        push(findings, VerifyFinding::error(format!("sqlite quick_check: {quick}")));
    }
    Ok(())
}

fn check_row_counts(conn: &Connection, counts: &mut VerifyCounts) -> StoreResult<()> {
    for table in TABLES {
        counts.rows_scanned += count(conn, &format!("SELECT COUNT(*) FROM {table}"))?;
        counts.current_rows += count(
            conn,
            &format!("SELECT COUNT(*) FROM {table} WHERE time_removed IS NULL"),
        )?;
    }
    Ok(())
}

fn check_uniqueness(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> StoreResult<()> {
    for &(table, columns, extra) in UNIQUE_KEYS {
        let dupes = count(
            conn,
            &format!(
                "SELECT COUNT(*) FROM (SELECT 1 FROM {table} WHERE time_removed IS NULL{extra} \
                 GROUP BY {columns} HAVING COUNT(*) > 1)"
            ),
        )?;
        if dupes > 0 {
            push(
                findings,
                VerifyFinding::error(format!(
                    "{table}: {dupes} key(s) ({columns}) with more than one current row"
                )),
            );
        }
    }
    Ok(())
}

fn check_tombstone_order(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> StoreResult<()> {
    for table in TABLES {
        let bad = count(
            conn,
            &format!(
                "SELECT COUNT(*) FROM {table} \
                 WHERE time_removed IS NOT NULL AND time_removed < time_created"
            ),
        )?;
        if bad > 0 {
            push(
                findings,
                VerifyFinding::error(format!("{table}: {bad} row(s) removed before they were created")),
            );
        }
    }
    Ok(())
}

fn check_relationship_pairs(
    conn: &Connection,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> StoreResult<()> {
    counts.relationship_rows = count(
        conn,
        "SELECT COUNT(*) FROM relationship WHERE time_removed IS NULL",
    )?;
    let mut stmt = conn.prepare(
        "SELECT r.base_id, r.rel_id, r.ctx, r.forward FROM relationship r \
         WHERE r.time_removed IS NULL AND NOT EXISTS ( \
             SELECT 1 FROM relationship m \
             WHERE m.base_id = r.base_id AND m.rel_id = r.rel_id AND m.ctx = r.ctx \
               AND m.forward <> r.forward AND m.time_removed IS NULL)",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, u16>(2)?,
            row.get::<_, bool>(3)?,
        ))
    })?;
    for row in rows {
        let (base, rel, ctx, forward) = row?;
        let (have, missing) = if forward {
            ("forward", "backward")
        } else {
            ("backward", "forward")
        };
        push(
            findings,
            VerifyFinding::error(format!(
                "relationship {base} -> {rel} in context {ctx} has a {have} row but no {missing} row"
            )),
        );
    }
    Ok(())
}

fn check_alias_index(
    graph: &Graph,
    conn: &Connection,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> StoreResult<()> {
    let digest = graph.digest();
    let mut expected: HashSet<(Vec<u8>, u16, i64)> = HashSet::new();
    let mut stmt =
        conn.prepare("SELECT base_id, ctx, value FROM alias WHERE time_removed IS NULL")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (base, ctx, value) = row?;
        counts.aliases_checked += 1;
        let hash = digest.digest(ContextId(ctx), &value).to_vec();
        expected.insert((hash, ctx, base));
    }

    let mut indexed: HashSet<(Vec<u8>, u16, i64)> = HashSet::new();
    let mut stmt =
        conn.prepare("SELECT hash, ctx, base_id FROM alias_lookup WHERE time_removed IS NULL")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        indexed.insert(row?);
    }

    for (hash, ctx, base) in expected.difference(&indexed) {
        push(
            findings,
            VerifyFinding::error(format!(
                "alias of entity {base} in context {ctx} has no lookup row (digest {})",
                hex::encode(hash)
            )),
        );
    }
    for (hash, ctx, base) in indexed.difference(&expected) {
        push(
            findings,
            VerifyFinding::error(format!(
                "alias lookup {} in context {ctx} points at entity {base} without a matching alias",
                hex::encode(hash)
            )),
        );
    }
    Ok(())
}

fn check_name_index(
    graph: &Graph,
    conn: &Connection,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> StoreResult<()> {
    counts.names_checked = count(conn, "SELECT COUNT(*) FROM name WHERE time_removed IS NULL")?;
    for lookup in ["prefix_lookup", "phonetic_lookup"] {
        let orphans = count(
            conn,
            &format!(
                "SELECT COUNT(*) FROM {lookup} l WHERE l.time_removed IS NULL AND NOT EXISTS ( \
                     SELECT 1 FROM name n WHERE n.base_id = l.base_id AND n.ctx = l.ctx \
                       AND n.value = l.value AND n.time_removed IS NULL)"
            ),
        )?;
        if orphans > 0 {
            push(
                findings,
                VerifyFinding::error(format!("{lookup}: {orphans} row(s) without a current name")),
            );
        }
    }

    let mut prefix_ctxs = Vec::new();
    let mut phonetic_ctxs = Vec::new();
    for def in graph.contexts().iter() {
        if let ContextKind::Name { search, .. } = def.kind {
            if search.prefix() {
                prefix_ctxs.push(def.id.0);
            }
            if search.phonetic() {
                phonetic_ctxs.push(def.id.0);
            }
        }
    }
    // Every name in a prefix context carries a full-literal row (plen 0).
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM name n WHERE n.ctx = ? AND n.time_removed IS NULL AND NOT EXISTS ( \
             SELECT 1 FROM prefix_lookup p WHERE p.ctx = n.ctx AND p.base_id = n.base_id \
               AND p.value = n.value AND p.plen = 0 AND p.time_removed IS NULL)",
    )?;
    for ctx in prefix_ctxs {
        let missing: i64 = stmt.query_row([ctx], |row| row.get(0))?;
        if missing > 0 {
            push(
                findings,
                VerifyFinding::error(format!(
                    "name context {ctx}: {missing} name(s) missing from the prefix index"
                )),
            );
        }
    }
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM name n WHERE n.ctx = ? AND n.time_removed IS NULL AND NOT EXISTS ( \
             SELECT 1 FROM phonetic_lookup p WHERE p.ctx = n.ctx AND p.base_id = n.base_id \
               AND p.value = n.value AND p.time_removed IS NULL)",
    )?;
    for ctx in phonetic_ctxs {
        let missing: i64 = stmt.query_row([ctx], |row| row.get(0))?;
        if missing > 0 {
            // Names without a letter have no phonetic code.
            push(
                findings,
                VerifyFinding::warning(format!(
                    "name context {ctx}: {missing} name(s) without a phonetic code"
                )),
            );
        }
    }
    Ok(())
}

fn check_references(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> StoreResult<()> {
    for &(table, column) in REFERENCES {
        let dangling = count(
            conn,
            &format!(
                "SELECT COUNT(*) FROM {table} x WHERE x.time_removed IS NULL AND NOT EXISTS ( \
                     SELECT 1 FROM entity e WHERE e.id = x.{column} AND e.time_removed IS NULL)"
            ),
        )?;
        if dangling > 0 {
            push(
                findings,
                VerifyFinding::error(format!(
                    "{table}.{column}: {dangling} current row(s) reference a missing entity"
                )),
            );
        }
    }
    Ok(())
}

fn check_contexts(
    graph: &Graph,
    conn: &Connection,
    findings: &mut Vec<VerifyFinding>,
) -> StoreResult<()> {
    for &(table, expected) in TABLE_KINDS {
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT ctx FROM {table} WHERE time_removed IS NULL ORDER BY ctx"
        ))?;
        let ctxs = stmt
            .query_map([], |row| row.get::<_, u16>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for ctx in ctxs {
            match graph.contexts().get(ContextId(ctx)) {
                None => push(
                    findings,
                    VerifyFinding::warning(format!("{table}: context {ctx} is not declared")),
                ),
                Some(def) if def.kind.label() != expected => push(
                    findings,
                    VerifyFinding::warning(format!(
                        "{table}: context {ctx} is declared as {}, expected {expected}",
                        def.kind.label()
                    )),
                ),
                Some(_) => {}
            }
        }
    }
    Ok(())
}
