#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use sediment::admin::{
    stats, verify, AdminError, AdminOpenOptions, VerifyLevel, VerifySeverity,
};
use sediment::storage::{ContextKind, ContextRegistry, Graph, SearchMode, StoreOptions};
use sediment::types::{EntityId, Flags, ScalarValue};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn registry() -> ContextRegistry {
    ContextRegistry::new()
        .define(1u16, ContextKind::Entity)
        .and_then(|r| r.define(2u16, ContextKind::Property { class: Default::default() }))
        .and_then(|r| r.define(3u16, ContextKind::Alias))
        .and_then(|r| {
            r.define(
                4u16,
                ContextKind::Name {
                    search: SearchMode::Both,
                    loose: false,
                },
            )
        })
        .and_then(|r| r.define(5u16, ContextKind::Relationship))
        .expect("valid registry")
}

fn options() -> AdminOpenOptions {
    AdminOpenOptions {
        store: StoreOptions::new(registry()),
        create_if_missing: false,
    }
}

struct Populated {
    _dir: TempDir,
    path: PathBuf,
    ids: Vec<EntityId>,
}

fn populated() -> Result<Populated, Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.db");
    let graph = Graph::open(&path, StoreOptions::new(registry()))?;
    let reg = graph.contexts();
    let (entity, score, handle, name, knows) = (
        reg.entity(1u16)?,
        reg.property(2u16)?,
        reg.alias(3u16)?,
        reg.name(4u16)?,
        reg.relationship(5u16)?,
    );
    let ids = graph.write(|tx| {
        let a = graph.create_entity(tx, entity, Flags::EMPTY)?.id;
        let b = graph.create_entity(tx, entity, Flags::EMPTY)?.id;
        graph.set_property(tx, a, score, ScalarValue::Int(10), None)?;
        graph.set_property(tx, a, score, ScalarValue::Int(11), None)?;
        graph.add_alias(tx, a, handle, None, "alpha")?;
        graph.add_name(tx, b, name, None, "Beatrice")?;
        graph.link(tx, a, b, knows, Some(ScalarValue::from("since 2001")))?;
        Ok(vec![a, b])
    })?;
    Ok(Populated {
        _dir: dir,
        path,
        ids,
    })
}

fn corrupt(path: &Path, sql: &str, id: EntityId) -> rusqlite::Result<usize> {
    let conn = Connection::open(path)?;
    conn.execute(sql, [id.0 as i64])
}

#[test]
fn clean_store_passes_both_levels() -> TestResult {
    let store = populated()?;
    for level in [VerifyLevel::Fast, VerifyLevel::Full] {
        let report = verify(&store.path, &options(), level)?;
        assert!(report.success, "{level:?}: {:?}", report.findings);
        assert!(report
            .findings
            .iter()
            .all(|finding| finding.severity != VerifySeverity::Error));
    }
    let full = verify(&store.path, &options(), VerifyLevel::Full)?;
    assert_eq!(full.counts.relationship_rows, 2);
    assert_eq!(full.counts.aliases_checked, 1);
    assert_eq!(full.counts.names_checked, 1);
    assert!(full.counts.rows_scanned > full.counts.current_rows);
    Ok(())
}

#[test]
fn removed_endpoint_is_caught_by_full_verify() -> TestResult {
    let store = populated()?;
    let removed = corrupt(
        &store.path,
        "UPDATE entity SET time_removed = time_created WHERE id = ?1",
        store.ids[0],
    )?;
    assert_eq!(removed, 1);

    let fast = verify(&store.path, &options(), VerifyLevel::Fast)?;
    assert!(fast.success);

    let full = verify(&store.path, &options(), VerifyLevel::Full)?;
    assert!(!full.success);
    let messages: Vec<_> = full.findings.iter().map(|f| f.message.as_str()).collect();
    assert!(messages
        .iter()
        .any(|m| m.starts_with("property.base_id") && m.contains("missing entity")));
    assert!(messages.iter().any(|m| m.starts_with("relationship.base_id")));
    Ok(())
}

#[test]
fn reversed_tombstone_fails_fast_verify() -> TestResult {
    let store = populated()?;
    let changed = corrupt(
        &store.path,
        "UPDATE property SET time_removed = time_created - 1 \
         WHERE base_id = ?1 AND time_removed IS NOT NULL",
        store.ids[0],
    )?;
    assert_eq!(changed, 1);

    let report = verify(&store.path, &options(), VerifyLevel::Fast)?;
    assert!(!report.success);
    assert!(report.findings.iter().any(|f| {
        f.severity == VerifySeverity::Error
            && f.message.starts_with("property:")
            && f.message.contains("removed before they were created")
    }));
    Ok(())
}

#[test]
fn stats_report_file_sizes_and_row_counts() -> TestResult {
    let store = populated()?;
    let report = stats(&store.path, &options())?;
    let property = report
        .tables
        .iter()
        .find(|t| t.table == "property")
        .expect("property table listed");
    assert_eq!((property.current, property.tombstoned), (1, 1));
    let relationship = report
        .tables
        .iter()
        .find(|t| t.table == "relationship")
        .expect("relationship table listed");
    assert_eq!(relationship.current, 2);
    let fs = report.filesystem.expect("file-backed store");
    assert!(fs.db_size_bytes > 0);
    assert!(fs.wal_path.ends_with("store.db-wal"));
    assert_eq!(report.store.contexts_declared, 5);
    Ok(())
}

#[test]
fn missing_database_is_not_created_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.db");
    let err = verify(&path, &options(), VerifyLevel::Fast).expect_err("no such store");
    assert!(matches!(err, AdminError::MissingDatabase(ref p) if p == &path));
    assert!(!path.exists());

    let created = stats(&path, &options().create_if_missing(true)).expect("created on demand");
    assert!(path.exists());
    assert!(created.tables.iter().all(|t| t.current == 0));
}
