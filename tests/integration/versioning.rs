#![allow(missing_docs)]

use sediment::storage::mvcc::{KeyState, Removal, VersionState};
use sediment::storage::{ContextKind, ContextRegistry, Graph, SearchMode, StoreOptions, ValueClass};
use sediment::types::{Flags, ScalarValue};
use sediment::Result;

fn open() -> Graph {
    let contexts = ContextRegistry::new()
        .define(1u16, ContextKind::Entity)
        .and_then(|r| {
            r.define(
                2u16,
                ContextKind::Property {
                    class: ValueClass::Bytes,
                },
            )
        })
        .and_then(|r| {
            r.define(
                3u16,
                ContextKind::Name {
                    search: SearchMode::Prefix,
                    loose: false,
                },
            )
        })
        .expect("contexts");
    Graph::open_in_memory(StoreOptions::new(contexts)).expect("open store")
}

#[test]
fn renaming_keeps_tombstoned_predecessor_in_history() -> Result<()> {
    let graph = open();
    let entity = graph.contexts().entity(1u16)?;
    let label = graph.contexts().property(2u16)?;
    let id = graph.write(|tx| {
        let id = graph.create_entity(tx, entity, Flags::EMPTY)?.id;
        graph.set_property(tx, id, label, "Alice".into(), None)?;
        Ok(id)
    })?;
    graph.write(|tx| graph.set_property(tx, id, label, "Alicia".into(), None))?;

    graph.read(|tx| {
        let history = graph.property_history(tx, id, label)?;
        assert_eq!(history.len(), 2);
        let rows: Vec<_> = history.iter().collect();
        assert_eq!(rows[0].fields, ScalarValue::from("Alice"));
        assert!(matches!(rows[0].state(), VersionState::Tombstoned(_)));
        assert_eq!(rows[1].fields, ScalarValue::from("Alicia"));
        assert_eq!(rows[1].state(), VersionState::Current);
        assert_eq!(
            graph.get_property(tx, id, label)?,
            Some(ScalarValue::from("Alicia"))
        );
        Ok(())
    })
}

#[test]
fn history_is_ordered_by_write_and_tombstone_time() -> Result<()> {
    let graph = open();
    let entity = graph.contexts().entity(1u16)?;
    let label = graph.contexts().property(2u16)?;
    let id = graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))?;
    for value in ["a", "b", "c", "d"] {
        graph.write(|tx| graph.set_property(tx, id, label, value.into(), None))?;
    }
    graph.read(|tx| {
        let history = graph.property_history(tx, id, label)?;
        let rows: Vec<_> = history.iter().collect();
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[0].row_id < pair[1].row_id);
            assert!(pair[0].time_created <= pair[1].time_created);
            let removed = pair[0].time_removed.expect("superseded row is tombstoned");
            assert!(removed >= pair[0].time_created);
            assert!(removed <= pair[1].time_created);
        }
        assert_eq!(history.iter().filter(|row| row.is_current()).count(), 1);
        Ok(())
    })
}

#[test]
fn key_state_moves_from_absent_to_current_to_tombstoned() -> Result<()> {
    let graph = open();
    let entity = graph.contexts().entity(1u16)?;
    let label = graph.contexts().property(2u16)?;
    let id = graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))?;

    let state = |graph: &Graph| {
        graph.read(|tx| Ok(KeyState::of(&graph.property_history(tx, id, label)?)))
    };
    assert_eq!(state(&graph)?, KeyState::Absent);

    graph.write(|tx| graph.set_property(tx, id, label, "x".into(), None))?;
    assert_eq!(state(&graph)?, KeyState::Current);

    let removal = graph.write(|tx| graph.clear_property(tx, id, label, None))?;
    assert_eq!(removal, Removal::Tombstoned);
    assert_eq!(state(&graph)?, KeyState::Tombstoned);

    let again = graph.write(|tx| graph.clear_property(tx, id, label, None))?;
    assert_eq!(again, Removal::AlreadyAbsent);

    graph.write(|tx| graph.set_property(tx, id, label, "y".into(), None))?;
    graph.read(|tx| {
        let history = graph.property_history(tx, id, label)?;
        assert_eq!(history.len(), 2);
        assert_eq!(history.state(), KeyState::Current);
        Ok(())
    })
}

#[test]
fn flag_changes_are_versioned() -> Result<()> {
    let graph = open();
    let entity = graph.contexts().entity(1u16)?;
    let hidden = Flags::bit(1)?;
    let pinned = Flags::bit(2)?;
    let id = graph.write(|tx| Ok(graph.create_entity(tx, entity, hidden)?.id))?;
    let record = graph.write(|tx| graph.set_entity_flags(tx, id, pinned, hidden))?;
    assert_eq!(record.flags, pinned);

    // Re-applying the same flags writes nothing.
    graph.write(|tx| graph.set_entity_flags(tx, id, pinned, Flags::EMPTY))?;

    graph.read(|tx| {
        let history = graph.entity_history(tx, id)?;
        let flags: Vec<_> = history.iter().map(|row| row.flags).collect();
        assert_eq!(flags, vec![hidden, pinned]);
        Ok(())
    })
}

#[test]
fn removed_name_slot_can_be_reused() -> Result<()> {
    let graph = open();
    let entity = graph.contexts().entity(1u16)?;
    let names = graph.contexts().name(3u16)?;
    let id = graph.write(|tx| {
        let id = graph.create_entity(tx, entity, Flags::EMPTY)?.id;
        graph.add_name(tx, id, names, Some(0), "Alice")?;
        Ok(id)
    })?;
    graph.write(|tx| {
        let _ = graph.remove_name_at(tx, id, names, 0)?;
        graph.add_name(tx, id, names, Some(0), "Alicia")?;
        Ok(())
    })?;
    graph.read(|tx| {
        let history = graph.name_history(tx, id, names, 0)?;
        let values: Vec<_> = history.iter().map(|row| row.fields.as_str()).collect();
        assert_eq!(values, vec!["Alice", "Alicia"]);
        assert!(!history.iter().next().expect("first version").is_current());
        Ok(())
    })
}
