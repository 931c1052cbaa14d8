#![allow(missing_docs)]

use sediment::storage::mvcc::Removal;
use sediment::storage::{
    AliasCtx, ContextKind, ContextRegistry, Graph, NameCtx, Page, SearchMode, StoreOptions,
};
use sediment::types::{EntityId, Flags, SedimentError};
use sediment::Result;

struct Fixture {
    graph: Graph,
    id: EntityId,
    aliases: AliasCtx,
    names: NameCtx,
}

fn setup() -> Result<Fixture> {
    let contexts = ContextRegistry::new()
        .define(1u16, ContextKind::Entity)?
        .define(2u16, ContextKind::Alias)?
        .define(
            3u16,
            ContextKind::Name {
                search: SearchMode::Both,
                loose: false,
            },
        )?;
    let graph = Graph::open_in_memory(StoreOptions::new(contexts))?;
    let entity = graph.contexts().entity(1u16)?;
    let aliases = graph.contexts().alias(2u16)?;
    let names = graph.contexts().name(3u16)?;
    let id = graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))?;
    Ok(Fixture {
        graph,
        id,
        aliases,
        names,
    })
}

fn names_of(fx: &Fixture) -> Result<Vec<(u32, String)>> {
    fx.graph.read(|tx| {
        Ok(fx
            .graph
            .list_names(tx, fx.id, fx.names)?
            .into_iter()
            .map(|entry| (entry.pos, entry.value))
            .collect())
    })
}

#[test]
fn inserting_twice_at_zero_shifts_the_first_entry() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, names, ..
    } = &fx;
    graph.write(|tx| graph.add_name(tx, *id, *names, Some(0), "bob"))?;
    graph.write(|tx| graph.add_name(tx, *id, *names, Some(0), "alice"))?;
    assert_eq!(
        names_of(&fx)?,
        vec![(0, "alice".to_string()), (1, "bob".to_string())]
    );
    graph.read(|tx| {
        // "bob" was written at 0, then moved to 1 by a new version.
        let at_zero = graph.name_history(tx, *id, *names, 0)?;
        let values: Vec<_> = at_zero.iter().map(|row| row.fields.as_str()).collect();
        assert_eq!(values, vec!["bob", "alice"]);
        Ok(())
    })
}

#[test]
fn append_uses_next_position_and_removal_leaves_a_gap() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, names, ..
    } = &fx;
    let positions = graph.write(|tx| {
        let mut out = Vec::new();
        for value in ["a", "b", "c"] {
            out.push(graph.add_name(tx, *id, *names, None, value)?);
        }
        Ok(out)
    })?;
    assert_eq!(positions, vec![0, 1, 2]);

    let removal = graph.write(|tx| graph.remove_name_at(tx, *id, *names, 1))?;
    assert_eq!(removal, Removal::Tombstoned);
    assert_eq!(
        names_of(&fx)?,
        vec![(0, "a".to_string()), (2, "c".to_string())]
    );

    let next = graph.write(|tx| graph.add_name(tx, *id, *names, None, "d"))?;
    assert_eq!(next, 3);
    let filled = graph.write(|tx| graph.add_name(tx, *id, *names, Some(1), "b2"))?;
    assert_eq!(filled, 1);
    assert_eq!(names_of(&fx)?.len(), 4);
    Ok(())
}

#[test]
fn remove_by_value_reports_absence() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, aliases, ..
    } = &fx;
    graph.write(|tx| graph.add_alias(tx, *id, *aliases, None, "ada@example.org"))?;
    let first = graph.write(|tx| graph.remove_alias(tx, *id, *aliases, "ada@example.org"))?;
    let second = graph.write(|tx| graph.remove_alias(tx, *id, *aliases, "ada@example.org"))?;
    assert_eq!(first, Removal::Tombstoned);
    assert_eq!(second, Removal::AlreadyAbsent);
    graph.read(|tx| {
        assert!(graph.list_aliases(tx, *id, *aliases)?.is_empty());
        assert_eq!(graph.lookup_alias(tx, *aliases, "ada@example.org")?, None);
        Ok(())
    })
}

#[test]
fn reorder_moves_value_and_shifts_occupant() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, names, ..
    } = &fx;
    graph.write(|tx| {
        for value in ["a", "b", "c"] {
            graph.add_name(tx, *id, *names, None, value)?;
        }
        Ok(())
    })?;
    let pos = graph.write(|tx| graph.reorder_name(tx, *id, *names, "c", 0))?;
    assert_eq!(pos, 0);
    assert_eq!(
        names_of(&fx)?,
        vec![
            (0, "c".to_string()),
            (1, "a".to_string()),
            (2, "b".to_string())
        ]
    );
    let missing = graph
        .write(|tx| graph.reorder_name(tx, *id, *names, "zz", 0))
        .err()
        .expect("unknown value");
    assert!(matches!(missing, SedimentError::NotFound("name")));
    Ok(())
}

#[test]
fn duplicate_name_in_one_list_is_rejected_atomically() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, names, ..
    } = &fx;
    graph.write(|tx| {
        graph.add_name(tx, *id, *names, None, "Ada")?;
        graph.add_name(tx, *id, *names, None, "Countess")?;
        Ok(())
    })?;
    let err = graph
        .write(|tx| graph.add_name(tx, *id, *names, Some(0), "Countess"))
        .err()
        .expect("duplicate");
    assert!(err.is_conflict());
    assert_eq!(
        names_of(&fx)?,
        vec![(0, "Ada".to_string()), (1, "Countess".to_string())]
    );
    Ok(())
}

#[test]
fn empty_values_are_invalid() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph,
        id,
        aliases,
        names,
    } = &fx;
    let alias_err = graph
        .write(|tx| graph.add_alias(tx, *id, *aliases, None, ""))
        .err()
        .expect("empty alias");
    let name_err = graph
        .write(|tx| graph.add_name(tx, *id, *names, None, ""))
        .err()
        .expect("empty name");
    assert!(matches!(alias_err, SedimentError::Invalid(_)));
    assert!(matches!(name_err, SedimentError::Invalid(_)));
    Ok(())
}

#[test]
fn pages_walk_the_list_in_position_order() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, aliases, ..
    } = &fx;
    graph.write(|tx| {
        for i in 0..7 {
            graph.add_alias(tx, *id, *aliases, None, &format!("alias-{i}"))?;
        }
        Ok(())
    })?;
    graph.read(|tx| {
        let mut seen = Vec::new();
        let mut start = 0;
        loop {
            let page = graph.list_aliases_page(tx, *id, *aliases, Page::new(start, 3))?;
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 3);
            start = page.last().map(|entry| entry.pos + 1).unwrap_or(start);
            seen.extend(page.into_iter().map(|entry| entry.value));
        }
        let expected: Vec<_> = (0..7).map(|i| format!("alias-{i}")).collect();
        assert_eq!(seen, expected);
        Ok(())
    })
}

#[test]
fn list_flags_follow_the_entry() -> Result<()> {
    let fx = setup()?;
    let Fixture {
        graph, id, names, ..
    } = &fx;
    let starred = Flags::bit(1)?;
    graph.write(|tx| graph.add_name(tx, *id, *names, None, "Ada"))?;
    let flags = graph.write(|tx| graph.set_name_flags(tx, *id, *names, "Ada", starred, Flags::EMPTY))?;
    assert_eq!(flags, starred);
    graph.write(|tx| graph.add_name(tx, *id, *names, Some(0), "Augusta"))?;
    graph.read(|tx| {
        let entries = graph.list_names(tx, *id, *names)?;
        assert_eq!(entries[1].value, "Ada");
        assert_eq!(entries[1].flags, starred);
        assert!(entries[0].flags.is_empty());
        Ok(())
    })
}
