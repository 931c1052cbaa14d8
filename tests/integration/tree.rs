#![allow(missing_docs)]

use std::collections::BTreeSet;

use sediment::storage::mvcc::Removal;
use sediment::storage::{ContextKind, ContextRegistry, Graph, Page, StoreOptions, TreeCtx};
use sediment::types::{EntityId, Flags, SedimentError};
use sediment::Result;

const NODE: u16 = 1;
const CONTAINS: u16 = 2;
const OUTLINE: u16 = 3;

struct Fixture {
    graph: Graph,
    ids: Vec<EntityId>,
    contains: TreeCtx,
    outline: TreeCtx,
}

fn setup(count: usize) -> Result<Fixture> {
    let contexts = ContextRegistry::new()
        .define(NODE, ContextKind::Entity)?
        .define(CONTAINS, ContextKind::Tree)?
        .define(OUTLINE, ContextKind::Tree)?;
    let graph = Graph::open_in_memory(StoreOptions::new(contexts))?;
    let node = graph.contexts().entity(NODE)?;
    let contains = graph.contexts().tree(CONTAINS)?;
    let outline = graph.contexts().tree(OUTLINE)?;
    let ids = graph.write(|tx| {
        (0..count)
            .map(|_| Ok(graph.create_entity(tx, node, Flags::EMPTY)?.id))
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(Fixture {
        graph,
        ids,
        contains,
        outline,
    })
}

fn children(fx: &Fixture, parent: EntityId, ctx: TreeCtx) -> Result<Vec<(u32, EntityId)>> {
    fx.graph.read(|tx| {
        Ok(fx
            .graph
            .children_of(tx, parent, ctx)?
            .into_iter()
            .map(|entry| (entry.pos, entry.child_id))
            .collect())
    })
}

#[test]
fn attach_appends_and_inserting_shifts_siblings() -> Result<()> {
    let fx = setup(5)?;
    let (root, a, b, c, d) = (fx.ids[0], fx.ids[1], fx.ids[2], fx.ids[3], fx.ids[4]);
    fx.graph.write(|tx| {
        assert_eq!(fx.graph.attach(tx, root, a, fx.contains, None)?, 0);
        assert_eq!(fx.graph.attach(tx, root, b, fx.contains, None)?, 1);
        assert_eq!(fx.graph.attach(tx, root, c, fx.contains, Some(0))?, 0);
        assert_eq!(fx.graph.attach(tx, root, d, fx.contains, Some(7))?, 7);
        Ok(())
    })?;
    assert_eq!(
        children(&fx, root, fx.contains)?,
        vec![(0, c), (1, a), (2, b), (7, d)]
    );
    Ok(())
}

#[test]
fn detach_leaves_sibling_positions_alone() -> Result<()> {
    let fx = setup(4)?;
    let root = fx.ids[0];
    fx.graph.write(|tx| {
        for &child in &fx.ids[1..] {
            fx.graph.attach(tx, root, child, fx.contains, None)?;
        }
        Ok(())
    })?;
    let removal = fx.graph.write(|tx| fx.graph.detach(tx, root, fx.ids[2], fx.contains))?;
    assert_eq!(removal, Removal::Tombstoned);
    assert_eq!(
        children(&fx, root, fx.contains)?,
        vec![(0, fx.ids[1]), (2, fx.ids[3])]
    );
    let again = fx.graph.write(|tx| fx.graph.detach(tx, root, fx.ids[2], fx.contains))?;
    assert_eq!(again, Removal::AlreadyAbsent);
    Ok(())
}

#[test]
fn same_child_twice_under_one_parent_is_a_conflict() -> Result<()> {
    let fx = setup(3)?;
    let (root, a, b) = (fx.ids[0], fx.ids[1], fx.ids[2]);
    fx.graph.write(|tx| {
        fx.graph.attach(tx, root, a, fx.contains, None)?;
        fx.graph.attach(tx, root, b, fx.contains, None)?;
        Ok(())
    })?;
    let err = fx
        .graph
        .write(|tx| fx.graph.attach(tx, root, b, fx.contains, Some(0)))
        .err()
        .expect("b is already a child");
    assert!(err.is_conflict());
    // The shift that preceded the failed insert was rolled back too.
    assert_eq!(children(&fx, root, fx.contains)?, vec![(0, a), (1, b)]);

    // A different tree context is a separate namespace.
    fx.graph
        .write(|tx| fx.graph.attach(tx, root, b, fx.outline, None))?;
    assert_eq!(children(&fx, root, fx.outline)?, vec![(0, b)]);
    Ok(())
}

#[test]
fn attach_requires_existing_entities() -> Result<()> {
    let fx = setup(2)?;
    let ghost = EntityId(9_999);
    let err = fx
        .graph
        .write(|tx| fx.graph.attach(tx, fx.ids[0], ghost, fx.contains, None))
        .err()
        .expect("ghost child");
    assert!(matches!(err, SedimentError::NotFound("entity")));
    Ok(())
}

#[test]
fn move_child_carries_flags_to_the_new_parent() -> Result<()> {
    let fx = setup(4)?;
    let (old, new, child, sibling) = (fx.ids[0], fx.ids[1], fx.ids[2], fx.ids[3]);
    let pinned = Flags::bit(2)?;
    fx.graph.write(|tx| {
        fx.graph.attach(tx, old, child, fx.contains, None)?;
        fx.graph.attach(tx, new, sibling, fx.contains, None)?;
        fx.graph
            .set_edge_flags(tx, old, child, fx.contains, pinned, Flags::EMPTY)?;
        Ok(())
    })?;

    let pos = fx
        .graph
        .write(|tx| fx.graph.move_child(tx, child, fx.contains, old, new, Some(0)))?;
    assert_eq!(pos, 0);
    assert!(children(&fx, old, fx.contains)?.is_empty());
    fx.graph.read(|tx| {
        let under_new = fx.graph.children_of(tx, new, fx.contains)?;
        assert_eq!(under_new.len(), 2);
        assert_eq!(under_new[0].child_id, child);
        assert_eq!(under_new[0].flags, pinned);
        assert_eq!(under_new[1].child_id, sibling);
        assert_eq!(under_new[1].flags, Flags::EMPTY);
        Ok(())
    })?;

    let err = fx
        .graph
        .write(|tx| fx.graph.move_child(tx, child, fx.contains, old, new, None))
        .err()
        .expect("no longer under old parent");
    assert!(matches!(err, SedimentError::NotFound("edge")));
    Ok(())
}

#[test]
fn parents_span_every_tree_context() -> Result<()> {
    let fx = setup(4)?;
    let (p1, p2, p3, child) = (fx.ids[0], fx.ids[1], fx.ids[2], fx.ids[3]);
    fx.graph.write(|tx| {
        fx.graph.attach(tx, p1, child, fx.contains, None)?;
        fx.graph.attach(tx, p2, child, fx.outline, None)?;
        fx.graph.attach(tx, p3, child, fx.contains, None)?;
        Ok(())
    })?;
    fx.graph
        .write(|tx| fx.graph.detach(tx, p3, child, fx.contains))?;
    let parents = fx.graph.read(|tx| fx.graph.parents_of(tx, child))?;
    assert_eq!(parents, BTreeSet::from([p1, p2]));
    Ok(())
}

#[test]
fn children_page_starts_at_position() -> Result<()> {
    let fx = setup(6)?;
    let root = fx.ids[0];
    fx.graph.write(|tx| {
        for &child in &fx.ids[1..] {
            fx.graph.attach(tx, root, child, fx.contains, None)?;
        }
        Ok(())
    })?;
    fx.graph.read(|tx| {
        let page = fx
            .graph
            .children_page(tx, root, fx.contains, Page::new(2, 2))?;
        let ids: Vec<_> = page.iter().map(|entry| entry.child_id).collect();
        assert_eq!(ids, vec![fx.ids[3], fx.ids[4]]);
        Ok(())
    })
}
