#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use sediment::admin::{verify_graph, VerifyLevel};
use sediment::storage::{
    AliasCtx, ContextKind, ContextRegistry, Graph, NameCtx, PropertyCtx, RelCtx, SearchMode,
    StoreOptions, TreeCtx, ValueClass,
};
use sediment::types::{EntityId, Flags, ScalarValue};

const ENTITIES: usize = 4;

#[derive(Debug, Clone)]
enum Operation {
    SetProperty { entity: usize, value: i64 },
    ClearProperty { entity: usize },
    AddAlias { entity: usize, pos: Option<u32>, value: String },
    RemoveAlias { entity: usize, value: String },
    AddName { entity: usize, pos: Option<u32>, value: String },
    RemoveName { entity: usize, value: String },
    Link { from: usize, to: usize },
    Unlink { from: usize, to: usize },
    Attach { parent: usize, child: usize, pos: Option<u32> },
    Detach { parent: usize, child: usize },
    RemoveEntity { entity: usize },
}

fn arb_entity() -> impl Strategy<Value = usize> {
    0..ENTITIES
}

fn arb_pos() -> impl Strategy<Value = Option<u32>> {
    prop::option::of(0u32..4)
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (arb_entity(), -50i64..50)
            .prop_map(|(entity, value)| Operation::SetProperty { entity, value }),
        arb_entity().prop_map(|entity| Operation::ClearProperty { entity }),
        (arb_entity(), arb_pos(), "[a-c]{1,2}")
            .prop_map(|(entity, pos, value)| Operation::AddAlias { entity, pos, value }),
        (arb_entity(), "[a-c]{1,2}")
            .prop_map(|(entity, value)| Operation::RemoveAlias { entity, value }),
        (arb_entity(), arb_pos(), "[A-C][a-c]{0,3}")
            .prop_map(|(entity, pos, value)| Operation::AddName { entity, pos, value }),
        (arb_entity(), "[A-C][a-c]{0,3}")
            .prop_map(|(entity, value)| Operation::RemoveName { entity, value }),
        (arb_entity(), arb_entity()).prop_map(|(from, to)| Operation::Link { from, to }),
        (arb_entity(), arb_entity()).prop_map(|(from, to)| Operation::Unlink { from, to }),
        (arb_entity(), arb_entity(), arb_pos())
            .prop_map(|(parent, child, pos)| Operation::Attach { parent, child, pos }),
        (arb_entity(), arb_entity())
            .prop_map(|(parent, child)| Operation::Detach { parent, child }),
        arb_entity().prop_map(|entity| Operation::RemoveEntity { entity }),
    ]
}

struct Store {
    graph: Graph,
    ids: Vec<EntityId>,
    score: PropertyCtx,
    handle: AliasCtx,
    name: NameCtx,
    knows: RelCtx,
    contains: TreeCtx,
}

fn open_store() -> sediment::Result<Store> {
    let contexts = ContextRegistry::new()
        .define(1u16, ContextKind::Entity)?
        .define(
            2u16,
            ContextKind::Property {
                class: ValueClass::Int,
            },
        )?
        .define(3u16, ContextKind::Alias)?
        .define(
            4u16,
            ContextKind::Name {
                search: SearchMode::Both,
                loose: true,
            },
        )?
        .define(5u16, ContextKind::Relationship)?
        .define(6u16, ContextKind::Tree)?;
    let graph = Graph::open_in_memory(StoreOptions::new(contexts))?;
    let reg = graph.contexts();
    let entity = reg.entity(1u16)?;
    let ids = graph.write(|tx| {
        (0..ENTITIES)
            .map(|_| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))
            .collect::<sediment::Result<Vec<_>>>()
    })?;
    Ok(Store {
        score: reg.property(2u16)?,
        handle: reg.alias(3u16)?,
        name: reg.name(4u16)?,
        knows: reg.relationship(5u16)?,
        contains: reg.tree(6u16)?,
        graph,
        ids,
    })
}

/// Runs one operation in its own transaction. Rejected operations must
/// leave the store untouched, so their errors are ignored here.
fn apply(store: &Store, op: &Operation, model: &mut BTreeMap<EntityId, i64>) {
    let Store { graph, ids, .. } = store;
    match op {
        Operation::SetProperty { entity, value } => {
            let id = ids[*entity];
            if graph
                .write(|tx| graph.set_property(tx, id, store.score, ScalarValue::Int(*value), None))
                .is_ok()
            {
                model.insert(id, *value);
            }
        }
        Operation::ClearProperty { entity } => {
            let id = ids[*entity];
            if graph.write(|tx| graph.clear_property(tx, id, store.score, None)).is_ok() {
                model.remove(&id);
            }
        }
        Operation::AddAlias { entity, pos, value } => {
            let _ = graph.write(|tx| graph.add_alias(tx, ids[*entity], store.handle, *pos, value));
        }
        Operation::RemoveAlias { entity, value } => {
            let _ = graph.write(|tx| graph.remove_alias(tx, ids[*entity], store.handle, value));
        }
        Operation::AddName { entity, pos, value } => {
            let _ = graph.write(|tx| graph.add_name(tx, ids[*entity], store.name, *pos, value));
        }
        Operation::RemoveName { entity, value } => {
            let _ = graph.write(|tx| graph.remove_name(tx, ids[*entity], store.name, value));
        }
        Operation::Link { from, to } => {
            let _ = graph.write(|tx| graph.link(tx, ids[*from], ids[*to], store.knows, None));
        }
        Operation::Unlink { from, to } => {
            let _ = graph.write(|tx| graph.unlink(tx, ids[*from], ids[*to], store.knows));
        }
        Operation::Attach { parent, child, pos } => {
            let _ = graph.write(|tx| {
                graph.attach(tx, ids[*parent], ids[*child], store.contains, *pos)
            });
        }
        Operation::Detach { parent, child } => {
            let _ = graph.write(|tx| graph.detach(tx, ids[*parent], ids[*child], store.contains));
        }
        Operation::RemoveEntity { entity } => {
            let id = ids[*entity];
            if graph.write(|tx| graph.remove_entity(tx, id)).is_ok() {
                model.remove(&id);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_sequence_keeps_one_current_row_per_key(
        ops in prop::collection::vec(arb_operation(), 1..60)
    ) {
        let store = open_store().unwrap();
        let mut model = BTreeMap::new();
        for op in &ops {
            apply(&store, op, &mut model);
        }

        let report = verify_graph(&store.graph, VerifyLevel::Full).unwrap();
        prop_assert!(report.success, "findings: {:?}", report.findings);

        let graph = &store.graph;
        graph
            .read(|tx| {
                for &id in &store.ids {
                    let stored = graph.get_property(tx, id, store.score)?;
                    assert_eq!(stored, model.get(&id).copied().map(ScalarValue::Int));

                    let positions: Vec<_> = graph
                        .list_aliases(tx, id, store.handle)?
                        .into_iter()
                        .inspect(|entry| {
                            assert_eq!(
                                graph.lookup_alias(tx, store.handle, &entry.value).ok().flatten(),
                                Some(id)
                            );
                        })
                        .map(|entry| entry.pos)
                        .collect();
                    assert!(positions.windows(2).all(|w| w[0] < w[1]));

                    for out in graph.forward_of(tx, id, store.knows)? {
                        let back = graph.backward_of(tx, out.other, store.knows)?;
                        assert!(back.iter().any(|entry| entry.other == id));
                    }
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prop_clamped_increments_stay_within_bounds(
        steps in prop::collection::vec(-20i64..20, 1..40),
        bound in 0i64..30,
    ) {
        let store = open_store().unwrap();
        let graph = &store.graph;
        let id = store.ids[0];
        graph
            .write(|tx| graph.set_property(tx, id, store.score, ScalarValue::Int(0), None))
            .unwrap();
        let mut expected = 0i64;
        for by in steps {
            let limit = if by < 0 { -bound } else { bound };
            let next = graph
                .write(|tx| graph.increment_property(tx, id, store.score, by, Some(limit)))
                .unwrap();
            expected = if by < 0 {
                (expected + by).max(limit)
            } else {
                (expected + by).min(limit)
            };
            prop_assert_eq!(next, Some(expected));
            prop_assert!((-bound..=bound).contains(&expected));
        }
    }
}
