#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use sediment::storage::{ContextKind, ContextRegistry, Graph, ShardLayout, StoreOptions};
use sediment::types::{EntityId, Flags, ShardId};
use sediment::Result;

const THREADS: usize = 4;
const PER_THREAD: usize = 25;

fn registry() -> Result<ContextRegistry> {
    ContextRegistry::new()
        .define(1u16, ContextKind::Entity)?
        .define(2u16, ContextKind::Alias)?
        .define(3u16, ContextKind::Relationship)
}

#[test]
fn shared_handle_serializes_writers() -> Result<()> {
    let graph = Arc::new(Graph::open_in_memory(StoreOptions::new(registry()?))?);
    let entity = graph.contexts().entity(1u16)?;
    let knows = graph.contexts().relationship(3u16)?;
    let hub = graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))?;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let graph = Arc::clone(&graph);
            thread::spawn(move || -> Result<Vec<EntityId>> {
                let mut ids = Vec::with_capacity(PER_THREAD);
                for _ in 0..PER_THREAD {
                    let id = graph.write(|tx| {
                        let id = graph.create_entity(tx, entity, Flags::EMPTY)?.id;
                        graph.link(tx, id, hub, knows, None)?;
                        Ok(id)
                    })?;
                    ids.push(id);
                }
                Ok(ids)
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().expect("writer thread panicked")? {
            assert!(all.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(all.len(), THREADS * PER_THREAD);

    graph.read(|tx| {
        let incoming = graph.backward_of(tx, hub, knows)?;
        assert_eq!(incoming.len(), THREADS * PER_THREAD);
        let positions: HashSet<_> = incoming.iter().map(|entry| entry.pos).collect();
        assert_eq!(positions.len(), incoming.len());
        Ok(())
    })
}

#[test]
fn racing_alias_claims_admit_one_owner() -> Result<()> {
    let graph = Arc::new(Graph::open_in_memory(StoreOptions::new(registry()?))?);
    let entity = graph.contexts().entity(1u16)?;
    let alias = graph.contexts().alias(2u16)?;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<(EntityId, bool)> {
                let id = graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id))?;
                barrier.wait();
                match graph.write(|tx| graph.add_alias(tx, id, alias, None, "root@example.org")) {
                    Ok(_) => Ok((id, true)),
                    Err(err) if err.is_conflict() => Ok((id, false)),
                    Err(err) => Err(err),
                }
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        let (id, won) = handle.join().expect("claimant panicked")?;
        if won {
            winners.push(id);
        }
    }
    assert_eq!(winners.len(), 1);
    let owner = graph.read(|tx| graph.lookup_alias(tx, alias, "root@example.org"))?;
    assert_eq!(owner, Some(winners[0]));
    Ok(())
}

#[test]
fn handles_on_distinct_shards_share_one_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.db");
    let layout = ShardLayout::new(4)?;
    let open = |shard: u16| -> Result<Graph> {
        Graph::open(
            &path,
            StoreOptions::new(registry()?)
                .shard(layout, ShardId(shard))
                .busy_timeout(Duration::from_secs(10)),
        )
    };
    // Open sequentially so schema creation does not race.
    let handles: Vec<Graph> = (1..=THREADS as u16).map(|shard| open(shard)).collect::<Result<_>>()?;

    let workers: Vec<_> = handles
        .into_iter()
        .map(|graph| {
            thread::spawn(move || -> Result<Vec<EntityId>> {
                let entity = graph.contexts().entity(1u16)?;
                (0..PER_THREAD)
                    .map(|_| graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id)))
                    .collect()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        let ids = worker.join().expect("shard writer panicked")?;
        let shards: HashSet<_> = ids.iter().map(|&id| layout.shard_of(id)).collect();
        assert_eq!(shards.len(), 1);
        seen.extend(ids);
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);

    let reader = open(0)?;
    let count = reader.read(|tx| {
        let mut found = 0;
        for &id in &seen {
            if reader.get_entity(tx, id)?.is_some() {
                found += 1;
            }
        }
        Ok(found)
    })?;
    assert_eq!(count, seen.len());
    Ok(())
}

#[test]
fn handles_sharing_a_shard_never_reissue_ids() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("same-shard.db");
    let layout = ShardLayout::new(4)?;
    let open = || -> Result<Graph> {
        Graph::open(
            &path,
            StoreOptions::new(registry()?)
                .shard(layout, ShardId(3))
                .busy_timeout(Duration::from_secs(10)),
        )
    };
    let first = open()?;
    let second = open()?;
    let entity = first.contexts().entity(1u16)?;

    let a = first.write(|tx| Ok(first.create_entity(tx, entity, Flags::EMPTY)?.id))?;
    first.write(|tx| first.remove_entity(tx, a).map(drop))?;
    let b = second.write(|tx| Ok(second.create_entity(tx, entity, Flags::EMPTY)?.id))?;
    assert_ne!(a, b);
    assert_eq!(layout.shard_of(b), ShardId(3));
    assert_eq!(layout.counter_of(b), layout.counter_of(a) + 1);

    let c = first.write(|tx| Ok(first.create_entity(tx, entity, Flags::EMPTY)?.id))?;
    assert_eq!(layout.counter_of(c), layout.counter_of(b) + 1);

    let workers: Vec<_> = [first, second]
        .into_iter()
        .map(|graph| {
            thread::spawn(move || -> Result<Vec<EntityId>> {
                (0..PER_THREAD)
                    .map(|_| graph.write(|tx| Ok(graph.create_entity(tx, entity, Flags::EMPTY)?.id)))
                    .collect()
            })
        })
        .collect();
    let mut seen: HashSet<EntityId> = [a, b, c].into_iter().collect();
    for worker in workers {
        for id in worker.join().expect("writer panicked")? {
            assert!(seen.insert(id), "id {id} issued twice");
        }
    }
    assert_eq!(seen.len(), 3 + 2 * PER_THREAD);
    Ok(())
}
