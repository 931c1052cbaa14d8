use std::collections::BTreeSet;

use tracing::debug;

use crate::storage::context::TreeCtx;
use crate::storage::mvcc::{self, Removal, Row};
use crate::storage::records::{EdgeKind, Position, SlotKey};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{EntityId, Flags, Result, SedimentError};

use super::graph_types::{ChildEntry, Page};
use super::helpers::{claim_slot, ctx_param, id_param, pos_param, require_entity};
use super::Graph;

fn current_edge(
    tx: &impl TxView,
    base_id: EntityId,
    child_id: EntityId,
    ctx: TreeCtx,
) -> Result<Option<(SlotKey, Row<EntityId>)>> {
    let mut rows = mvcc::scan_current::<EdgeKind, _>(
        tx,
        "base_id = ? AND ctx = ? AND child_id = ?",
        vec![id_param(base_id), ctx_param(ctx.id()), id_param(child_id)],
        "pos",
        None,
    )?;
    Ok(rows.pop())
}

fn attach_edge(
    tx: &mut WriteTx<'_>,
    base_id: EntityId,
    child_id: EntityId,
    ctx: TreeCtx,
    pos: Option<Position>,
    flags: Flags,
) -> Result<Position> {
    let pos = claim_slot::<EdgeKind>(tx, base_id, ctx.id(), pos)?;
    let key = SlotKey {
        base_id,
        ctx: ctx.id(),
        pos,
    };
    mvcc::create::<EdgeKind>(tx, &key, child_id, flags)?;
    Ok(pos)
}

impl Graph {
    /// Attaches `child_id` under `base_id` at `pos`, or last when `pos` is
    /// `None`, and returns the position used. Occupied positions shift up.
    ///
    /// Attaching a child twice under the same parent is a uniqueness
    /// violation. Cycles are not checked.
    pub fn attach(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        child_id: EntityId,
        ctx: TreeCtx,
        pos: Option<Position>,
    ) -> Result<Position> {
        require_entity(&*tx, base_id, ctx.owner(), "tree parent")?;
        require_entity(&*tx, child_id, ctx.target(), "tree child")?;
        let pos = tx.atomic(|tx| attach_edge(tx, base_id, child_id, ctx, pos, Flags::EMPTY))?;
        debug!(parent = %base_id, child = %child_id, ctx = %ctx.id(), pos, "attached");
        Ok(pos)
    }

    /// Tombstones the edge from `base_id` to `child_id`. Siblings keep their
    /// positions.
    pub fn detach(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        child_id: EntityId,
        ctx: TreeCtx,
    ) -> Result<Removal> {
        match current_edge(&*tx, base_id, child_id, ctx)? {
            None => Ok(Removal::AlreadyAbsent),
            Some((key, _)) => mvcc::remove::<EdgeKind>(tx, &key),
        }
    }

    /// Moves `child_id` from `old_parent` to `new_parent` in one step,
    /// keeping the edge's flags.
    pub fn move_child(
        &self,
        tx: &mut WriteTx<'_>,
        child_id: EntityId,
        ctx: TreeCtx,
        old_parent: EntityId,
        new_parent: EntityId,
        pos: Option<Position>,
    ) -> Result<Position> {
        let (key, row) = current_edge(&*tx, old_parent, child_id, ctx)?
            .ok_or(SedimentError::NotFound("edge"))?;
        require_entity(&*tx, new_parent, ctx.owner(), "tree parent")?;
        let pos = tx.atomic(|tx| {
            if mvcc::remove::<EdgeKind>(tx, &key)? == Removal::AlreadyAbsent {
                return Err(SedimentError::Corruption(format!(
                    "edge {key:?} vanished while moving child {child_id}"
                )));
            }
            attach_edge(tx, new_parent, child_id, ctx, pos, row.flags)
        })?;
        debug!(child = %child_id, from = %old_parent, to = %new_parent, pos, "child moved");
        Ok(pos)
    }

    /// Sets `add` and clears `clear` on the edge from `base_id` to `child_id`.
    pub fn set_edge_flags(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        child_id: EntityId,
        ctx: TreeCtx,
        add: Flags,
        clear: Flags,
    ) -> Result<Flags> {
        let (key, _) = current_edge(&*tx, base_id, child_id, ctx)?
            .ok_or(SedimentError::NotFound("edge"))?;
        let row = mvcc::update_flags::<EdgeKind>(tx, &key, add, clear)?;
        Ok(row.flags)
    }

    /// Current children of `base_id` ordered by position.
    pub fn children_of(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: TreeCtx,
    ) -> Result<Vec<ChildEntry>> {
        self.children_page(tx, base_id, ctx, Page::all())
    }

    /// A window of the current children of `base_id`.
    pub fn children_page(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: TreeCtx,
        page: Page,
    ) -> Result<Vec<ChildEntry>> {
        let rows = mvcc::scan_current::<EdgeKind, _>(
            tx,
            "base_id = ? AND ctx = ? AND pos >= ?",
            vec![id_param(base_id), ctx_param(ctx.id()), pos_param(page.start)],
            "pos",
            page.limit,
        )?;
        Ok(rows
            .into_iter()
            .map(|(key, row)| ChildEntry {
                child_id: row.fields,
                pos: key.pos,
                flags: row.flags,
            })
            .collect())
    }

    /// Every entity that currently has `child_id` as a child, in any tree
    /// context.
    pub fn parents_of(&self, tx: &impl TxView, child_id: EntityId) -> Result<BTreeSet<EntityId>> {
        let rows = mvcc::scan_current::<EdgeKind, _>(
            tx,
            "child_id = ?",
            vec![id_param(child_id)],
            "rowid",
            None,
        )?;
        Ok(rows.into_iter().map(|(key, _)| key.base_id).collect())
    }
}
