use tracing::{debug, warn};

use crate::storage::context::RelCtx;
use crate::storage::mvcc::{self, Removal, Row};
use crate::storage::records::{Position, RelFields, RelKey, RelationshipKind};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{EntityId, Flags, Result, ScalarValue, SedimentError};

use super::graph_types::{Page, RelEntry, Relationship};
use super::helpers::{ctx_param, id_param, next_position, pos_param, require_entity};
use super::Graph;

fn forward_key(base_id: EntityId, rel_id: EntityId, ctx: RelCtx) -> RelKey {
    RelKey {
        base_id,
        ctx: ctx.id(),
        rel_id,
        forward: true,
    }
}

fn assemble(key: RelKey, forward: Row<RelFields>, backward: Row<RelFields>) -> Relationship {
    Relationship {
        base_id: key.base_id,
        rel_id: key.rel_id,
        ctx: key.ctx,
        forward_pos: forward.fields.pos,
        backward_pos: backward.fields.pos,
        value: forward.fields.value,
        flags: forward.flags,
    }
}

fn half_linked(key: &RelKey) -> SedimentError {
    warn!(base = %key.base_id, rel = %key.rel_id, ctx = %key.ctx, "relationship half-linked");
    SedimentError::Corruption(format!(
        "relationship {} -> {} in context {} has only one current row",
        key.base_id, key.rel_id, key.ctx
    ))
}

/// Both current rows of a relationship, or `None` if neither exists.
fn current_pair(
    tx: &impl TxView,
    key: RelKey,
) -> Result<Option<(Row<RelFields>, Row<RelFields>)>> {
    let forward = mvcc::get_current::<RelationshipKind, _>(tx, &key)?;
    let backward = mvcc::get_current::<RelationshipKind, _>(tx, &key.mirror())?;
    match (forward, backward) {
        (Some(f), Some(b)) => Ok(Some((f, b))),
        (None, None) => Ok(None),
        _ => Err(half_linked(&key)),
    }
}

fn endpoint_page(
    tx: &impl TxView,
    filter: &str,
    endpoint: EntityId,
    ctx: RelCtx,
    page: Page,
    forward: bool,
) -> Result<Vec<RelEntry>> {
    let rows = mvcc::scan_current::<RelationshipKind, _>(
        tx,
        filter,
        vec![id_param(endpoint), ctx_param(ctx.id()), pos_param(page.start)],
        "pos",
        page.limit,
    )?;
    Ok(rows
        .into_iter()
        .map(|(key, row)| {
            let other = if forward { key.rel_id } else { key.base_id };
            RelEntry::from_row(other, row)
        })
        .collect())
}

const FORWARD_FILTER: &str = "base_id = ? AND ctx = ? AND forward = 1 AND pos >= ?";
const BACKWARD_FILTER: &str = "rel_id = ? AND ctx = ? AND forward = 0 AND pos >= ?";

fn side_filter(forward: bool) -> &'static str {
    if forward {
        "base_id = ? AND ctx = ? AND forward = 1"
    } else {
        "rel_id = ? AND ctx = ? AND forward = 0"
    }
}

/// Moves every current row of one endpoint's list at `from` or later up by
/// one, highest first.
fn shift_side(
    tx: &mut WriteTx<'_>,
    forward: bool,
    endpoint: EntityId,
    ctx: RelCtx,
    from: Position,
) -> Result<usize> {
    let filter = if forward { FORWARD_FILTER } else { BACKWARD_FILTER };
    let rows = mvcc::scan_current::<RelationshipKind, _>(
        &*tx,
        filter,
        vec![id_param(endpoint), ctx_param(ctx.id()), pos_param(from)],
        "pos DESC",
        None,
    )?;
    let shifted = rows.len();
    for (key, row) in rows {
        let pos = row
            .fields
            .pos
            .checked_add(1)
            .ok_or(SedimentError::Invalid("list position space exhausted"))?;
        let fields = RelFields {
            pos,
            value: row.fields.value.clone(),
        };
        mvcc::supersede::<RelationshipKind>(tx, &row, &key, fields, row.flags)?;
    }
    Ok(shifted)
}

/// Position a new row takes in one endpoint's list: `pos` after shifting
/// any occupant up, or the end of the list.
fn claim_side(
    tx: &mut WriteTx<'_>,
    forward: bool,
    endpoint: EntityId,
    ctx: RelCtx,
    pos: Option<Position>,
) -> Result<Position> {
    let params = vec![id_param(endpoint), ctx_param(ctx.id())];
    match pos {
        None => next_position(&*tx, "relationship", side_filter(forward), params),
        Some(pos) => {
            let filter = format!("{} AND pos = ?", side_filter(forward));
            let mut params = params;
            params.push(pos_param(pos));
            let occupied =
                mvcc::scan_current::<RelationshipKind, _>(&*tx, &filter, params, "pos", Some(1))?;
            if !occupied.is_empty() {
                shift_side(tx, forward, endpoint, ctx, pos)?;
            }
            Ok(pos)
        }
    }
}

impl Graph {
    /// Links `base_id` to `rel_id`, appending the relationship to the
    /// source's outgoing list and the target's incoming list.
    ///
    /// Both rows are written together; linking a pair that is already linked
    /// in `ctx` is a uniqueness violation.
    pub fn link(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
        value: Option<ScalarValue>,
    ) -> Result<Relationship> {
        self.link_at(tx, base_id, rel_id, ctx, value, None, None)
    }

    /// Links `base_id` to `rel_id` at explicit positions.
    ///
    /// `forward_pos` places the relationship in the source's outgoing list
    /// and `backward_pos` in the target's incoming list; occupied positions
    /// shift up as in the other ordered lists. `None` appends.
    #[allow(clippy::too_many_arguments)]
    pub fn link_at(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
        value: Option<ScalarValue>,
        forward_pos: Option<Position>,
        backward_pos: Option<Position>,
    ) -> Result<Relationship> {
        require_entity(&*tx, base_id, ctx.owner(), "relationship source")?;
        require_entity(&*tx, rel_id, ctx.target(), "relationship target")?;
        let key = forward_key(base_id, rel_id, ctx);
        let rel = tx.atomic(|tx| {
            let forward_pos = claim_side(tx, true, base_id, ctx, forward_pos)?;
            let backward_pos = claim_side(tx, false, rel_id, ctx, backward_pos)?;
            let forward = mvcc::create::<RelationshipKind>(
                tx,
                &key,
                RelFields {
                    pos: forward_pos,
                    value: value.clone(),
                },
                Flags::EMPTY,
            )?;
            let backward = mvcc::create::<RelationshipKind>(
                tx,
                &key.mirror(),
                RelFields {
                    pos: backward_pos,
                    value,
                },
                Flags::EMPTY,
            )?;
            Ok(assemble(key, forward, backward))
        })?;
        debug!(base = %base_id, rel = %rel_id, ctx = %ctx.id(), "linked");
        Ok(rel)
    }

    /// Tombstones both rows of the relationship.
    ///
    /// Finding exactly one current row is reported as corruption and nothing
    /// is changed.
    pub fn unlink(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
    ) -> Result<Removal> {
        let key = forward_key(base_id, rel_id, ctx);
        tx.atomic(|tx| {
            let forward = mvcc::remove::<RelationshipKind>(tx, &key)?;
            let backward = mvcc::remove::<RelationshipKind>(tx, &key.mirror())?;
            if forward != backward {
                return Err(half_linked(&key));
            }
            if forward.removed() {
                debug!(base = %base_id, rel = %rel_id, ctx = %ctx.id(), "unlinked");
            }
            Ok(forward)
        })
    }

    /// The relationship between `base_id` and `rel_id`, if linked.
    pub fn get_relationship(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
    ) -> Result<Option<Relationship>> {
        let key = forward_key(base_id, rel_id, ctx);
        Ok(current_pair(tx, key)?.map(|(f, b)| assemble(key, f, b)))
    }

    /// Replaces the relationship's payload, keeping both positions.
    ///
    /// With `expected`, the update only happens if the relationship
    /// currently carries that value; otherwise it fails with
    /// [`SedimentError::ValueMismatch`].
    pub fn update_relationship(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
        value: Option<ScalarValue>,
        expected: Option<ScalarValue>,
    ) -> Result<Relationship> {
        let key = forward_key(base_id, rel_id, ctx);
        let (f, b) = current_pair(&*tx, key)?.ok_or(SedimentError::NotFound("relationship"))?;
        if expected.is_some() && f.fields.value != expected {
            return Err(SedimentError::ValueMismatch("relationship"));
        }
        tx.atomic(|tx| {
            let forward = mvcc::supersede::<RelationshipKind>(
                tx,
                &f,
                &key,
                RelFields {
                    pos: f.fields.pos,
                    value: value.clone(),
                },
                f.flags,
            )?;
            let backward = mvcc::supersede::<RelationshipKind>(
                tx,
                &b,
                &key.mirror(),
                RelFields {
                    pos: b.fields.pos,
                    value,
                },
                b.flags,
            )?;
            Ok(assemble(key, forward, backward))
        })
    }

    /// Moves the relationship to `pos` in the source's outgoing list
    /// (`forward`) or the target's incoming list. The entry leaves a gap at
    /// its old position and shifts any occupant of `pos` up; the other
    /// list is untouched.
    pub fn reorder_relationship(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
        forward: bool,
        pos: Position,
    ) -> Result<Relationship> {
        let key = forward_key(base_id, rel_id, ctx);
        let (f, b) = current_pair(&*tx, key)?.ok_or(SedimentError::NotFound("relationship"))?;
        let (side_key, row, endpoint) = if forward {
            (key, f, base_id)
        } else {
            (key.mirror(), b, rel_id)
        };
        if row.fields.pos == pos {
            return self
                .get_relationship(&*tx, base_id, rel_id, ctx)?
                .ok_or(SedimentError::NotFound("relationship"));
        }
        tx.atomic(|tx| {
            if mvcc::remove::<RelationshipKind>(tx, &side_key)? == Removal::AlreadyAbsent {
                return Err(half_linked(&key));
            }
            let pos = claim_side(tx, forward, endpoint, ctx, Some(pos))?;
            mvcc::create::<RelationshipKind>(
                tx,
                &side_key,
                RelFields {
                    pos,
                    value: row.fields.value.clone(),
                },
                row.flags,
            )?;
            Ok(())
        })?;
        debug!(base = %base_id, rel = %rel_id, ctx = %ctx.id(), forward, pos, "relationship reordered");
        current_pair(&*tx, key)?
            .map(|(f, b)| assemble(key, f, b))
            .ok_or_else(|| half_linked(&key))
    }

    /// Sets `add` and clears `clear` on both rows of the relationship.
    pub fn set_relationship_flags(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        rel_id: EntityId,
        ctx: RelCtx,
        add: Flags,
        clear: Flags,
    ) -> Result<Relationship> {
        let key = forward_key(base_id, rel_id, ctx);
        if current_pair(&*tx, key)?.is_none() {
            return Err(SedimentError::NotFound("relationship"));
        }
        tx.atomic(|tx| {
            let forward = mvcc::update_flags::<RelationshipKind>(tx, &key, add, clear)?;
            let backward = mvcc::update_flags::<RelationshipKind>(tx, &key.mirror(), add, clear)?;
            Ok(assemble(key, forward, backward))
        })
    }

    /// Outgoing relationships of `base_id` ordered by position.
    pub fn forward_of(&self, tx: &impl TxView, base_id: EntityId, ctx: RelCtx) -> Result<Vec<RelEntry>> {
        endpoint_page(tx, FORWARD_FILTER, base_id, ctx, Page::all(), true)
    }

    /// A window of the outgoing relationships of `base_id`.
    pub fn forward_page(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: RelCtx,
        page: Page,
    ) -> Result<Vec<RelEntry>> {
        endpoint_page(tx, FORWARD_FILTER, base_id, ctx, page, true)
    }

    /// Incoming relationships of `rel_id` ordered by position.
    pub fn backward_of(&self, tx: &impl TxView, rel_id: EntityId, ctx: RelCtx) -> Result<Vec<RelEntry>> {
        endpoint_page(tx, BACKWARD_FILTER, rel_id, ctx, Page::all(), false)
    }

    /// A window of the incoming relationships of `rel_id`.
    pub fn backward_page(
        &self,
        tx: &impl TxView,
        rel_id: EntityId,
        ctx: RelCtx,
        page: Page,
    ) -> Result<Vec<RelEntry>> {
        endpoint_page(tx, BACKWARD_FILTER, rel_id, ctx, page, false)
    }
}
