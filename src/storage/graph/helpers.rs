use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};

use crate::storage::context::EntityCtx;
use crate::storage::mvcc::{self, VersionedKind};
use crate::storage::records::{EntityKind, Position, SlotKey};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{ContextId, EntityId, Result, SedimentError};

pub(crate) fn id_param(id: EntityId) -> Value {
    Value::Integer(id.to_sql())
}

pub(crate) fn ctx_param(ctx: ContextId) -> Value {
    Value::Integer(i64::from(ctx.0))
}

pub(crate) fn text_param(value: &str) -> Value {
    Value::Text(value.to_owned())
}

pub(crate) fn pos_param(pos: Position) -> Value {
    Value::Integer(i64::from(pos))
}

/// Fails with `NotFound("entity")` unless `id` has a current entity record,
/// and with `BadContext` if `kind` is given and the record belongs to
/// another entity context. `role` names the end being checked.
pub(crate) fn require_entity(
    tx: &impl TxView,
    id: EntityId,
    kind: Option<EntityCtx>,
    role: &'static str,
) -> Result<()> {
    let row = mvcc::get_current::<EntityKind, _>(tx, &id)?.ok_or(SedimentError::NotFound("entity"))?;
    match kind {
        Some(kind) if kind.id() != row.fields => Err(SedimentError::BadContext {
            ctx: row.fields,
            expected: role,
        }),
        _ => Ok(()),
    }
}

/// Largest current position among rows of `table` matching `filter`.
pub(crate) fn max_position(
    tx: &impl TxView,
    table: &'static str,
    filter: &str,
    params: Vec<Value>,
) -> Result<Option<Position>> {
    let sql = format!("SELECT MAX(pos) FROM {table} WHERE time_removed IS NULL AND ({filter})");
    let max: Option<Position> = tx
        .conn()
        .prepare_cached(&sql)?
        .query_row(params_from_iter(params), |row| row.get(0))
        .optional()?
        .flatten();
    Ok(max)
}

/// Position after the last current row, 0 for an empty list.
pub(crate) fn next_position(
    tx: &impl TxView,
    table: &'static str,
    filter: &str,
    params: Vec<Value>,
) -> Result<Position> {
    match max_position(tx, table, filter, params)? {
        None => Ok(0),
        Some(max) => max
            .checked_add(1)
            .ok_or(SedimentError::Invalid("list position space exhausted")),
    }
}

/// Moves every current entry of the list at `from` or later up by one,
/// highest first so no two current rows ever share a position.
pub(crate) fn shift_slots<K>(
    tx: &mut WriteTx<'_>,
    base_id: EntityId,
    ctx: ContextId,
    from: Position,
) -> Result<usize>
where
    K: VersionedKind<Key = SlotKey>,
{
    let rows = mvcc::scan_current::<K, _>(
        &*tx,
        "base_id = ? AND ctx = ? AND pos >= ?",
        vec![id_param(base_id), ctx_param(ctx), pos_param(from)],
        "pos DESC",
        None,
    )?;
    let shifted = rows.len();
    for (key, row) in rows {
        let pos = key
            .pos
            .checked_add(1)
            .ok_or(SedimentError::Invalid("list position space exhausted"))?;
        let fields = row.fields.clone();
        mvcc::supersede::<K>(tx, &row, &key.at(pos), fields, row.flags)?;
    }
    Ok(shifted)
}

/// Resolves the position a new list entry goes to: the requested one, after
/// shifting any occupant and its successors up, or the end of the list.
pub(crate) fn claim_slot<K>(
    tx: &mut WriteTx<'_>,
    base_id: EntityId,
    ctx: ContextId,
    pos: Option<Position>,
) -> Result<Position>
where
    K: VersionedKind<Key = SlotKey>,
{
    match pos {
        None => next_position(
            &*tx,
            K::TABLE,
            "base_id = ? AND ctx = ?",
            vec![id_param(base_id), ctx_param(ctx)],
        ),
        Some(pos) => {
            let key = SlotKey { base_id, ctx, pos };
            if mvcc::get_current::<K, _>(&*tx, &key)?.is_some() {
                shift_slots::<K>(tx, base_id, ctx, pos)?;
            }
            Ok(pos)
        }
    }
}
