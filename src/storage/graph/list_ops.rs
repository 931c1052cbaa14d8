//! Ordered alias and name lists.
//!
//! Both lists share one positional protocol: an insert at an occupied
//! position shifts that entry and every later one up by one, an insert
//! without a position appends, and a removal leaves a gap. Every change
//! keeps the list's lookup rows in step inside the same savepoint.

use tracing::debug;

use crate::storage::context::{AliasCtx, NameCtx};
use crate::storage::mvcc::{self, History, Removal, Row, VersionedKind};
use crate::storage::records::{AliasKind, NameKind, Position, SlotKey};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{ContextId, EntityId, Flags, Result, SedimentError};

use super::graph_types::{ListEntry, Page};
use super::helpers::{claim_slot, ctx_param, id_param, pos_param, require_entity, text_param};
use super::Graph;

/// A table holding a positioned list of strings.
trait ListKind: VersionedKind<Key = SlotKey, Fields = String> {}

impl ListKind for AliasKind {}
impl ListKind for NameKind {}

fn list_page<K: ListKind>(
    tx: &impl TxView,
    base_id: EntityId,
    ctx: ContextId,
    page: Page,
) -> Result<Vec<ListEntry>> {
    let rows = mvcc::scan_current::<K, _>(
        tx,
        "base_id = ? AND ctx = ? AND pos >= ?",
        vec![id_param(base_id), ctx_param(ctx), pos_param(page.start)],
        "pos",
        page.limit,
    )?;
    Ok(rows
        .into_iter()
        .map(|(key, row)| ListEntry::from_row(key, row))
        .collect())
}

fn find_value<K: ListKind>(
    tx: &impl TxView,
    base_id: EntityId,
    ctx: ContextId,
    value: &str,
) -> Result<Option<(SlotKey, Row<String>)>> {
    let mut rows = mvcc::scan_current::<K, _>(
        tx,
        "base_id = ? AND ctx = ? AND value = ?",
        vec![id_param(base_id), ctx_param(ctx), text_param(value)],
        "pos",
        None,
    )?;
    Ok(if rows.is_empty() {
        None
    } else {
        Some(rows.swap_remove(0))
    })
}

fn check_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SedimentError::Invalid("list values must not be empty"));
    }
    Ok(())
}

fn insert_entry<K: ListKind>(
    tx: &mut WriteTx<'_>,
    base_id: EntityId,
    ctx: ContextId,
    pos: Option<Position>,
    value: &str,
    flags: Flags,
) -> Result<Position> {
    let pos = claim_slot::<K>(tx, base_id, ctx, pos)?;
    let key = SlotKey { base_id, ctx, pos };
    mvcc::create::<K>(tx, &key, value.to_owned(), flags)?;
    Ok(pos)
}

fn move_entry<K: ListKind>(
    tx: &mut WriteTx<'_>,
    key: SlotKey,
    row: Row<String>,
    new_pos: Position,
) -> Result<Position> {
    if key.pos == new_pos {
        return Ok(new_pos);
    }
    if mvcc::remove::<K>(tx, &key)? == Removal::AlreadyAbsent {
        return Err(SedimentError::Corruption(format!(
            "{} entry {key:?} vanished while moving",
            K::TABLE
        )));
    }
    insert_entry::<K>(tx, key.base_id, key.ctx, Some(new_pos), &row.fields, row.flags)
}

impl Graph {
    /// Inserts an alias at `pos`, or appends it when `pos` is `None`, and
    /// returns the position used.
    ///
    /// Fails with a uniqueness violation if another alias in the context
    /// already has the same digest.
    pub fn add_alias(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: AliasCtx,
        pos: Option<Position>,
        value: &str,
    ) -> Result<Position> {
        check_value(value)?;
        require_entity(&*tx, base_id, ctx.owner(), "alias owner")?;
        let pos = tx.atomic(|tx| {
            let pos = insert_entry::<AliasKind>(tx, base_id, ctx.id(), pos, value, Flags::EMPTY)?;
            self.index_alias(tx, base_id, ctx.id(), value, Flags::EMPTY)?;
            Ok(pos)
        })?;
        debug!(entity = %base_id, ctx = %ctx.id(), pos, "alias added");
        Ok(pos)
    }

    /// Tombstones the alias at `pos` and its lookup row.
    pub fn remove_alias_at(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: AliasCtx,
        pos: Position,
    ) -> Result<Removal> {
        let key = SlotKey {
            base_id,
            ctx: ctx.id(),
            pos,
        };
        let Some(row) = mvcc::get_current::<AliasKind, _>(&*tx, &key)? else {
            return Ok(Removal::AlreadyAbsent);
        };
        tx.atomic(|tx| {
            let removal = mvcc::remove::<AliasKind>(tx, &key)?;
            self.unindex_alias(tx, base_id, ctx.id(), &row.fields)?;
            Ok(removal)
        })
    }

    /// Tombstones the alias holding `value` and its lookup row.
    pub fn remove_alias(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: AliasCtx,
        value: &str,
    ) -> Result<Removal> {
        match find_value::<AliasKind>(&*tx, base_id, ctx.id(), value)? {
            None => Ok(Removal::AlreadyAbsent),
            Some((key, _)) => self.remove_alias_at(tx, base_id, ctx, key.pos),
        }
    }

    /// Current aliases ordered by position.
    pub fn list_aliases(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: AliasCtx,
    ) -> Result<Vec<ListEntry>> {
        list_page::<AliasKind>(tx, base_id, ctx.id(), Page::all())
    }

    /// A window of the current aliases.
    pub fn list_aliases_page(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: AliasCtx,
        page: Page,
    ) -> Result<Vec<ListEntry>> {
        list_page::<AliasKind>(tx, base_id, ctx.id(), page)
    }

    /// Every version written at alias position `pos`.
    pub fn alias_history(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: AliasCtx,
        pos: Position,
    ) -> Result<History<String>> {
        let key = SlotKey {
            base_id,
            ctx: ctx.id(),
            pos,
        };
        mvcc::history::<AliasKind, _>(tx, &key)
    }

    /// Moves an alias to `new_pos`, shifting any occupant up.
    pub fn reorder_alias(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: AliasCtx,
        value: &str,
        new_pos: Position,
    ) -> Result<Position> {
        let (key, row) = find_value::<AliasKind>(&*tx, base_id, ctx.id(), value)?
            .ok_or(SedimentError::NotFound("alias"))?;
        tx.atomic(|tx| move_entry::<AliasKind>(tx, key, row, new_pos))
    }

    /// Sets `add` and clears `clear` on an alias and its lookup row.
    pub fn set_alias_flags(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: AliasCtx,
        value: &str,
        add: Flags,
        clear: Flags,
    ) -> Result<Flags> {
        let (key, _) = find_value::<AliasKind>(&*tx, base_id, ctx.id(), value)?
            .ok_or(SedimentError::NotFound("alias"))?;
        tx.atomic(|tx| {
            let row = mvcc::update_flags::<AliasKind>(tx, &key, add, clear)?;
            self.reflag_alias_index(tx, base_id, ctx.id(), value, add, clear)?;
            Ok(row.flags)
        })
    }

    /// Inserts a name at `pos`, or appends it when `pos` is `None`, and
    /// returns the position used.
    ///
    /// A name already current elsewhere in the same list is a uniqueness
    /// violation. Prefix and phonetic rows are written per the context's
    /// search mode.
    pub fn add_name(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        pos: Option<Position>,
        value: &str,
    ) -> Result<Position> {
        check_value(value)?;
        require_entity(&*tx, base_id, ctx.owner(), "name owner")?;
        let pos = tx.atomic(|tx| {
            let pos = insert_entry::<NameKind>(tx, base_id, ctx.id(), pos, value, Flags::EMPTY)?;
            self.index_name(tx, base_id, ctx, value, Flags::EMPTY)?;
            Ok(pos)
        })?;
        debug!(entity = %base_id, ctx = %ctx.id(), pos, "name added");
        Ok(pos)
    }

    /// Tombstones the name at `pos` and its lookup rows.
    pub fn remove_name_at(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        pos: Position,
    ) -> Result<Removal> {
        let key = SlotKey {
            base_id,
            ctx: ctx.id(),
            pos,
        };
        let Some(row) = mvcc::get_current::<NameKind, _>(&*tx, &key)? else {
            return Ok(Removal::AlreadyAbsent);
        };
        tx.atomic(|tx| {
            let removal = mvcc::remove::<NameKind>(tx, &key)?;
            self.unindex_name(tx, base_id, ctx, &row.fields)?;
            Ok(removal)
        })
    }

    /// Tombstones the name holding `value` and its lookup rows.
    pub fn remove_name(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
    ) -> Result<Removal> {
        match find_value::<NameKind>(&*tx, base_id, ctx.id(), value)? {
            None => Ok(Removal::AlreadyAbsent),
            Some((key, _)) => self.remove_name_at(tx, base_id, ctx, key.pos),
        }
    }

    /// Current names ordered by position.
    pub fn list_names(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: NameCtx,
    ) -> Result<Vec<ListEntry>> {
        list_page::<NameKind>(tx, base_id, ctx.id(), Page::all())
    }

    /// A window of the current names.
    pub fn list_names_page(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: NameCtx,
        page: Page,
    ) -> Result<Vec<ListEntry>> {
        list_page::<NameKind>(tx, base_id, ctx.id(), page)
    }

    /// Every version written at name position `pos`.
    pub fn name_history(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: NameCtx,
        pos: Position,
    ) -> Result<History<String>> {
        let key = SlotKey {
            base_id,
            ctx: ctx.id(),
            pos,
        };
        mvcc::history::<NameKind, _>(tx, &key)
    }

    /// Moves a name to `new_pos`, shifting any occupant up.
    pub fn reorder_name(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
        new_pos: Position,
    ) -> Result<Position> {
        let (key, row) = find_value::<NameKind>(&*tx, base_id, ctx.id(), value)?
            .ok_or(SedimentError::NotFound("name"))?;
        tx.atomic(|tx| move_entry::<NameKind>(tx, key, row, new_pos))
    }

    /// Sets `add` and clears `clear` on a name and its lookup rows.
    pub fn set_name_flags(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
        add: Flags,
        clear: Flags,
    ) -> Result<Flags> {
        let (key, _) = find_value::<NameKind>(&*tx, base_id, ctx.id(), value)?
            .ok_or(SedimentError::NotFound("name"))?;
        tx.atomic(|tx| {
            let row = mvcc::update_flags::<NameKind>(tx, &key, add, clear)?;
            self.reflag_name_index(tx, base_id, ctx, value, add, clear)?;
            Ok(row.flags)
        })
    }
}
