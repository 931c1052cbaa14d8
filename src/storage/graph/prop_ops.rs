use tracing::debug;

use crate::storage::context::{PropertyCtx, ValueClass};
use crate::storage::mvcc::{self, History, Removal, Row};
use crate::storage::records::{PropertyKey, PropertyKind};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{EntityId, Flags, Result, ScalarValue, SedimentError};

use super::helpers::require_entity;
use super::Graph;

impl Graph {
    /// Writes a new version of the property, keeping the flags of the
    /// version it replaces.
    ///
    /// The value must match the context's [`ValueClass`]; a mismatch is
    /// rejected before anything is written. With `expected`, the write only
    /// happens if the property currently holds that value; otherwise it
    /// fails with [`SedimentError::ValueMismatch`].
    pub fn set_property(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: PropertyCtx,
        value: ScalarValue,
        expected: Option<ScalarValue>,
    ) -> Result<Row<ScalarValue>> {
        if !ctx.class().admits(&value) {
            return Err(SedimentError::InvalidAttributeShape(
                "value does not match the property's storage class",
            ));
        }
        require_entity(&*tx, base_id, ctx.owner(), "property owner")?;
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        let row = mvcc::put::<PropertyKind>(tx, &key, value, Flags::EMPTY, expected.as_ref())?;
        debug!(entity = %base_id, ctx = %ctx.id(), "property set");
        Ok(row)
    }

    /// Current value of the property.
    pub fn get_property(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: PropertyCtx,
    ) -> Result<Option<ScalarValue>> {
        Ok(self.get_property_row(tx, base_id, ctx)?.map(|row| row.fields))
    }

    /// Current version of the property, with its flags and timestamps.
    pub fn get_property_row(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: PropertyCtx,
    ) -> Result<Option<Row<ScalarValue>>> {
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        mvcc::get_current::<PropertyKind, _>(tx, &key)
    }

    /// Tombstones the property.
    ///
    /// With `expected`, a current value other than it is left in place and
    /// the call fails with [`SedimentError::ValueMismatch`].
    pub fn clear_property(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: PropertyCtx,
        expected: Option<ScalarValue>,
    ) -> Result<Removal> {
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        match expected {
            None => mvcc::remove::<PropertyKind>(tx, &key),
            Some(expected) => mvcc::remove_if::<PropertyKind>(tx, &key, &expected),
        }
    }

    /// Every version of the property, oldest first.
    pub fn property_history(
        &self,
        tx: &impl TxView,
        base_id: EntityId,
        ctx: PropertyCtx,
    ) -> Result<History<ScalarValue>> {
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        mvcc::history::<PropertyKind, _>(tx, &key)
    }

    /// Sets `add` and clears `clear` on the current property version.
    pub fn set_property_flags(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: PropertyCtx,
        add: Flags,
        clear: Flags,
    ) -> Result<Row<ScalarValue>> {
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        tx.atomic(|tx| mvcc::update_flags::<PropertyKind>(tx, &key, add, clear))
    }

    /// Adds `by` to an integer property and returns the new value.
    ///
    /// With a `limit`, the result is clamped to at most `limit` when `by` is
    /// positive and at least `limit` when it is negative. Returns `None` when
    /// the property has no current value.
    pub fn increment_property(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: PropertyCtx,
        by: i64,
        limit: Option<i64>,
    ) -> Result<Option<i64>> {
        if ctx.class() == ValueClass::Bytes {
            return Err(SedimentError::InvalidAttributeShape(
                "cannot increment a byte-string property",
            ));
        }
        let key = PropertyKey {
            base_id,
            ctx: ctx.id(),
        };
        let Some(prior) = mvcc::get_current::<PropertyKind, _>(&*tx, &key)? else {
            return Ok(None);
        };
        let current = prior.fields.as_int().ok_or(SedimentError::InvalidAttributeShape(
            "cannot increment a byte-string property",
        ))?;
        let next = match limit {
            None => current
                .checked_add(by)
                .ok_or(SedimentError::Invalid("property increment overflows i64"))?,
            Some(limit) => {
                let raw = current.saturating_add(by);
                if by < 0 {
                    raw.max(limit)
                } else {
                    raw.min(limit)
                }
            }
        };
        let flags = prior.flags;
        tx.atomic(|tx| {
            mvcc::supersede::<PropertyKind>(tx, &prior, &key, ScalarValue::Int(next), flags)
        })?;
        Ok(Some(next))
    }
}
