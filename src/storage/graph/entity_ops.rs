use tracing::debug;

use crate::storage::context::EntityCtx;
use crate::storage::mvcc::{self, History, Removal};
use crate::storage::records::EntityKind;
use crate::storage::txn::sealed::Sealed;
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{ContextId, EntityId, Flags, Result};

use super::graph_types::EntityRecord;
use super::helpers::id_param;
use super::Graph;

// Tables whose rows reference an entity, with the columns that hold the id.
const CASCADE: &[(&str, &str)] = &[
    ("property", "base_id = ?"),
    ("alias", "base_id = ?"),
    ("alias_lookup", "base_id = ?"),
    ("name", "base_id = ?"),
    ("prefix_lookup", "base_id = ?"),
    ("phonetic_lookup", "base_id = ?"),
    ("relationship", "base_id = ? OR rel_id = ?"),
    ("edge", "base_id = ? OR child_id = ?"),
];

impl Graph {
    /// Allocates an identifier and writes its entity record.
    ///
    /// The allocator is first moved past the largest id already stored in
    /// this handle's shard. The write transaction holds the database write
    /// lock, so another handle on the same shard cannot slip an id in
    /// between that read and the insert.
    pub fn create_entity(
        &self,
        tx: &mut WriteTx<'_>,
        ctx: EntityCtx,
        flags: Flags,
    ) -> Result<EntityRecord> {
        let stored = Self::high_water(tx.conn(), self.allocator.layout(), self.allocator.shard())?;
        if let Some(stored) = stored {
            self.allocator.advance_past(stored)?;
        }
        let id = self.allocator.allocate()?;
        let row = mvcc::create::<EntityKind>(tx, &id, ctx.id(), flags)?;
        debug!(entity = %id, ctx = %ctx.id(), "entity created");
        Ok(EntityRecord::from_row(id, row))
    }

    /// Returns the current record of `id`.
    pub fn get_entity(&self, tx: &impl TxView, id: EntityId) -> Result<Option<EntityRecord>> {
        Ok(mvcc::get_current::<EntityKind, _>(tx, &id)?.map(|row| EntityRecord::from_row(id, row)))
    }

    /// Every version of the entity record.
    pub fn entity_history(&self, tx: &impl TxView, id: EntityId) -> Result<History<ContextId>> {
        mvcc::history::<EntityKind, _>(tx, &id)
    }

    /// Sets `add` and clears `clear` on the entity record.
    pub fn set_entity_flags(
        &self,
        tx: &mut WriteTx<'_>,
        id: EntityId,
        add: Flags,
        clear: Flags,
    ) -> Result<EntityRecord> {
        let row = mvcc::update_flags::<EntityKind>(tx, &id, add, clear)?;
        Ok(EntityRecord::from_row(id, row))
    }

    /// Tombstones the entity and every row that references it: properties,
    /// aliases, names, their lookup rows, relationships in both directions,
    /// and tree edges where it is parent or child.
    pub fn remove_entity(&self, tx: &mut WriteTx<'_>, id: EntityId) -> Result<Removal> {
        tx.atomic(|tx| {
            let removal = mvcc::remove::<EntityKind>(tx, &id)?;
            if removal == Removal::AlreadyAbsent {
                return Ok(removal);
            }
            let mut cascaded = 0;
            for &(table, filter) in CASCADE {
                let params = vec![id_param(id); filter.matches('?').count()];
                cascaded += mvcc::tombstone_matching(tx, table, filter, params)?;
            }
            debug!(entity = %id, cascaded, "entity removed");
            Ok(removal)
        })
    }
}
