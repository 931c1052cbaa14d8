use serde::Serialize;

use crate::storage::mvcc::Row;
use crate::storage::records::{Position, RelFields, SlotKey};
use crate::types::{ContextId, EntityId, Flags, ScalarValue, Timestamp};

/// Current state of an entity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EntityRecord {
    /// Identifier.
    pub id: EntityId,
    /// Entity context.
    pub ctx: ContextId,
    /// Flags.
    pub flags: Flags,
    /// Time the current version was written.
    pub time_created: Timestamp,
}

impl EntityRecord {
    pub(crate) fn from_row(id: EntityId, row: Row<ContextId>) -> Self {
        Self {
            id,
            ctx: row.fields,
            flags: row.flags,
            time_created: row.time_created,
        }
    }
}

/// One current entry of an alias or name list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ListEntry {
    /// Position in the list.
    pub pos: Position,
    /// Stored value.
    pub value: String,
    /// Flags.
    pub flags: Flags,
}

impl ListEntry {
    pub(crate) fn from_row(key: SlotKey, row: Row<String>) -> Self {
        Self {
            pos: key.pos,
            value: row.fields,
            flags: row.flags,
        }
    }
}

/// A name matched by a prefix or phonetic search.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct NameMatch {
    /// Matched name.
    pub value: String,
    /// Entity owning the name.
    pub base_id: EntityId,
}

/// One side of a relationship as seen from an endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RelEntry {
    /// The entity at the other end.
    pub other: EntityId,
    /// Position in this endpoint's list.
    pub pos: Position,
    /// Optional payload.
    pub value: Option<ScalarValue>,
    /// Flags.
    pub flags: Flags,
}

impl RelEntry {
    pub(crate) fn from_row(other: EntityId, row: Row<RelFields>) -> Self {
        Self {
            other,
            pos: row.fields.pos,
            value: row.fields.value,
            flags: row.flags,
        }
    }
}

/// One logical relationship, stored as a forward and a backward row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Relationship {
    /// Source entity.
    pub base_id: EntityId,
    /// Target entity.
    pub rel_id: EntityId,
    /// Relationship context.
    pub ctx: ContextId,
    /// Position in the source's outgoing list.
    pub forward_pos: Position,
    /// Position in the target's incoming list.
    pub backward_pos: Position,
    /// Optional payload.
    pub value: Option<ScalarValue>,
    /// Flags.
    pub flags: Flags,
}

impl Relationship {
    /// The relationship as listed under its source.
    pub fn forward(&self) -> RelEntry {
        RelEntry {
            other: self.rel_id,
            pos: self.forward_pos,
            value: self.value.clone(),
            flags: self.flags,
        }
    }

    /// The relationship as listed under its target.
    pub fn backward(&self) -> RelEntry {
        RelEntry {
            other: self.base_id,
            pos: self.backward_pos,
            value: self.value.clone(),
            flags: self.flags,
        }
    }
}

/// A current child of a tree node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ChildEntry {
    /// Child entity.
    pub child_id: EntityId,
    /// Position under the parent.
    pub pos: Position,
    /// Flags.
    pub flags: Flags,
}

/// Window over a positioned list: entries at `start` or later, at most
/// `limit` of them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Page {
    /// Smallest position returned.
    pub start: Position,
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

impl Page {
    /// Every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries from `start`, at most `limit`.
    pub fn new(start: Position, limit: usize) -> Self {
        Self {
            start,
            limit: Some(limit),
        }
    }
}
