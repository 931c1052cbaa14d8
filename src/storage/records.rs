//! Table kinds: key and payload layouts of every versioned table.

use rusqlite::types::Value;

use crate::storage::digest::DIGEST_LEN;
use crate::storage::mvcc::VersionedKind;
use crate::types::{ContextId, EntityId, Result, ScalarValue, SedimentError};

fn id_value(id: EntityId) -> Value {
    Value::Integer(id.to_sql())
}

fn ctx_value(ctx: ContextId) -> Value {
    Value::Integer(i64::from(ctx.0))
}

fn read_id(row: &rusqlite::Row<'_>, at: usize) -> Result<EntityId> {
    Ok(EntityId::from_sql(row.get(at)?))
}

fn read_ctx(row: &rusqlite::Row<'_>, at: usize) -> Result<ContextId> {
    Ok(ContextId(row.get(at)?))
}

fn scalar_values(value: Option<&ScalarValue>) -> [Value; 2] {
    match value {
        Some(ScalarValue::Int(n)) => [Value::Integer(*n), Value::Null],
        Some(ScalarValue::Bytes(bytes)) => [Value::Null, Value::Blob(bytes.clone())],
        None => [Value::Null, Value::Null],
    }
}

/// Position of an entry in an ordered list.
pub type Position = u32;

/// Key of a positioned entry: alias, name, or tree edge.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SlotKey {
    /// Owning entity.
    pub base_id: EntityId,
    /// Context.
    pub ctx: ContextId,
    /// Position within the list.
    pub pos: Position,
}

impl SlotKey {
    /// The same slot moved to `pos`.
    pub fn at(self, pos: Position) -> Self {
        Self { pos, ..self }
    }
}

const SLOT_KEY: &[&str] = &["base_id", "ctx", "pos"];

fn slot_values(key: &SlotKey) -> Vec<Value> {
    vec![
        id_value(key.base_id),
        ctx_value(key.ctx),
        Value::Integer(i64::from(key.pos)),
    ]
}

fn read_slot(row: &rusqlite::Row<'_>, at: usize) -> Result<SlotKey> {
    Ok(SlotKey {
        base_id: read_id(row, at)?,
        ctx: read_ctx(row, at + 1)?,
        pos: row.get(at + 2)?,
    })
}

/// Entity records, keyed by id.
pub struct EntityKind;

impl VersionedKind for EntityKind {
    const TABLE: &'static str = "entity";
    const NOUN: &'static str = "entity";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];
    const FIELD_COLUMNS: &'static [&'static str] = &["ctx"];
    type Key = EntityId;
    type Fields = ContextId;

    fn key_values(key: &EntityId) -> Vec<Value> {
        vec![id_value(*key)]
    }

    fn field_values(fields: &ContextId) -> Vec<Value> {
        vec![ctx_value(*fields)]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<EntityId> {
        read_id(row, at)
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<ContextId> {
        read_ctx(row, at)
    }
}

/// Key of a scalar property.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PropertyKey {
    /// Owning entity.
    pub base_id: EntityId,
    /// Property context.
    pub ctx: ContextId,
}

/// Scalar properties.
pub struct PropertyKind;

impl VersionedKind for PropertyKind {
    const TABLE: &'static str = "property";
    const NOUN: &'static str = "property";
    const KEY_COLUMNS: &'static [&'static str] = &["base_id", "ctx"];
    const FIELD_COLUMNS: &'static [&'static str] = &["num", "value"];
    type Key = PropertyKey;
    type Fields = ScalarValue;

    fn key_values(key: &PropertyKey) -> Vec<Value> {
        vec![id_value(key.base_id), ctx_value(key.ctx)]
    }

    fn field_values(fields: &ScalarValue) -> Vec<Value> {
        scalar_values(Some(fields)).into()
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<PropertyKey> {
        Ok(PropertyKey {
            base_id: read_id(row, at)?,
            ctx: read_ctx(row, at + 1)?,
        })
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<ScalarValue> {
        ScalarValue::from_columns(row.get(at)?, row.get(at + 1)?)
    }
}

/// Alias list entries.
pub struct AliasKind;

impl VersionedKind for AliasKind {
    const TABLE: &'static str = "alias";
    const NOUN: &'static str = "alias";
    const KEY_COLUMNS: &'static [&'static str] = SLOT_KEY;
    const FIELD_COLUMNS: &'static [&'static str] = &["value"];
    type Key = SlotKey;
    type Fields = String;

    fn key_values(key: &SlotKey) -> Vec<Value> {
        slot_values(key)
    }

    fn field_values(fields: &String) -> Vec<Value> {
        vec![Value::Text(fields.clone())]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<SlotKey> {
        read_slot(row, at)
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<String> {
        Ok(row.get(at)?)
    }
}

/// Name list entries.
pub struct NameKind;

impl VersionedKind for NameKind {
    const TABLE: &'static str = "name";
    const NOUN: &'static str = "name";
    const KEY_COLUMNS: &'static [&'static str] = SLOT_KEY;
    const FIELD_COLUMNS: &'static [&'static str] = &["value"];
    type Key = SlotKey;
    type Fields = String;

    fn key_values(key: &SlotKey) -> Vec<Value> {
        slot_values(key)
    }

    fn field_values(fields: &String) -> Vec<Value> {
        vec![Value::Text(fields.clone())]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<SlotKey> {
        read_slot(row, at)
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<String> {
        Ok(row.get(at)?)
    }
}

/// Key of an alias digest row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AliasLookupKey {
    /// Digest of `(ctx, value)`.
    pub digest: [u8; DIGEST_LEN],
    /// Alias context.
    pub ctx: ContextId,
}

/// Alias digest index: digest to owning entity.
pub struct AliasLookupKind;

impl VersionedKind for AliasLookupKind {
    const TABLE: &'static str = "alias_lookup";
    const NOUN: &'static str = "alias lookup";
    const KEY_COLUMNS: &'static [&'static str] = &["hash", "ctx"];
    const FIELD_COLUMNS: &'static [&'static str] = &["base_id"];
    type Key = AliasLookupKey;
    type Fields = EntityId;

    fn key_values(key: &AliasLookupKey) -> Vec<Value> {
        vec![Value::Blob(key.digest.to_vec()), ctx_value(key.ctx)]
    }

    fn field_values(fields: &EntityId) -> Vec<Value> {
        vec![id_value(*fields)]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<AliasLookupKey> {
        let raw: Vec<u8> = row.get(at)?;
        let digest = raw
            .try_into()
            .map_err(|_| SedimentError::Corruption("alias digest has wrong length".into()))?;
        Ok(AliasLookupKey {
            digest,
            ctx: read_ctx(row, at + 1)?,
        })
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<EntityId> {
        read_id(row, at)
    }
}

/// Key of a prefix index row. `plen == 0` marks the full literal.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PrefixKey {
    /// Name context.
    pub ctx: ContextId,
    /// Owning entity.
    pub base_id: EntityId,
    /// Full name value.
    pub value: String,
    /// Prefix length in characters; 0 for the full literal.
    pub plen: u32,
}

/// Prefix index over names.
pub struct PrefixLookupKind;

impl VersionedKind for PrefixLookupKind {
    const TABLE: &'static str = "prefix_lookup";
    const NOUN: &'static str = "prefix lookup";
    const KEY_COLUMNS: &'static [&'static str] = &["ctx", "base_id", "value", "plen"];
    const FIELD_COLUMNS: &'static [&'static str] = &["prefix"];
    type Key = PrefixKey;
    type Fields = String;

    fn key_values(key: &PrefixKey) -> Vec<Value> {
        vec![
            ctx_value(key.ctx),
            id_value(key.base_id),
            Value::Text(key.value.clone()),
            Value::Integer(i64::from(key.plen)),
        ]
    }

    fn field_values(fields: &String) -> Vec<Value> {
        vec![Value::Text(fields.clone())]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<PrefixKey> {
        Ok(PrefixKey {
            ctx: read_ctx(row, at)?,
            base_id: read_id(row, at + 1)?,
            value: row.get(at + 2)?,
            plen: row.get(at + 3)?,
        })
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<String> {
        Ok(row.get(at)?)
    }
}

/// Key of a phonetic index row.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PhoneticKey {
    /// Name context.
    pub ctx: ContextId,
    /// Owning entity.
    pub base_id: EntityId,
    /// Full name value.
    pub value: String,
    /// Phonetic code.
    pub code: String,
}

/// Phonetic index over names.
pub struct PhoneticLookupKind;

impl VersionedKind for PhoneticLookupKind {
    const TABLE: &'static str = "phonetic_lookup";
    const NOUN: &'static str = "phonetic lookup";
    const KEY_COLUMNS: &'static [&'static str] = &["ctx", "base_id", "value", "code"];
    const FIELD_COLUMNS: &'static [&'static str] = &[];
    type Key = PhoneticKey;
    type Fields = ();

    fn key_values(key: &PhoneticKey) -> Vec<Value> {
        vec![
            ctx_value(key.ctx),
            id_value(key.base_id),
            Value::Text(key.value.clone()),
            Value::Text(key.code.clone()),
        ]
    }

    fn field_values(_fields: &()) -> Vec<Value> {
        Vec::new()
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<PhoneticKey> {
        Ok(PhoneticKey {
            ctx: read_ctx(row, at)?,
            base_id: read_id(row, at + 1)?,
            value: row.get(at + 2)?,
            code: row.get(at + 3)?,
        })
    }

    fn read_fields(_row: &rusqlite::Row<'_>, _at: usize) -> Result<()> {
        Ok(())
    }
}

/// Key of one relationship row. Each logical relationship has a forward
/// row and a backward row that differ only in `forward`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RelKey {
    /// Source entity.
    pub base_id: EntityId,
    /// Relationship context.
    pub ctx: ContextId,
    /// Target entity.
    pub rel_id: EntityId,
    /// `true` for the source-side row.
    pub forward: bool,
}

impl RelKey {
    /// The other row of the same relationship.
    pub fn mirror(self) -> Self {
        Self {
            forward: !self.forward,
            ..self
        }
    }
}

/// Payload of a relationship row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelFields {
    /// Position in the owning endpoint's list.
    pub pos: Position,
    /// Optional scalar payload.
    pub value: Option<ScalarValue>,
}

/// Relationship rows.
pub struct RelationshipKind;

impl VersionedKind for RelationshipKind {
    const TABLE: &'static str = "relationship";
    const NOUN: &'static str = "relationship";
    const KEY_COLUMNS: &'static [&'static str] = &["base_id", "ctx", "rel_id", "forward"];
    const FIELD_COLUMNS: &'static [&'static str] = &["pos", "num", "value"];
    type Key = RelKey;
    type Fields = RelFields;

    fn key_values(key: &RelKey) -> Vec<Value> {
        vec![
            id_value(key.base_id),
            ctx_value(key.ctx),
            id_value(key.rel_id),
            Value::Integer(i64::from(key.forward)),
        ]
    }

    fn field_values(fields: &RelFields) -> Vec<Value> {
        let mut out = vec![Value::Integer(i64::from(fields.pos))];
        out.extend(scalar_values(fields.value.as_ref()));
        out
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<RelKey> {
        Ok(RelKey {
            base_id: read_id(row, at)?,
            ctx: read_ctx(row, at + 1)?,
            rel_id: read_id(row, at + 2)?,
            forward: row.get(at + 3)?,
        })
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<RelFields> {
        let num: Option<i64> = row.get(at + 1)?;
        let value: Option<Vec<u8>> = row.get(at + 2)?;
        let value = match (num, value) {
            (None, None) => None,
            (num, value) => Some(ScalarValue::from_columns(num, value)?),
        };
        Ok(RelFields {
            pos: row.get(at)?,
            value,
        })
    }
}

/// Tree edges, keyed by parent slot.
pub struct EdgeKind;

impl VersionedKind for EdgeKind {
    const TABLE: &'static str = "edge";
    const NOUN: &'static str = "edge";
    const KEY_COLUMNS: &'static [&'static str] = SLOT_KEY;
    const FIELD_COLUMNS: &'static [&'static str] = &["child_id"];
    type Key = SlotKey;
    type Fields = EntityId;

    fn key_values(key: &SlotKey) -> Vec<Value> {
        slot_values(key)
    }

    fn field_values(fields: &EntityId) -> Vec<Value> {
        vec![id_value(*fields)]
    }

    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<SlotKey> {
        read_slot(row, at)
    }

    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<EntityId> {
        read_id(row, at)
    }
}
