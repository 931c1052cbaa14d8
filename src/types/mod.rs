//! Identifiers, flag sets, timestamps, and the crate-wide error type.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an entity. Allocated by [`crate::storage::IdentityAllocator`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Namespace tag distinguishing logical attribute kinds that share one table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ContextId(pub u16);

/// Shard tag stored in the high bits of every allocated [`EntityId`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ShardId(pub u16);

/// Microseconds since the Unix epoch.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct Timestamp(pub i64);

/// Bitset of up to sixteen application-defined flags carried by every row.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Flags(pub u16);

impl EntityId {
    pub(crate) fn to_sql(self) -> i64 {
        self.0 as i64
    }

    pub(crate) fn from_sql(raw: i64) -> Self {
        EntityId(raw as u64)
    }
}

impl Timestamp {
    /// Reads the current wall-clock time.
    pub fn now() -> Self {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        Timestamp((nanos / 1_000) as i64)
    }
}

impl Flags {
    /// No flags set.
    pub const EMPTY: Flags = Flags(0);

    /// Returns the flag at 1-based bit position `position` (1..=16).
    pub fn bit(position: u8) -> Result<Self> {
        if !(1..=16).contains(&position) {
            return Err(SedimentError::Invalid("flag position outside 1..=16"));
        }
        Ok(Flags(1 << (position - 1)))
    }

    /// Returns `true` when every bit of `other` is set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Applies `add` then removes `clear`.
    pub fn apply(self, add: Flags, clear: Flags) -> Flags {
        Flags((self.0 | add.0) & !clear.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        EntityId(value)
    }
}

impl From<EntityId> for u64 {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl From<u16> for ContextId {
    fn from(value: u16) -> Self {
        ContextId(value)
    }
}

impl From<ContextId> for u16 {
    fn from(value: ContextId) -> Self {
        value.0
    }
}

/// Payload of a scalar attribute: an integer or an opaque byte string, never both.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Integer payload, stored in the `num` column.
    Int(i64),
    /// Byte-string payload, stored in the `value` column.
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Builds a value from the nullable `(num, value)` column pair.
    ///
    /// Exactly one half must be present.
    pub fn from_columns(num: Option<i64>, value: Option<Vec<u8>>) -> Result<Self> {
        match (num, value) {
            (Some(n), None) => Ok(ScalarValue::Int(n)),
            (None, Some(bytes)) => Ok(ScalarValue::Bytes(bytes)),
            (Some(_), Some(_)) => Err(SedimentError::InvalidAttributeShape(
                "both num and value are set",
            )),
            (None, None) => Err(SedimentError::InvalidAttributeShape(
                "neither num nor value is set",
            )),
        }
    }

    /// Splits the value back into the `(num, value)` column pair.
    pub fn to_columns(&self) -> (Option<i64>, Option<&[u8]>) {
        match self {
            ScalarValue::Int(n) => (Some(*n), None),
            ScalarValue::Bytes(bytes) => (None, Some(bytes.as_slice())),
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(n) => Some(*n),
            ScalarValue::Bytes(_) => None,
        }
    }

    /// Returns the byte payload, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ScalarValue::Int(_) => None,
            ScalarValue::Bytes(bytes) => Some(bytes),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        ScalarValue::Bytes(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Bytes(value.as_bytes().to_vec())
    }
}

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum SedimentError {
    /// A write would have produced a second current row for a uniqueness key.
    #[error("uniqueness violation on {table}: {detail}")]
    UniquenessViolation {
        /// Table whose partial unique constraint rejected the write.
        table: &'static str,
        /// Human-readable key description.
        detail: String,
    },
    /// Scalar payload did not have exactly one of its integer/blob halves set,
    /// or did not match the storage class of its context.
    #[error("invalid attribute shape: {0}")]
    InvalidAttributeShape(&'static str),
    /// A write referenced a parent object that has no current row.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A conditional write found a different current value than expected.
    #[error("{0} does not hold the expected value")]
    ValueMismatch(&'static str),
    /// The per-shard counter space is used up.
    #[error("identity allocator exhausted for shard {shard}")]
    AllocatorExhausted {
        /// Shard whose counter overflowed.
        shard: ShardId,
    },
    /// A context id was used against a table it is not registered for.
    #[error("context {ctx} is not a {expected} context")]
    BadContext {
        /// Offending context id.
        ctx: ContextId,
        /// Context kind the operation required.
        expected: &'static str,
    },
    /// The database stayed locked for longer than the busy timeout.
    #[error("database busy")]
    Busy,
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Persisted state violates an engine invariant.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(rusqlite::Error),
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SedimentError {
    /// Returns `true` when repeating the enclosing transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SedimentError::Busy | SedimentError::UniquenessViolation { .. }
        )
    }

    /// Returns `true` for uniqueness conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SedimentError::UniquenessViolation { .. })
    }
}

impl From<rusqlite::Error> for SedimentError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return SedimentError::Busy;
            }
        }
        SedimentError::Sqlite(err)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SedimentError>;
