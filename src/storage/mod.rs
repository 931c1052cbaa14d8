//! Versioned graph storage on SQLite.
//!
//! Entities, scalar properties, ordered alias and name lists with their
//! reverse indexes, relationships, and tree edges. Every table follows the
//! tombstone protocol in [`mvcc`].

/// Typed context declarations.
pub mod context;

/// Alias digests and phonetic encoders.
pub mod digest;

/// Identifier allocation.
pub mod ids;

/// Row versioning protocol.
pub mod mvcc;

/// Table kinds.
pub mod records;

/// SQLite schema.
pub mod schema;

/// Transaction scopes.
pub mod txn;

mod graph;
mod metrics;
mod options;

/// Store handle and its operations.
pub use graph::{
    ChildEntry, EntityRecord, Graph, ListEntry, NameMatch, Page, RelEntry, Relationship,
};

/// Context registry and handles.
pub use context::{
    AliasCtx, ContextDef, ContextKind, ContextRegistry, EntityCtx, NameCtx, PropertyCtx, RelCtx,
    SearchMode, TreeCtx, ValueClass,
};

pub use digest::{DoubleMetaphone, PhoneticCodes, PhoneticEncoder, SipDigest, ValueDigest};
pub use ids::{IdentityAllocator, ShardLayout};

/// Metrics.
pub use metrics::{default_metrics, CounterMetrics, MetricsSnapshot, NoopMetrics, StorageMetrics};

pub use mvcc::{History, KeyState, Removal, Row, VersionState, VersionedKind};

/// Store configuration.
pub use options::{StoreOptions, Synchronous, DEFAULT_PREFIX_LENGTHS};

pub use records::Position;
pub use txn::{Clock, ReadTx, TxView, WriteTx};
