//! Sediment: an append-only, versioned property-graph store on SQLite.
//!
//! Entities carry scalar properties, ordered alias and name lists, directed
//! relationships, and ordered tree edges. Every mutation writes a new row and
//! tombstones the previous one; partial unique indexes guarantee at most one
//! current row per logical key.

#![warn(missing_docs)]

pub mod admin;
pub mod config;
pub mod storage;
pub mod types;

pub use storage::{Graph, StoreOptions};
pub use types::{ContextId, EntityId, Flags, Result, SedimentError, ShardId, Timestamp};
