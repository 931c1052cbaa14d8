//! Store administration utilities.
//!
//! This module provides the functions behind the `sediment` CLI: opening a
//! store for maintenance, reporting statistics, and verifying that persisted
//! rows still satisfy the store's versioning and pairing rules.

mod error;
mod options;
mod stats;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Configuration options for opening a store in admin mode.
pub use options::AdminOpenOptions;

/// Statistics collection and reporting.
///
/// Reports current and tombstoned row counts per table, current rows per
/// context, allocator state, and file sizes.
pub use stats::{
    stats, stats_graph, ContextStats, FilesystemStats, StatsReport, StoreStatsSection, TableStats,
};

/// Store integrity verification.
pub use verify::{
    verify, verify_graph, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity,
};

/// Opens a store for an administrative command.
pub use util::open_graph;
