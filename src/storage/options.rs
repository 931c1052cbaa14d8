use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::context::ContextRegistry;
use crate::storage::digest::{DoubleMetaphone, PhoneticEncoder, SipDigest, ValueDigest};
use crate::storage::ids::ShardLayout;
use crate::types::ShardId;

/// SQLite `synchronous` setting applied at open.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchronous {
    /// No fsync.
    Off,
    /// Fsync at WAL checkpoints.
    #[default]
    Normal,
    /// Fsync on every commit.
    Full,
}

impl Synchronous {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Prefix lengths indexed when none are configured.
pub const DEFAULT_PREFIX_LENGTHS: &[u32] = &[1, 2, 3, 4];

/// Configuration options supplied when opening a [`super::Graph`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Identifier split between shard tag and counter.
    pub layout: ShardLayout,
    /// Shard this handle allocates identifiers for.
    pub shard: ShardId,
    /// Optional cap on the allocator counter.
    pub max_counter: Option<u64>,
    /// How long a transaction waits for the database lock before `Busy`.
    pub busy_timeout: Duration,
    /// Durability level.
    pub synchronous: Synchronous,
    /// Character lengths indexed by the prefix lookup, besides the full value.
    pub prefix_lengths: Vec<u32>,
    /// Declared contexts.
    pub contexts: ContextRegistry,
    /// Alias digest.
    pub digest: Arc<dyn ValueDigest>,
    /// Phonetic encoder for name search.
    pub phonetic: Arc<dyn PhoneticEncoder>,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn super::metrics::StorageMetrics>>,
}

impl StoreOptions {
    /// Creates options with the given contexts and default settings.
    pub fn new(contexts: ContextRegistry) -> Self {
        Self {
            layout: ShardLayout::unsharded(),
            shard: ShardId(0),
            max_counter: None,
            busy_timeout: Duration::from_secs(5),
            synchronous: Synchronous::default(),
            prefix_lengths: DEFAULT_PREFIX_LENGTHS.to_vec(),
            contexts,
            digest: Arc::new(SipDigest::default()),
            phonetic: Arc::new(DoubleMetaphone::default()),
            metrics: None,
        }
    }

    /// Sets the shard layout and the shard this handle writes for.
    pub fn shard(mut self, layout: ShardLayout, shard: ShardId) -> Self {
        self.layout = layout;
        self.shard = shard;
        self
    }

    /// Caps the identifier counter.
    pub fn max_counter(mut self, limit: u64) -> Self {
        self.max_counter = Some(limit);
        self
    }

    /// Sets the lock wait timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the durability level.
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Sets the indexed prefix lengths. Zero and duplicate lengths are dropped.
    pub fn prefix_lengths(mut self, lengths: impl IntoIterator<Item = u32>) -> Self {
        let mut lengths: Vec<u32> = lengths.into_iter().filter(|len| *len > 0).collect();
        lengths.sort_unstable();
        lengths.dedup();
        self.prefix_lengths = lengths;
        self
    }

    /// Sets the alias digest.
    pub fn digest(mut self, digest: Arc<dyn ValueDigest>) -> Self {
        self.digest = digest;
        self
    }

    /// Sets the phonetic encoder.
    pub fn phonetic(mut self, encoder: Arc<dyn PhoneticEncoder>) -> Self {
        self.phonetic = encoder;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn super::metrics::StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(ContextRegistry::new())
    }
}
