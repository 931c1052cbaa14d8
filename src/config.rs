//! TOML configuration for opening a store.
//!
//! ```toml
//! [store]
//! path = "graph.db"
//! shard_bits = 8
//! shard = 3
//! synchronous = "full"
//! prefix_lengths = [1, 2, 3]
//! digest_key = "000102030405060708090a0b0c0d0e0f"
//!
//! [[context]]
//! id = 1
//! name = "person"
//! kind = "entity"
//!
//! [[context]]
//! id = 4
//! kind = "name"
//! search = "both"
//! owner = 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{
    ContextDef, ContextRegistry, ShardLayout, SipDigest, StoreOptions, Synchronous,
};
use crate::types::{SedimentError, ShardId};

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the expected layout.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value parsed but cannot be applied.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<ConfigError> for SedimentError {
    fn from(err: ConfigError) -> Self {
        SedimentError::Config(err.to_string())
    }
}

/// The `[store]` table.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Database file.
    pub path: Option<PathBuf>,
    /// High identifier bits reserved for the shard tag.
    #[serde(default)]
    pub shard_bits: u8,
    /// Shard this process allocates identifiers for.
    #[serde(default)]
    pub shard: u16,
    /// Optional cap on the allocator counter.
    pub max_counter: Option<u64>,
    /// Lock wait in milliseconds.
    pub busy_timeout_ms: Option<u64>,
    /// Durability level.
    pub synchronous: Option<Synchronous>,
    /// Indexed prefix lengths.
    pub prefix_lengths: Option<Vec<u32>>,
    /// Hex-encoded 16-byte alias digest key.
    pub digest_key: Option<String>,
}

/// A parsed configuration file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SedimentConfig {
    /// Store settings.
    #[serde(default)]
    pub store: StoreSection,
    /// Context declarations.
    #[serde(default, rename = "context")]
    pub contexts: Vec<ContextDef>,
}

impl SedimentConfig {
    /// Reads and parses the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Database path from the `[store]` table.
    pub fn database(&self) -> Option<&Path> {
        self.store.path.as_deref()
    }

    /// Builds the context registry declared by the `[[context]]` tables.
    pub fn registry(&self) -> Result<ContextRegistry, ConfigError> {
        ContextRegistry::from_defs(self.contexts.iter().cloned()).map_err(|err| {
            ConfigError::Invalid {
                field: "context",
                reason: err.to_string(),
            }
        })
    }

    /// Converts the configuration into [`StoreOptions`].
    pub fn to_options(&self) -> Result<StoreOptions, ConfigError> {
        let store = &self.store;
        let layout = ShardLayout::new(store.shard_bits).map_err(|err| ConfigError::Invalid {
            field: "shard_bits",
            reason: err.to_string(),
        })?;
        if store.shard > layout.max_shard().0 {
            return Err(ConfigError::Invalid {
                field: "shard",
                reason: format!(
                    "shard {} does not fit in {} shard bits",
                    store.shard, store.shard_bits
                ),
            });
        }
        let mut opts = StoreOptions::new(self.registry()?).shard(layout, ShardId(store.shard));
        if let Some(limit) = store.max_counter {
            opts = opts.max_counter(limit);
        }
        if let Some(ms) = store.busy_timeout_ms {
            opts = opts.busy_timeout(Duration::from_millis(ms));
        }
        if let Some(mode) = store.synchronous {
            opts = opts.synchronous(mode);
        }
        if let Some(lengths) = &store.prefix_lengths {
            opts = opts.prefix_lengths(lengths.iter().copied());
        }
        if let Some(key) = &store.digest_key {
            let digest = SipDigest::from_hex(key).map_err(|err| ConfigError::Invalid {
                field: "digest_key",
                reason: err.to_string(),
            })?;
            opts = opts.digest(Arc::new(digest));
        }
        Ok(opts)
    }
}
