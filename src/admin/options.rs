use crate::config::SedimentConfig;
use crate::storage::StoreOptions;

use crate::admin::Result;

/// Common options used when opening a store for administrative commands.
#[derive(Clone, Default)]
pub struct AdminOpenOptions {
    /// Options passed to [`crate::Graph::open`].
    pub store: StoreOptions,
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl AdminOpenOptions {
    /// Builds options from a parsed configuration file.
    pub fn from_config(config: &SedimentConfig) -> Result<Self> {
        Ok(Self {
            store: config.to_options()?,
            create_if_missing: false,
        })
    }

    /// Sets whether a missing database is created.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}
