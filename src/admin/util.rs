use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::storage::Graph;

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// Opens the store at `path` for an administrative command.
///
/// # Errors
///
/// Returns [`AdminError::MissingDatabase`] if the file does not exist and
/// `create_if_missing` is false.
pub fn open_graph(path: &Path, opts: &AdminOpenOptions) -> Result<Graph> {
    if !path.exists() {
        if !opts.create_if_missing {
            return Err(AdminError::missing_database(path));
        }
        ensure_parent_dir(path)?;
        debug!(path = %path.display(), "creating store");
    }
    Ok(Graph::open(path, opts.store.clone())?)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Path of the SQLite write-ahead log next to `path`.
pub(crate) fn wal_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}
