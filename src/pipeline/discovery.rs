//! Source snapshot discovery
//!
//! Resolves the newest object under each entity prefix and opens it as a
//! lazy Parquet scan. Lakes are laid out as one prefix per entity with one
//! object (or partitioned object) per export:
//!
//! ```text
//! lake/
//!   Customers/Customers_historic/
//!     customers_2023-09-01.parquet
//!     customers_2023-09-08.parquet   <- newest wins
//!   Articles/Articles_historic/
//!     ...
//! ```

use crate::error::{LoaderError, Result};
use glob::Pattern;
use polars::prelude::LazyFrame;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Object storage holding the raw snapshots
pub trait SourceStore: Send + Sync {
    /// Most recently modified object under `prefix`
    fn resolve_latest(&self, prefix: &str) -> Result<PathBuf>;

    /// Open an object for lazy reading
    fn scan(&self, object: &Path) -> Result<LazyFrame>;
}

/// Source store over a local or mounted bucket directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    pattern: Pattern,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, pattern: &str) -> Result<Self> {
        let pattern = Pattern::new(pattern).map_err(|e| {
            LoaderError::configuration(format!("Invalid source pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { root, pattern })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceStore for LocalObjectStore {
    fn resolve_latest(&self, prefix: &str) -> Result<PathBuf> {
        let prefix_path = self.root.join(prefix.trim_start_matches('/'));
        let not_found = || LoaderError::SourceNotFound {
            root: self.root.clone(),
            prefix: prefix.to_string(),
        };

        if !prefix_path.exists() {
            return Err(not_found());
        }

        debug!("Listing objects under {}", prefix_path.display());

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in WalkDir::new(&prefix_path).follow_links(true) {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => LoaderError::Io(io),
                None => LoaderError::configuration("symlink loop under source prefix"),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.pattern.matches(name));
            if !matches {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| match e.into_io_error() {
                Some(io) => LoaderError::Io(io),
                None => LoaderError::configuration("unreadable source object metadata"),
            })?;
            let candidate = (metadata.modified()?, entry.into_path());
            // Later modification wins, then the greater path
            if newest.as_ref().is_none_or(|current| candidate > *current) {
                newest = Some(candidate);
            }
        }

        let (_, path) = newest.ok_or_else(not_found)?;
        debug!("Resolved {} to {}", prefix, path.display());
        Ok(path)
    }

    fn scan(&self, object: &Path) -> Result<LazyFrame> {
        Ok(LazyFrame::scan_parquet(object, Default::default())?)
    }
}
