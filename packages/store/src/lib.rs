#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Filesystem store for harvested artifacts.
//!
//! Every write goes through [`atomic`], so an interrupted harvest never
//! leaves a truncated `metadata.json` or payload behind. [`artifact`]
//! defines the directory layout consumed by downstream processing.

pub mod artifact;
pub mod atomic;
pub mod slug;

use std::path::{Path, PathBuf};

pub use artifact::{ArtifactDir, Inventory, inventory};

/// Errors that can occur while persisting artifacts.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being written or read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
