#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harvest orchestration for open-access documents.
//!
//! [`orchestrator::harvest_source`] drives one connector through all of its
//! queries and persists what it finds; [`runner::run_pipeline`] runs every
//! enabled source in pipeline order with per-source failure isolation.

pub mod orchestrator;
pub mod runner;
pub mod worker;

use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;

use openstrength_fetch::{FetchError, HttpClient};
use openstrength_harvest_models::{HarvestStats, SourceKind};
use openstrength_source::SourceError;
use openstrength_source::config::{HarvestConfig, LicensesConfig, TimeWindow};
use openstrength_source::progress::{HarvestProgress, null_progress};
use openstrength_store::StoreError;

pub use orchestrator::harvest_source;
pub use runner::run_pipeline;

/// Environment variable restricting which sources run.
pub const SOURCES_ENV: &str = "OPENSTRENGTH_SOURCES";

/// Errors that can occur while harvesting.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Invalid invocation or configuration outside a single source.
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong.
        message: String,
    },

    /// The connector failed in a way that aborts the source.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Writing artifacts failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The source task panicked.
    #[error("{kind} harvest panicked: {message}")]
    Panicked {
        /// Source whose task panicked.
        kind: SourceKind,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl HarvestError {
    /// Shorthand for [`HarvestError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// A source that stopped early, with the counts collected before it did.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SourceFailure {
    /// Counters at the point the source stopped.
    pub stats: HarvestStats,
    /// Why it stopped.
    pub error: HarvestError,
}

impl From<HarvestError> for SourceFailure {
    fn from(error: HarvestError) -> Self {
        Self {
            stats: HarvestStats::default(),
            error,
        }
    }
}

/// Per-invocation overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestOptions {
    /// Re-harvest items that are already complete on disk.
    pub force: bool,
    /// Cap on candidates seen per query.
    pub limit: Option<u64>,
}

/// Everything shared by the sources of one run.
#[derive(Clone)]
pub struct HarvestContext {
    /// Root of the artifact tree.
    pub raw_root: PathBuf,
    /// Base client; each source gets a copy with its own rate limiter.
    pub http: HttpClient,
    /// Download workers per page.
    pub max_workers: usize,
    /// Global license allow-list.
    pub licenses: LicensesConfig,
    /// Default date window.
    pub time_window: TimeWindow,
    /// Invocation overrides.
    pub options: HarvestOptions,
    /// Progress sink.
    pub progress: Arc<dyn HarvestProgress>,
}

impl std::fmt::Debug for HarvestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestContext")
            .field("raw_root", &self.raw_root)
            .field("max_workers", &self.max_workers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl HarvestContext {
    /// Builds the context described by `config`, reporting to a
    /// [`NullProgress`](openstrength_source::progress::NullProgress).
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Fetch`] if the HTTP client cannot be built.
    pub fn from_config(config: &HarvestConfig, options: HarvestOptions) -> Result<Self, HarvestError> {
        Ok(Self {
            raw_root: config.paths.raw_dir.clone(),
            http: HttpClient::new(&config.http)?,
            max_workers: config.parallelism.max_workers.max(1),
            licenses: config.licenses.clone(),
            time_window: config.time_window,
            options,
            progress: null_progress(),
        })
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn HarvestProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the artifact root.
    #[must_use]
    pub fn with_raw_root(mut self, raw_root: PathBuf) -> Self {
        self.raw_root = raw_root;
        self
    }
}

/// Parses a comma-separated source list.
///
/// # Errors
///
/// Returns [`HarvestError::Config`] naming the first unknown source.
pub fn parse_source_list(list: &str) -> Result<Vec<SourceKind>, HarvestError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            SourceKind::from_str(name).map_err(|_| {
                HarvestError::config(format!(
                    "unknown source '{name}'. Available: {}",
                    SourceKind::ALL
                        .iter()
                        .map(AsRef::as_ref)
                        .collect::<Vec<&str>>()
                        .join(", ")
                ))
            })
        })
        .collect()
}

/// Sources selected by the `--sources` flag or [`SOURCES_ENV`]; `None`
/// selects every source.
///
/// # Errors
///
/// Returns [`HarvestError::Config`] when the list names an unknown source.
pub fn enabled_sources(cli_filter: Option<String>) -> Result<Option<Vec<SourceKind>>, HarvestError> {
    let filter = cli_filter.or_else(|| std::env::var(SOURCES_ENV).ok());
    let Some(filter) = filter.filter(|f| !f.trim().is_empty()) else {
        return Ok(None);
    };
    let kinds = parse_source_list(&filter)?;
    if kinds.is_empty() {
        log::warn!("Source filter {filter:?} selects nothing");
    }
    Ok(Some(kinds))
}
