#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harvest sources: the [`Connector`] trait, license gating, configuration,
//! and one connector per upstream API.
//!
//! A connector turns a query plus a resumable [`Cursor`] into one [`Page`]
//! of [`Candidate`]s and the cursor for the next page. Connectors never
//! touch the filesystem; persisting candidates and downloading payloads is
//! the orchestrator's job.

pub mod arxiv;
pub mod biorxiv;
pub mod config;
pub mod core_api;
pub mod cursor;
pub mod doaj;
pub mod figshare;
pub mod filter;
pub mod gov;
pub mod json;
pub mod license;
pub mod oai_pmh;
pub mod pmc;
pub mod progress;
pub mod registry;
pub mod repository;
pub mod unpaywall;
pub mod xml;
pub mod zenodo;

use async_trait::async_trait;
use openstrength_fetch::FetchError;
use openstrength_harvest_models::{Candidate, SourceKind};

pub use cursor::{Cursor, Paging};

/// Errors that can occur while paging a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed after retries.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The source is misconfigured (missing key, bad dates...). Aborts the
    /// source.
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong.
        message: String,
    },

    /// An upstream response could not be understood.
    #[error("parse error: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// Shorthand for [`SourceError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for [`SourceError::Parse`].
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole source rather than just the
    /// current query.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// One page of results from a connector.
#[derive(Debug, Default)]
pub struct Page {
    /// Candidates that passed the connector's own filtering.
    pub candidates: Vec<Candidate>,
    /// Cursor for the next page; `None` ends the query.
    pub next: Option<Cursor>,
    /// Records dropped by the keyword filter.
    pub filtered_out: u64,
    /// Total result count reported by the upstream API, if any.
    pub total: Option<u64>,
}

impl Page {
    /// A page that ends the query.
    #[must_use]
    pub const fn last(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            next: None,
            filtered_out: 0,
            total: None,
        }
    }
}

/// An upstream source of open-access items.
///
/// Implementations must terminate: every query must eventually return a
/// page whose `next` is `None` (empty page, short page, max results, or an
/// exhausted continuation token).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Which source this is.
    fn kind(&self) -> SourceKind;

    /// Labels driven one at a time: search terms, OAI endpoints, preprint
    /// servers, or a single crawl label.
    fn queries(&self) -> Vec<String>;

    /// Cursor of the first page of `query`.
    fn initial_cursor(&self, _query: &str) -> Cursor {
        Cursor::Start
    }

    /// Fetches the page at `cursor`.
    ///
    /// # Errors
    ///
    /// * [`SourceError::Fetch`] when the upstream request failed after
    ///   retries; the orchestrator ends the query and keeps what it has.
    /// * [`SourceError::Config`] when the connector cannot run at all.
    async fn fetch_page(&self, query: &str, cursor: &Cursor) -> Result<Page, SourceError>;
}
