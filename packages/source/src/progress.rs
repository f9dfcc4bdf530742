//! Progress reporting for harvests.
//!
//! The orchestrator reports through [`HarvestProgress`] so the rendering
//! backend (`indicatif` bars in the CLI, nothing in tests) stays out of the
//! harvesting code.

use std::sync::Arc;

use openstrength_harvest_models::{HarvestStats, PayloadStatus, SourceKind};

/// Receives harvest events. Implementations must be `Send + Sync` so they
/// can be shared across download workers.
pub trait HarvestProgress: Send + Sync {
    /// A query of `source` started.
    fn query_started(&self, source: SourceKind, query: &str);

    /// A page was fetched with `candidates` items; `total` is the upstream
    /// result count when known.
    fn page_fetched(&self, source: SourceKind, candidates: u64, total: Option<u64>);

    /// One candidate reached a final payload status.
    fn item_finished(&self, source: SourceKind, status: PayloadStatus);

    /// The source finished (successfully or not).
    fn source_finished(&self, source: SourceKind, stats: &HarvestStats);
}

/// A [`HarvestProgress`] that ignores every event.
pub struct NullProgress;

impl HarvestProgress for NullProgress {
    fn query_started(&self, _source: SourceKind, _query: &str) {}
    fn page_fetched(&self, _source: SourceKind, _candidates: u64, _total: Option<u64>) {}
    fn item_finished(&self, _source: SourceKind, _status: PayloadStatus) {}
    fn source_finished(&self, _source: SourceKind, _stats: &HarvestStats) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn HarvestProgress> {
    Arc::new(NullProgress)
}
