#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the harvester.
//!
//! Provides `indicatif`-backed progress bars behind the [`HarvestProgress`]
//! trait, plus [`init_logger`] which sets up `indicatif-log-bridge` so that
//! `log::info!` and friends are suspended while progress bars redraw.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use openstrength_harvest_models::{HarvestStats, PayloadStatus, SourceKind};
use openstrength_source::progress::HarvestProgress;

pub use indicatif::MultiProgress;

/// One `indicatif` bar per source, created on its first query.
///
/// A bar starts as a spinner and switches to a full bar once a page reports
/// the upstream result count.
pub struct IndicatifProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<SourceKind, ProgressBar>>,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates a progress sink whose bars are added to `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress) -> Self {
        Self {
            multi: multi.clone(),
            bars: Mutex::new(HashMap::new()),
            spinner_style: ProgressStyle::with_template("{spinner:.cyan} {msg} {pos} item(s)")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            bar_style: ProgressStyle::with_template(
                "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<SourceKind, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bar(&self, source: SourceKind) -> ProgressBar {
        self.bars()
            .entry(source)
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_style(self.spinner_style.clone());
                bar
            })
            .clone()
    }
}

impl HarvestProgress for IndicatifProgress {
    fn query_started(&self, source: SourceKind, query: &str) {
        let bar = self.bar(source);
        bar.set_style(self.spinner_style.clone());
        bar.set_length(0);
        bar.set_position(0);
        bar.set_message(format!("{source}: {query}"));
    }

    fn page_fetched(&self, source: SourceKind, _candidates: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            let bar = self.bar(source);
            if bar.length() != Some(total) {
                bar.set_length(total);
                bar.set_style(self.bar_style.clone());
            }
        }
    }

    fn item_finished(&self, source: SourceKind, _status: PayloadStatus) {
        self.bar(source).inc(1);
    }

    fn source_finished(&self, source: SourceKind, stats: &HarvestStats) {
        if let Some(bar) = self.bars().remove(&source) {
            bar.finish_with_message(format!("{source}: {stats}"));
        }
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    multi
}
