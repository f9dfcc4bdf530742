//! Runs every selected source in pipeline order.
//!
//! Each source runs in its own task, so an error or a panic in one source
//! is recorded in its [`SourceReport`] and the pipeline moves on.

use std::time::{Duration, Instant};

use openstrength_harvest_models::{HarvestStats, RunSummary, SourceKind, SourceReport, SourceStatus};
use openstrength_source::config::HarvestConfig;

use crate::{HarvestContext, HarvestError, SourceFailure, harvest_source};

fn skipped(source: SourceKind, status: SourceStatus) -> SourceReport {
    SourceReport {
        source,
        status,
        stats: HarvestStats::default(),
        error: None,
        elapsed_secs: 0.0,
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(e) => e.to_string(),
    }
}

/// Harvests one source in its own task.
async fn run_isolated(
    ctx: &HarvestContext,
    config: &HarvestConfig,
    kind: SourceKind,
) -> Result<HarvestStats, SourceFailure> {
    let Some(def) = config.source(kind).cloned() else {
        return Err(HarvestError::config(format!("{kind} is not configured")).into());
    };
    let ctx = ctx.clone();
    tokio::spawn(async move { harvest_source(&ctx, &def).await })
        .await
        .map_err(|e| {
            SourceFailure::from(HarvestError::Panicked {
                kind,
                message: panic_message(e),
            })
        })?
}

/// Runs the sources of `config` in pipeline order, restricted to
/// `selected` when given.
///
/// Sources absent from the configuration are reported as
/// [`SourceStatus::SkippedMissing`], disabled ones as
/// [`SourceStatus::SkippedDisabled`]. A failing source never stops the
/// pipeline.
pub async fn run_pipeline(
    config: &HarvestConfig,
    ctx: &HarvestContext,
    selected: Option<&[SourceKind]>,
) -> RunSummary {
    let pause = Duration::from_millis(config.parallelism.pause_between_sources_ms);
    let mut summary = RunSummary::default();
    let mut first = true;

    for kind in SourceKind::ALL {
        if selected.is_some_and(|s| !s.contains(&kind)) {
            continue;
        }
        let Some(def) = config.source(kind) else {
            log::info!("[{kind}] Not configured, skipping");
            summary.reports.push(skipped(kind, SourceStatus::SkippedMissing));
            continue;
        };
        if !def.enabled {
            log::info!("[{kind}] Disabled, skipping");
            summary.reports.push(skipped(kind, SourceStatus::SkippedDisabled));
            continue;
        }

        if !first && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        first = false;

        let started = Instant::now();
        let result = run_isolated(ctx, config, kind).await;
        let elapsed_secs = started.elapsed().as_secs_f64();

        summary.reports.push(match result {
            Ok(stats) => SourceReport {
                source: kind,
                status: SourceStatus::Ok,
                stats,
                error: None,
                elapsed_secs,
            },
            Err(SourceFailure { stats, error }) => {
                log::error!("[{kind}] Failed: {error}");
                SourceReport {
                    source: kind,
                    status: SourceStatus::Error,
                    stats,
                    error: Some(error.to_string()),
                    elapsed_secs,
                }
            }
        });
    }

    log::info!(
        "Pipeline finished: {} ok, {} failed, {} skipped; {}",
        summary.ok(),
        summary.errors(),
        summary.skipped(),
        summary.totals()
    );
    summary
}
