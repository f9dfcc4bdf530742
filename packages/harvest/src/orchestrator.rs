//! Drives one connector through all of its queries.
//!
//! Each query is a small state machine: it pages while the connector hands
//! back a cursor, ends when the cursor runs out or the per-query limit is
//! hit, and is aborted by a non-fatal connector error. Candidates of a page
//! are checked for idempotency and license, then downloaded by a bounded
//! pool of workers before the next page is requested.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt as _;
use openstrength_fetch::{HttpClient, RateLimiter};
use openstrength_harvest_models::{HarvestStats, PayloadStatus, SourceKind};
use openstrength_source::config::SourceDefinition;
use openstrength_source::license::LicenseGate;
use openstrength_source::registry::{BuildContext, build_connector};
use openstrength_source::{Connector, Cursor, Page};
use openstrength_store::ArtifactDir;

use crate::worker::{self, Job};
use crate::{HarvestContext, HarvestError, SourceFailure};

/// Where a query is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// The next page to request.
    Paging(Cursor),
    /// All pages consumed, or the limit was reached.
    Done,
    /// A connector error ended the query early.
    Aborted,
}

/// Harvests `def` with a connector built from it.
///
/// # Errors
///
/// Returns a [`SourceFailure`] wrapping [`HarvestError::Source`] when the
/// connector cannot be built or fails fatally. Failures of a single query
/// or a single item are logged and counted, and do not fail the source.
pub async fn harvest_source(
    ctx: &HarvestContext,
    def: &SourceDefinition,
) -> Result<HarvestStats, SourceFailure> {
    let build = BuildContext::new(def, &ctx.http, ctx.time_window);
    let connector = build_connector(&build).map_err(HarvestError::from)?;
    let downloads = ctx
        .http
        .with_limiter(Arc::new(RateLimiter::new(def.rate_per_sec)));
    harvest_with(ctx, def, connector.as_ref(), &downloads).await
}

/// Harvests with an already built connector. `http` is used for payload
/// downloads; its limiter is shared by every download worker of the
/// source.
///
/// # Errors
///
/// See [`harvest_source`].
pub async fn harvest_with(
    ctx: &HarvestContext,
    def: &SourceDefinition,
    connector: &dyn Connector,
    http: &HttpClient,
) -> Result<HarvestStats, SourceFailure> {
    let kind = connector.kind();
    let mut run = SourceRun {
        ctx,
        http,
        kind,
        gate: def.license_gate(&ctx.licenses),
        download: def.download,
        keys: HashSet::new(),
        stats: HarvestStats::default(),
    };

    log::info!("[{kind}] Starting harvest");
    let result = run.all_queries(connector).await;
    ctx.progress.source_finished(kind, &run.stats);

    match result {
        Ok(()) => {
            log::info!("[{kind}] Finished: {}", run.stats);
            Ok(run.stats)
        }
        Err(error) => {
            log::error!("[{kind}] Aborted after {}: {error}", run.stats);
            Err(SourceFailure {
                stats: run.stats,
                error,
            })
        }
    }
}

struct SourceRun<'a> {
    ctx: &'a HarvestContext,
    http: &'a HttpClient,
    kind: SourceKind,
    gate: LicenseGate,
    download: bool,
    /// Storage keys already handled in this run.
    keys: HashSet<String>,
    stats: HarvestStats,
}

impl SourceRun<'_> {
    async fn all_queries(&mut self, connector: &dyn Connector) -> Result<(), HarvestError> {
        for query in connector.queries() {
            let state = self.query(connector, &query).await?;
            if state == QueryState::Aborted {
                log::warn!("[{}] Query {query:?} ended early", self.kind);
            }
        }
        Ok(())
    }

    async fn query(&mut self, connector: &dyn Connector, query: &str) -> Result<QueryState, HarvestError> {
        let kind = self.kind;
        self.ctx.progress.query_started(kind, query);
        log::info!("[{kind}] Query {query:?}");

        let mut seen = 0_u64;
        let mut state = QueryState::Paging(connector.initial_cursor(query));
        while let QueryState::Paging(cursor) = &state {
            state = match connector.fetch_page(query, cursor).await {
                Ok(page) => self.page(page, &mut seen).await,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    log::warn!("[{kind}] {query:?}: {e}");
                    QueryState::Aborted
                }
            };
        }
        Ok(state)
    }

    async fn page(&mut self, page: Page, seen: &mut u64) -> QueryState {
        let kind = self.kind;
        let limit = self.ctx.options.limit;
        self.stats.pages += 1;
        self.stats.filtered_out += page.filtered_out;
        self.ctx
            .progress
            .page_fetched(kind, page.candidates.len() as u64, page.total);
        log::debug!(
            "[{kind}] Page {} with {} candidate(s), {} filtered",
            self.stats.pages,
            page.candidates.len(),
            page.filtered_out
        );

        let mut jobs = Vec::new();
        for candidate in page.candidates {
            if limit.is_some_and(|l| *seen >= l) {
                break;
            }
            *seen += 1;
            self.stats.seen += 1;

            if !self.keys.insert(candidate.storage_key().to_string()) {
                log::debug!("[{kind}] {}: duplicate in this run", candidate.external_id);
                self.stats.skipped_existing += 1;
                continue;
            }

            let dir = ArtifactDir::for_candidate(&self.ctx.raw_root, &candidate);
            if !self.ctx.options.force && dir.is_complete() {
                log::debug!("[{kind}] {}: already harvested", candidate.external_id);
                self.stats.skipped_existing += 1;
                continue;
            }

            jobs.push(Job {
                decision: self.gate.decide(&candidate),
                candidate,
                dir,
                download: self.download,
            });
        }

        let http = self.http;
        let results: Vec<_> = futures::stream::iter(jobs)
            .map(|job| async move {
                let id = job.candidate.external_id.clone();
                let result = worker::process(http, job).await;
                match &result {
                    Ok(status) => log::info!("[{kind}] id={id} outcome={status}"),
                    Err(e) => log::error!("[{kind}] id={id} outcome=write_failed: {e}"),
                }
                result
            })
            .buffer_unordered(self.ctx.max_workers)
            .collect()
            .await;

        for result in results {
            // Nothing is marked complete for a failed write, so the next
            // run picks the item up again.
            let Ok(status) = result else {
                self.stats.failed += 1;
                self.ctx.progress.item_finished(kind, PayloadStatus::FetchFailed);
                continue;
            };
            self.stats.saved_metadata += 1;
            self.stats.record(status);
            self.ctx.progress.item_finished(kind, status);
        }

        log::info!(
            "[{kind}] seen={} saved={} license_skipped={} failed={}",
            self.stats.seen,
            self.stats.saved_metadata,
            self.stats.license_skipped,
            self.stats.failed
        );

        if limit.is_some_and(|l| *seen >= l) {
            log::info!("[{kind}] Reached limit of {seen} candidate(s)");
            return QueryState::Done;
        }
        page.next.map_or(QueryState::Done, QueryState::Paging)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mockito::{Server, ServerGuard};
    use openstrength_fetch::HttpConfig;
    use openstrength_harvest_models::Candidate;
    use openstrength_store::inventory;
    use openstrength_source::SourceError;
    use openstrength_source::config::{LicensesConfig, TimeWindow, parse_config};
    use openstrength_source::license::apply_licenses;
    use openstrength_source::progress::null_progress;

    use super::*;
    use crate::HarvestOptions;

    type Script = Mutex<VecDeque<Result<Page, SourceError>>>;

    /// Replays canned pages in order; an empty script ends every query.
    struct Scripted {
        queries: Vec<String>,
        pages: Script,
    }

    impl Scripted {
        fn new(queries: &[&str], pages: Vec<Result<Page, SourceError>>) -> Self {
            Self {
                queries: queries.iter().map(ToString::to_string).collect(),
                pages: Mutex::new(pages.into()),
            }
        }

        fn remaining(&self) -> usize {
            self.pages.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        fn kind(&self) -> SourceKind {
            SourceKind::Doaj
        }

        fn queries(&self) -> Vec<String> {
            self.queries.clone()
        }

        async fn fetch_page(&self, _query: &str, _cursor: &Cursor) -> Result<Page, SourceError> {
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn page(candidates: Vec<Candidate>, more: bool) -> Result<Page, SourceError> {
        Ok(Page {
            candidates,
            next: more.then_some(Cursor::Page { page: 2 }),
            filtered_out: 0,
            total: None,
        })
    }

    fn item(base_url: Option<&str>, id: &str, license: &str) -> Candidate {
        let mut c = Candidate::new(SourceKind::Doaj, id, format!("Paper {id}"));
        apply_licenses(&mut c, vec![license.to_string()]);
        if let Some(base_url) = base_url {
            c.payload_url = Some(format!("{base_url}/{id}.pdf"));
        }
        c
    }

    fn definition() -> SourceDefinition {
        parse_config(
            r#"
            [[sources]]
            license_whitelist = ["cc-by"]
            [sources.connector]
            type = "doaj"
            "#,
        )
        .unwrap()
        .sources
        .remove(0)
    }

    fn context(root: &Path, options: HarvestOptions) -> HarvestContext {
        HarvestContext {
            raw_root: root.to_path_buf(),
            http: HttpClient::new(&HttpConfig {
                max_attempts: 1,
                ..HttpConfig::default()
            })
            .unwrap(),
            max_workers: 4,
            licenses: LicensesConfig::default(),
            time_window: TimeWindow::default(),
            options,
            progress: null_progress(),
        }
    }

    async fn run(
        ctx: &HarvestContext,
        connector: &Scripted,
    ) -> Result<HarvestStats, SourceFailure> {
        harvest_with(ctx, &definition(), connector, &ctx.http).await
    }

    async fn pdf(server: &mut ServerGuard, path: &str) -> mockito::Mock {
        server
            .mock("GET", path)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 test")
            .expect(1)
            .create_async()
            .await
    }

    fn scenario(server: &ServerGuard) -> Scripted {
        let base = server.url();
        let server = Some(base.as_str());
        Scripted::new(
            &["resistance training"],
            vec![
                page(
                    vec![
                        item(server, "A", "CC-BY-4.0"),
                        item(server, "B", "CC BY-NC-ND 4.0"),
                    ],
                    true,
                ),
                page(
                    vec![
                        item(server, "C", "https://creativecommons.org/licenses/by/4.0/"),
                        item(server, "A", "CC-BY-4.0"),
                    ],
                    false,
                ),
            ],
        )
    }

    #[tokio::test]
    async fn harvests_pages_with_license_gate_and_dedup() {
        let mut server = Server::new_async().await;
        let a = pdf(&mut server, "/A.pdf").await;
        let c = pdf(&mut server, "/C.pdf").await;
        let b = server.mock("GET", "/B.pdf").expect(0).create_async().await;

        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        let stats = run(&ctx, &scenario(&server)).await.unwrap();

        assert_eq!(stats.pages, 2);
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.skipped_existing, 1);
        assert_eq!(stats.saved_metadata, 3);
        assert_eq!(stats.saved_payload, 2);
        assert_eq!(stats.license_skipped, 1);
        assert_eq!(stats.failed, 0);
        a.assert_async().await;
        b.assert_async().await;
        c.assert_async().await;

        let denied = ArtifactDir::for_candidate(tmp.path(), &item(None, "B", ""));
        let record = denied.read_record().unwrap().unwrap();
        assert_eq!(record.payload.status, PayloadStatus::LicenseDenied);
        assert!(!denied.file_path("paper.pdf").exists());

        let inv = inventory(tmp.path()).unwrap();
        assert_eq!(inv.total(), 3);
        assert_eq!(inv.incomplete, 0);
        assert_eq!(inv.by_source["doaj"][&PayloadStatus::Downloaded], 2);
        assert_eq!(inv.by_source["doaj"][&PayloadStatus::LicenseDenied], 1);
        for id in ["A", "C"] {
            let dir = ArtifactDir::for_candidate(tmp.path(), &item(None, id, ""));
            assert!(dir.file_path("paper.pdf").is_file(), "{id} payload missing");
        }
    }

    #[tokio::test]
    async fn ids_that_sanitize_alike_are_stored_apart() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        let connector = Scripted::new(
            &["q"],
            vec![page(vec![item(None, "a/b", "cc-by"), item(None, "a_b", "cc-by")], false)],
        );

        let stats = run(&ctx, &connector).await.unwrap();
        assert_eq!(stats.saved_metadata, 2);

        let inv = inventory(tmp.path()).unwrap();
        assert_eq!(inv.total(), 2);
        for id in ["a/b", "a_b"] {
            let record = ArtifactDir::for_candidate(tmp.path(), &item(None, id, ""))
                .read_record()
                .unwrap()
                .unwrap();
            assert_eq!(record.candidate.external_id, id);
        }
    }

    #[tokio::test]
    async fn write_failure_fails_only_that_item() {
        let tmp = tempfile::tempdir().unwrap();
        let blocked = ArtifactDir::for_candidate(tmp.path(), &item(None, "A", ""));
        std::fs::create_dir_all(blocked.path().parent().unwrap()).unwrap();
        std::fs::write(blocked.path(), b"not a directory").unwrap();

        let ctx = context(tmp.path(), HarvestOptions::default());
        let connector = Scripted::new(
            &["q"],
            vec![
                page(vec![item(None, "A", "cc-by"), item(None, "B", "cc-by")], true),
                page(vec![item(None, "C", "cc-by")], false),
            ],
        );

        let stats = run(&ctx, &connector).await.unwrap();
        assert_eq!(stats.seen, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.saved_metadata, 2);
        assert!(!blocked.is_complete());
        for id in ["B", "C"] {
            assert!(ArtifactDir::for_candidate(tmp.path(), &item(None, id, "")).is_complete());
        }
    }

    #[tokio::test]
    async fn second_run_skips_completed_items() {
        let mut server = Server::new_async().await;
        let _a = pdf(&mut server, "/A.pdf").await;
        let _c = pdf(&mut server, "/C.pdf").await;

        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        run(&ctx, &scenario(&server)).await.unwrap();

        let again = run(&ctx, &scenario(&server)).await.unwrap();
        assert_eq!(again.seen, 4);
        assert_eq!(again.skipped_existing, 4);
        assert_eq!(again.saved_metadata, 0);
    }

    #[tokio::test]
    async fn force_reharvests_completed_items() {
        let mut server = Server::new_async().await;
        let a = server
            .mock("GET", "/A.pdf")
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 test")
            .expect(2)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let base = server.url();
        let only_a = || Scripted::new(&["q"], vec![page(vec![item(Some(&base), "A", "cc-by")], false)]);
        run(&context(tmp.path(), HarvestOptions::default()), &only_a())
            .await
            .unwrap();

        let forced = context(
            tmp.path(),
            HarvestOptions {
                force: true,
                limit: None,
            },
        );
        let stats = run(&forced, &only_a()).await.unwrap();
        assert_eq!(stats.saved_payload, 1);
        assert_eq!(stats.skipped_existing, 0);
        a.assert_async().await;
    }

    #[tokio::test]
    async fn failed_downloads_are_retried_next_run() {
        let mut server = Server::new_async().await;
        let down = server
            .mock("GET", "/A.pdf")
            .with_status(503)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        let base = server.url();
        let only_a = || Scripted::new(&["q"], vec![page(vec![item(Some(&base), "A", "cc-by")], false)]);

        let first = run(&ctx, &only_a()).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.saved_metadata, 1);

        down.remove_async().await;
        let up = pdf(&mut server, "/A.pdf").await;

        let second = run(&ctx, &only_a()).await.unwrap();
        assert_eq!(second.skipped_existing, 0);
        assert_eq!(second.saved_payload, 1);
        up.assert_async().await;
    }

    #[tokio::test]
    async fn fatal_error_aborts_the_source_after_saving_earlier_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        let connector = Scripted::new(
            &["q1", "q2"],
            vec![
                page(vec![item(None, "A", "cc-by")], true),
                Err(SourceError::config("missing API key")),
                page(vec![item(None, "Z", "cc-by")], false),
            ],
        );

        let err = run(&ctx, &connector).await.unwrap_err();
        assert!(matches!(err.error, HarvestError::Source(SourceError::Config { .. })));
        assert_eq!(err.stats.saved_metadata, 1);
        assert_eq!(err.stats.pages, 1);
        assert!(ArtifactDir::for_candidate(tmp.path(), &item(None, "A", "")).is_complete());
        assert_eq!(connector.remaining(), 1);
    }

    #[tokio::test]
    async fn query_errors_keep_partial_results_and_continue() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());
        let connector = Scripted::new(
            &["q1", "q2"],
            vec![
                page(vec![item(None, "A", "cc-by")], true),
                Err(SourceError::parse("truncated XML")),
                page(vec![item(None, "B", "cc-by")], false),
            ],
        );

        let stats = run(&ctx, &connector).await.unwrap();
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.saved_metadata, 2);
        let record = ArtifactDir::for_candidate(tmp.path(), &item(None, "B", ""))
            .read_record()
            .unwrap()
            .unwrap();
        assert_eq!(record.payload.status, PayloadStatus::NoPayload);
    }

    #[tokio::test]
    async fn limit_caps_each_query() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(
            tmp.path(),
            HarvestOptions {
                force: false,
                limit: Some(2),
            },
        );
        let connector = Scripted::new(
            &["q"],
            vec![
                page(
                    vec![
                        item(None, "A", "cc-by"),
                        item(None, "B", "cc-by"),
                        item(None, "C", "cc-by"),
                    ],
                    true,
                ),
                page(vec![item(None, "D", "cc-by")], false),
            ],
        );

        let stats = run(&ctx, &connector).await.unwrap();
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.saved_metadata, 2);
        assert_eq!(connector.remaining(), 1);
    }

    #[tokio::test]
    async fn build_errors_surface_as_source_errors() {
        let config = parse_config(
            r#"
            [[sources]]
            [sources.connector]
            type = "biorxiv"
            "#,
        )
        .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), HarvestOptions::default());

        let err = harvest_source(&ctx, &config.sources[0]).await.unwrap_err();
        assert!(matches!(err.error, HarvestError::Source(SourceError::Config { .. })));
        assert_eq!(err.stats, HarvestStats::default());
    }
}
