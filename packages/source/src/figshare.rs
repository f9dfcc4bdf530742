//! Figshare connector.
//!
//! The search listing carries no files or license, so every hit costs a
//! second request for the article detail.

use async_trait::async_trait;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, SourceKind};
use serde::Deserialize;
use serde_json::Value;

use crate::json::{array_at, str_at, strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::repository::{RepositoryFile, apply_files};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// API v2 base URL.
pub const FIGSHARE_API: &str = "https://api.figshare.com/v2";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// `[sources.connector]` for `type = "figshare"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FigshareConfig {
    /// API base URL.
    pub base_url: String,
}

impl Default for FigshareConfig {
    fn default() -> Self {
        Self {
            base_url: FIGSHARE_API.to_string(),
        }
    }
}

fn licenses(detail: &Value) -> Vec<String> {
    ["license.name", "license.url", "license.value", "license"]
        .iter()
        .filter_map(|path| str_at(detail, path))
        .collect()
}

fn files(detail: &Value) -> Vec<RepositoryFile> {
    array_at(detail, "files")
        .iter()
        .filter_map(|f| {
            Some(RepositoryFile {
                url: str_at(f, "download_url")?,
                name: str_at(f, "name").unwrap_or_else(|| "file".to_string()),
                size: u64_at(f, "size"),
            })
        })
        .collect()
}

/// Figshare connector.
#[derive(Debug)]
pub struct FigshareConnector {
    http: HttpClient,
    config: FigshareConfig,
    queries: Vec<String>,
    paging: Paging,
}

impl FigshareConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no queries are configured.
    pub fn new(ctx: &BuildContext<'_>, config: &FigshareConfig) -> Result<Self, SourceError> {
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
        })
    }

    fn candidate(query: &str, hit: &Value, detail: &Value) -> Option<Candidate> {
        let id = str_at(hit, "id").or_else(|| str_at(detail, "id"))?;
        let title = str_at(detail, "title")
            .or_else(|| str_at(hit, "title"))
            .unwrap_or_else(|| id.clone());

        let mut c = Candidate::new(SourceKind::Figshare, id, title);
        c.query = Some(query.to_string());
        apply_files(&mut c, &files(detail));
        apply_licenses(&mut c, licenses(detail));

        c.set_meta("doi", str_at(detail, "doi").or_else(|| str_at(hit, "doi")));
        c.set_meta("description", str_at(detail, "description"));
        c.set_meta("published_date", str_at(detail, "published_date"));
        c.set_meta("defined_type", str_at(detail, "defined_type_name"));
        c.set_meta("keywords", strings_at(detail, "tags"));
        c.set_meta(
            "categories",
            array_at(detail, "categories")
                .iter()
                .filter_map(|cat| str_at(cat, "title"))
                .collect::<Vec<_>>(),
        );
        c.set_meta(
            "authors",
            array_at(detail, "authors")
                .iter()
                .filter_map(|a| str_at(a, "full_name"))
                .collect::<Vec<_>>(),
        );
        c.set_meta(
            "landing_url",
            str_at(detail, "figshare_url").or_else(|| str_at(hit, "url_public_html")),
        );
        c.raw = detail.clone();
        Some(c)
    }
}

#[async_trait]
impl Connector for FigshareConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Figshare
    }

    fn queries(&self) -> Vec<String> {
        self.queries.clone()
    }

    async fn fetch_page(&self, query: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let page = cursor.page();
        let offset = u64::from(page.saturating_sub(1)) * u64::from(self.paging.page_size);
        if self.paging.exhausted(offset) {
            return Ok(Page::default());
        }

        log::info!("[figshare] query={query:?} page={page}");
        let body = self
            .http
            .get_json(
                &format!("{}/articles", self.config.base_url),
                &[
                    ("search_for", query.to_string()),
                    ("page", page.to_string()),
                    ("page_size", self.paging.page_size.to_string()),
                ],
            )
            .await?;
        let hits = body.as_array().map_or(&[][..], Vec::as_slice);
        let keep = usize::try_from(self.paging.request_size(offset)).unwrap_or(usize::MAX);

        let mut candidates = Vec::new();
        for hit in hits.iter().take(keep) {
            let Some(id) = str_at(hit, "id") else {
                continue;
            };
            let url = format!("{}/articles/{id}", self.config.base_url);
            // Skipped items are picked up again on the next run.
            let detail = match self.http.get_json(&url, &[]).await {
                Ok(detail) => detail,
                Err(e) => {
                    log::warn!("[figshare] detail fetch failed id={id}: {e}");
                    continue;
                }
            };
            candidates.extend(Self::candidate(query, hit, &detail));
        }

        Ok(Page {
            candidates,
            next: self
                .paging
                .next_page(page, hits.len(), None)
                .map(|page| Cursor::Page { page }),
            filtered_out: 0,
            total: None,
        })
    }
}
