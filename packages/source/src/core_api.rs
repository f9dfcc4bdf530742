//! CORE (core.ac.uk) v3 search connector. Requires an API key.

use async_trait::async_trait;
use openstrength_fetch::{HttpClient, decode_json};
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use serde::Deserialize;
use serde_json::Value;

use crate::json::{array_at, str_at, strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::{BuildContext, secret};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// v3 works search endpoint.
pub const CORE_API: &str = "https://api.core.ac.uk/v3/search/works";

const DEFAULT_PAGE_SIZE: u32 = 50;

/// `[sources.connector]` for `type = "core"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Search endpoint.
    pub base_url: String,
    /// API key; falls back to `CORE_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: CORE_API.to_string(),
            api_key: None,
        }
    }
}

/// CORE connector.
#[derive(Debug)]
pub struct CoreConnector {
    http: HttpClient,
    base_url: String,
    api_key: String,
    queries: Vec<String>,
    paging: Paging,
}

impl CoreConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] without an API key or queries.
    pub fn new(ctx: &BuildContext<'_>, config: &CoreConfig) -> Result<Self, SourceError> {
        let api_key = secret(config.api_key.as_ref(), "CORE_API_KEY")
            .ok_or_else(|| SourceError::config("core: an API key is required (api_key or CORE_API_KEY)"))?;
        Ok(Self {
            http: ctx.http.clone(),
            base_url: config.base_url.clone(),
            api_key,
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
        })
    }

    fn candidate(query: &str, work: &Value) -> Option<Candidate> {
        let id = str_at(work, "id")?;
        let title = str_at(work, "title").unwrap_or_else(|| id.clone());
        let mut c = Candidate::new(SourceKind::Core, id, title);
        c.query = Some(query.to_string());
        c.payload = PayloadSpec::pdf().following_landing();

        let mut urls: Vec<String> = str_at(work, "downloadUrl").into_iter().collect();
        urls.extend(
            array_at(work, "links")
                .iter()
                .filter(|l| str_at(l, "type").as_deref() == Some("download"))
                .filter_map(|l| str_at(l, "url")),
        );
        urls.extend(strings_at(work, "sourceFulltextUrls"));
        urls.dedup();
        let mut urls = urls.into_iter();
        c.payload_url = urls.next();
        c.fallback_urls = urls.filter(|u| Some(u) != c.payload_url.as_ref()).collect();

        apply_licenses(&mut c, str_at(work, "license").into_iter().collect());

        c.set_meta("doi", str_at(work, "doi"));
        c.set_meta("abstract", str_at(work, "abstract"));
        c.set_meta("year", u64_at(work, "yearPublished"));
        c.set_meta("publisher", str_at(work, "publisher"));
        c.set_meta(
            "authors",
            array_at(work, "authors")
                .iter()
                .filter_map(|a| str_at(a, "name"))
                .collect::<Vec<_>>(),
        );
        c.raw = work.clone();
        Some(c)
    }
}

#[async_trait]
impl Connector for CoreConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Core
    }

    fn queries(&self) -> Vec<String> {
        self.queries.clone()
    }

    async fn fetch_page(&self, query: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let offset = cursor.offset();
        if self.paging.exhausted(offset) {
            return Ok(Page::default());
        }
        let limit = self.paging.request_size(offset);
        let params = [
            ("q", query.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];

        log::info!("[core] query={query:?} offset={offset} limit={limit}");
        let fetched = self
            .http
            .execute(&self.base_url, |client| {
                client
                    .get(&self.base_url)
                    .query(&params)
                    .bearer_auth(&self.api_key)
            })
            .await?;
        let body = decode_json(&fetched)?;

        let results = array_at(&body, "results");
        let total = u64_at(&body, "totalHits");
        Ok(Page {
            candidates: results
                .iter()
                .filter_map(|w| Self::candidate(query, w))
                .collect(),
            next: self
                .paging
                .next_offset(offset, results.len(), total)
                .map(|offset| Cursor::Offset { offset }),
            filtered_out: 0,
            total,
        })
    }
}
