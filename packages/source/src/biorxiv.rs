//! bioRxiv / medRxiv connector.
//!
//! The `details` endpoint lists every preprint posted in a date window,
//! 100 at a time, with no search. Each configured server is one "query";
//! the keyword filter narrows the listing client-side.

use async_trait::async_trait;
use chrono::NaiveDate;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use serde::Deserialize;
use serde_json::Value;

use crate::filter::KeywordFilter;
use crate::json::{array_at, str_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// Details API base URL.
pub const BIORXIV_API: &str = "https://api.biorxiv.org";

/// Records per `details` page; fixed by the API.
const API_PAGE_SIZE: u32 = 100;

const VALID_SERVERS: &[&str] = &["biorxiv", "medrxiv"];

/// `[sources.connector]` for `type = "biorxiv"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiorxivConfig {
    /// Details API base URL.
    pub base_url: String,
    /// Servers to list (`biorxiv`, `medrxiv`).
    pub servers: Vec<String>,
    /// Host serving the PDFs; `https://www.{server}.org` when unset.
    pub content_base: Option<String>,
}

impl Default for BiorxivConfig {
    fn default() -> Self {
        Self {
            base_url: BIORXIV_API.to_string(),
            servers: vec!["biorxiv".to_string(), "medrxiv".to_string()],
            content_base: None,
        }
    }
}

/// bioRxiv / medRxiv connector.
#[derive(Debug)]
pub struct BiorxivConnector {
    http: HttpClient,
    config: BiorxivConfig,
    servers: Vec<String>,
    from: NaiveDate,
    to: NaiveDate,
    paging: Paging,
    filter: KeywordFilter,
}

impl BiorxivConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when the window has no start date,
    /// ends before it starts, or names an unknown server.
    pub fn new(ctx: &BuildContext<'_>, config: &BiorxivConfig) -> Result<Self, SourceError> {
        let from = ctx
            .from
            .ok_or_else(|| SourceError::config("biorxiv: a `from` date is required"))?;
        let to = ctx.to.unwrap_or_else(|| chrono::Utc::now().date_naive());
        if to < from {
            return Err(SourceError::config(format!(
                "biorxiv: window ends ({to}) before it starts ({from})"
            )));
        }

        let servers: Vec<String> = config
            .servers
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = servers.iter().find(|s| !VALID_SERVERS.contains(&s.as_str())) {
            return Err(SourceError::config(format!(
                "biorxiv: unknown server '{bad}' (expected one of {VALID_SERVERS:?})"
            )));
        }
        if servers.is_empty() {
            return Err(SourceError::config("biorxiv: no servers configured"));
        }

        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            servers,
            from,
            to,
            paging: Paging::new(API_PAGE_SIZE, ctx.def.max_results),
            filter: ctx.def.keyword_filter(),
        })
    }

    fn pdf_url(&self, server: &str, doi: &str, version: Option<&str>) -> String {
        let base = self
            .config
            .content_base
            .clone()
            .unwrap_or_else(|| format!("https://www.{server}.org"));
        let version = version.unwrap_or("1");
        format!("{base}/content/{doi}v{version}.full.pdf")
    }

    fn candidate(&self, server: &str, rec: &Value) -> Option<Candidate> {
        let doi = str_at(rec, "doi")?;
        let title = str_at(rec, "title").unwrap_or_else(|| doi.clone());
        let version = str_at(rec, "version");

        let mut c = Candidate::new(SourceKind::Biorxiv, doi.clone(), title);
        c.query = Some(server.to_string());
        c.payload_url = Some(self.pdf_url(server, &doi, version.as_deref()));
        c.payload = PayloadSpec::pdf();
        apply_licenses(&mut c, str_at(rec, "license").into_iter().collect());

        let authors: Vec<String> = str_at(rec, "authors")
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
        c.set_meta("server", server);
        c.set_meta("doi", doi);
        c.set_meta("abstract", str_at(rec, "abstract"));
        c.set_meta("authors", authors);
        c.set_meta("version", version);
        c.set_meta("date", str_at(rec, "date"));
        c.set_meta("category", str_at(rec, "category"));
        c.set_meta("published", str_at(rec, "published"));
        c.raw = rec.clone();
        Some(c)
    }
}

#[async_trait]
impl Connector for BiorxivConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Biorxiv
    }

    fn queries(&self) -> Vec<String> {
        self.servers.clone()
    }

    async fn fetch_page(&self, server: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let offset = cursor.offset();
        if self.paging.exhausted(offset) {
            return Ok(Page::default());
        }

        let url = format!(
            "{}/details/{server}/{}/{}/{offset}",
            self.config.base_url,
            self.from.format("%Y-%m-%d"),
            self.to.format("%Y-%m-%d"),
        );
        log::info!("[biorxiv] {server} {}→{} cursor={offset}", self.from, self.to);
        let body = self.http.get_json(&url, &[]).await?;

        let records = array_at(&body, "collection");
        let total = u64_at(&body, "messages.0.total");
        let returned = records.len();
        let keep = usize::try_from(self.paging.request_size(offset)).unwrap_or(usize::MAX);

        let mut candidates: Vec<Candidate> = records
            .iter()
            .take(keep)
            .filter_map(|rec| {
                let c = self.candidate(server, rec);
                if c.is_none() {
                    log::debug!("[biorxiv] {server}: record without DOI skipped");
                }
                c
            })
            .collect();
        let filtered_out = self.filter.retain(&mut candidates);

        Ok(Page {
            candidates,
            next: self
                .paging
                .next_offset(offset, returned.min(keep), total)
                .map(|offset| Cursor::Offset { offset }),
            filtered_out,
            total,
        })
    }
}
