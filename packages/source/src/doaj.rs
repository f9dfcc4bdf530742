//! DOAJ article search connector.

use async_trait::async_trait;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::json::{array_at, resolve_path, str_at, strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// Article search endpoint; the query is the last path segment.
pub const DOAJ_API: &str = "https://doaj.org/api/search/articles";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// `[sources.connector]` for `type = "doaj"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoajConfig {
    /// Search endpoint.
    pub base_url: String,
}

impl Default for DoajConfig {
    fn default() -> Self {
        Self {
            base_url: DOAJ_API.to_string(),
        }
    }
}

/// `(pdf, landing)` links of a `bibjson` record.
fn links(bibjson: &Value) -> (Option<String>, Option<String>) {
    let mut pdf = None;
    let mut landing = None;
    for link in array_at(bibjson, "link") {
        let Some(url) = str_at(link, "url") else {
            continue;
        };
        let content_type = str_at(link, "content_type").unwrap_or_default().to_lowercase();
        let kind = str_at(link, "type").unwrap_or_default().to_lowercase();
        let is_pdf = content_type.contains("pdf")
            || kind == "fulltext_pdf"
            || Url::parse(&url).is_ok_and(|u| u.path().to_lowercase().ends_with(".pdf"));
        if is_pdf {
            pdf.get_or_insert(url);
        } else if landing.is_none() {
            landing = Some(url);
        }
    }
    (pdf, landing)
}

fn doi(bibjson: &Value) -> Option<String> {
    array_at(bibjson, "identifier")
        .iter()
        .find(|id| str_at(id, "type").is_some_and(|t| t.eq_ignore_ascii_case("doi")))
        .and_then(|id| str_at(id, "id"))
}

/// DOAJ connector.
#[derive(Debug)]
pub struct DoajConnector {
    http: HttpClient,
    config: DoajConfig,
    queries: Vec<String>,
    paging: Paging,
}

impl DoajConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no queries are configured or
    /// the base URL is invalid.
    pub fn new(ctx: &BuildContext<'_>, config: &DoajConfig) -> Result<Self, SourceError> {
        Url::parse(&config.base_url)
            .map_err(|e| SourceError::config(format!("doaj: invalid base_url: {e}")))?;
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
        })
    }

    fn search_url(&self, query: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| SourceError::config(format!("doaj: invalid base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| SourceError::config("doaj: base_url cannot take a path"))?
            .pop_if_empty()
            .push(query);
        Ok(url.to_string())
    }

    fn candidate(query: &str, rec: &Value) -> Option<Candidate> {
        let bibjson = resolve_path(rec, "bibjson").unwrap_or(rec);
        let doi = doi(bibjson);
        let id = str_at(rec, "id").or_else(|| doi.clone())?;
        let title = str_at(bibjson, "title").unwrap_or_else(|| id.clone());

        let mut c = Candidate::new(SourceKind::Doaj, id, title);
        c.query = Some(query.to_string());

        let (pdf, landing) = links(bibjson);
        c.payload = PayloadSpec::pdf().following_landing();
        c.payload_url = pdf.clone().or_else(|| landing.clone());
        if pdf.is_some()
            && let Some(landing) = landing
        {
            c.fallback_urls.push(landing);
        }

        let licenses = array_at(bibjson, "license")
            .iter()
            .flat_map(|l| [str_at(l, "type"), str_at(l, "url")])
            .flatten()
            .collect();
        apply_licenses(&mut c, licenses);

        c.set_meta("doi", doi);
        c.set_meta("abstract", str_at(bibjson, "abstract"));
        c.set_meta("keywords", strings_at(bibjson, "keywords"));
        c.set_meta("year", str_at(bibjson, "year"));
        c.set_meta("journal", str_at(bibjson, "journal.title"));
        c.set_meta("publisher", str_at(bibjson, "journal.publisher"));
        c.set_meta(
            "authors",
            array_at(bibjson, "author")
                .iter()
                .filter_map(|a| str_at(a, "name"))
                .collect::<Vec<_>>(),
        );
        c.raw = rec.clone();
        Some(c)
    }
}

#[async_trait]
impl Connector for DoajConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Doaj
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

        log::info!("[doaj] query={query:?} page={page}");
        let body = self
            .http
            .get_json(
                &self.search_url(query)?,
                &[
                    ("page", page.to_string()),
                    ("pageSize", self.paging.page_size.to_string()),
                ],
            )
            .await?;

        let results = array_at(&body, "results");
        let total = u64_at(&body, "total");
        let keep = usize::try_from(self.paging.request_size(offset)).unwrap_or(usize::MAX);
        let candidates = results
            .iter()
            .take(keep)
            .filter_map(|rec| Self::candidate(query, rec))
            .collect();

        Ok(Page {
            candidates,
            next: self
                .paging
                .next_page(page, results.len(), total)
                .map(|page| Cursor::Page { page }),
            filtered_out: 0,
            total,
        })
    }
}
