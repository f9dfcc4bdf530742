//! Crossref search resolved through Unpaywall.
//!
//! Crossref has the search but no open-access information; Unpaywall has
//! the open-access locations but no search. Each page is one Crossref
//! cursor page of DOIs, then one Unpaywall lookup per DOI.

use async_trait::async_trait;
use chrono::NaiveDate;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::json::{array_at, resolve_path, str_at, strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::{BuildContext, secret};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// Crossref works endpoint.
pub const CROSSREF_WORKS: &str = "https://api.crossref.org/works";

/// Unpaywall v2 endpoint.
pub const UNPAYWALL_API: &str = "https://api.unpaywall.org/v2";

/// Placeholder address Unpaywall rejects.
const PLACEHOLDER_EMAIL: &str = "you@example.com";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Fields requested from Crossref.
const CROSSREF_SELECT: &str = "DOI,title,license,issued,type,container-title,author";

/// `[sources.connector]` for `type = "unpaywall"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnpaywallConfig {
    /// Crossref works endpoint.
    pub crossref_url: String,
    /// Unpaywall endpoint.
    pub unpaywall_url: String,
    /// Contact email for both APIs; falls back to `UNPAYWALL_EMAIL`.
    pub email: Option<String>,
    /// Crossref `type` filter.
    pub work_type: Option<String>,
}

impl Default for UnpaywallConfig {
    fn default() -> Self {
        Self {
            crossref_url: CROSSREF_WORKS.to_string(),
            unpaywall_url: UNPAYWALL_API.to_string(),
            email: None,
            work_type: Some("journal-article".to_string()),
        }
    }
}

/// Best PDF, fallbacks, and licenses out of an Unpaywall record.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OaResolution {
    /// Preferred URL: a PDF when one is known, else a landing page.
    pub url: Option<String>,
    /// Other PDF locations.
    pub fallbacks: Vec<String>,
    /// License of the chosen location first.
    pub licenses: Vec<String>,
}

/// Picks the `best_oa_location` PDF, else the first location with a PDF,
/// else the best landing page.
#[must_use]
pub fn resolve_oa(record: &Value) -> OaResolution {
    let best = resolve_path(record, "best_oa_location").filter(|v| v.is_object());
    let locations = array_at(record, "oa_locations");

    let chosen = best
        .filter(|loc| str_at(loc, "url_for_pdf").is_some())
        .or_else(|| locations.iter().find(|loc| str_at(loc, "url_for_pdf").is_some()));

    let mut out = OaResolution::default();
    if let Some(loc) = chosen {
        out.url = str_at(loc, "url_for_pdf");
        out.licenses.extend(str_at(loc, "license"));
    } else if let Some(loc) = best {
        out.url = str_at(loc, "url");
        out.licenses.extend(str_at(loc, "license"));
    }

    for loc in locations {
        if let Some(pdf) = str_at(loc, "url_for_pdf")
            && Some(&pdf) != out.url.as_ref()
            && !out.fallbacks.contains(&pdf)
        {
            out.fallbacks.push(pdf);
        }
        if let Some(license) = str_at(loc, "license")
            && !out.licenses.contains(&license)
        {
            out.licenses.push(license);
        }
    }
    out
}

/// `<base>/<doi>`, each DOI segment percent-encoded so `#`, `?` and `%`
/// stay part of the path.
#[must_use]
pub fn lookup_url(base: &Url, doi: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(doi.split('/'));
    }
    url
}

/// Crossref + Unpaywall connector.
#[derive(Debug)]
pub struct UnpaywallConnector {
    http: HttpClient,
    config: UnpaywallConfig,
    unpaywall: Url,
    email: String,
    queries: Vec<String>,
    paging: Paging,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl UnpaywallConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] without a real contact email,
    /// with an unusable `unpaywall_url`, or without queries.
    pub fn new(ctx: &BuildContext<'_>, config: &UnpaywallConfig) -> Result<Self, SourceError> {
        let email = secret(config.email.as_ref(), "UNPAYWALL_EMAIL")
            .filter(|e| e != PLACEHOLDER_EMAIL)
            .ok_or_else(|| {
                SourceError::config("unpaywall: a real contact email is required (email or UNPAYWALL_EMAIL)")
            })?;
        let unpaywall = Url::parse(&config.unpaywall_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| {
                SourceError::config(format!("unpaywall: invalid unpaywall_url {:?}", config.unpaywall_url))
            })?;
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            unpaywall,
            email,
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
            from: ctx.from,
            to: ctx.to,
        })
    }

    fn crossref_filter(&self) -> String {
        let mut parts = Vec::new();
        if let Some(from) = self.from {
            parts.push(format!("from-pub-date:{}", from.format("%Y-%m-%d")));
        }
        if let Some(to) = self.to {
            parts.push(format!("until-pub-date:{}", to.format("%Y-%m-%d")));
        }
        if let Some(kind) = &self.config.work_type {
            parts.push(format!("type:{kind}"));
        }
        parts.join(",")
    }

    /// Unpaywall record for `doi`; `Ok(None)` when Unpaywall does not know
    /// the DOI.
    async fn lookup(&self, doi: &str) -> Result<Option<Value>, SourceError> {
        let url = lookup_url(&self.unpaywall, doi);
        match self.http.get_json(url.as_str(), &[("email", self.email.clone())]).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn candidate(query: &str, doi: &str, item: &Value, record: Option<&Value>) -> Candidate {
        let title = str_at(item, "title.0")
            .or_else(|| record.and_then(|r| str_at(r, "title")))
            .unwrap_or_else(|| doi.to_string());
        let mut c = Candidate::new(SourceKind::Unpaywall, doi, title);
        c.query = Some(query.to_string());
        c.payload = PayloadSpec::pdf().following_landing();

        let mut licenses = Vec::new();
        if let Some(record) = record {
            let oa = resolve_oa(record);
            c.payload_url = oa.url;
            c.fallback_urls = oa.fallbacks;
            licenses = oa.licenses;
            c.set_meta("is_oa", resolve_path(record, "is_oa").cloned());
            c.set_meta("oa_status", str_at(record, "oa_status"));
            c.set_meta("journal", str_at(record, "journal_name"));
            c.set_meta("year", u64_at(record, "year"));
        } else {
            c.set_meta("unpaywall", "not_found");
        }
        licenses.extend(
            array_at(item, "license")
                .iter()
                .filter_map(|l| str_at(l, "URL")),
        );
        apply_licenses(&mut c, licenses);

        c.set_meta("doi", doi);
        c.set_meta("crossref_type", str_at(item, "type"));
        c.set_meta("container_title", strings_at(item, "container-title"));
        c.set_meta("issued", resolve_path(item, "issued.date-parts.0").cloned());
        c.raw = json!({ "crossref": item, "unpaywall": record });
        c
    }
}

#[async_trait]
impl Connector for UnpaywallConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Unpaywall
    }

    fn queries(&self) -> Vec<String> {
        self.queries.clone()
    }

    fn initial_cursor(&self, _query: &str) -> Cursor {
        Cursor::Token {
            token: "*".to_string(),
            consumed: 0,
        }
    }

    async fn fetch_page(&self, query: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let token = cursor.token().unwrap_or("*").to_string();
        let consumed = cursor.consumed();
        if self.paging.exhausted(consumed) {
            return Ok(Page::default());
        }
        let rows = self.paging.request_size(consumed);

        let mut params = vec![
            ("query.bibliographic", query.to_string()),
            ("rows", rows.to_string()),
            ("cursor", token.clone()),
            ("select", CROSSREF_SELECT.to_string()),
            ("mailto", self.email.clone()),
        ];
        let filter = self.crossref_filter();
        if !filter.is_empty() {
            params.push(("filter", filter));
        }

        log::info!("[unpaywall] crossref query={query:?} consumed={consumed} rows={rows}");
        let body = self.http.get_json(&self.config.crossref_url, &params).await?;
        let items = array_at(&body, "message.items");
        let total = u64_at(&body, "message.total-results");

        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let Some(doi) = str_at(item, "DOI").map(|d| d.to_lowercase()) else {
                continue;
            };
            match self.lookup(&doi).await {
                Ok(record) => candidates.push(Self::candidate(query, &doi, item, record.as_ref())),
                Err(e) => log::warn!("[unpaywall] lookup failed doi={doi}: {e}"),
            }
        }

        let returned = items.len() as u64;
        let next_token = str_at(&body, "message.next-cursor");
        let next = match next_token {
            Some(next)
                if returned > 0
                    && returned >= u64::from(rows)
                    && next != token
                    && !self.paging.exhausted(consumed + returned) =>
            {
                Some(Cursor::Token {
                    token: next,
                    consumed: consumed + returned,
                })
            }
            _ => None,
        };

        Ok(Page {
            candidates,
            next,
            filtered_out: 0,
            total,
        })
    }
}
