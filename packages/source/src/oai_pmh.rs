//! OAI-PMH `ListRecords` harvester for institutional repositories.
//!
//! Each configured endpoint is one "query". Paging follows
//! `resumptionToken` until the repository stops returning one. Records are
//! read as Dublin Core; `dc:rights` feeds the license gate and
//! `dc:identifier` values that look like documents become payload URLs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::filter::KeywordFilter;
use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::xml::{attr, local_name, squash};
use crate::{Connector, Cursor, Page, SourceError};

/// A DOI on its own or behind a resolver or `doi:` prefix.
static DOI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*|info:doi/)?(10\.\d{4,9}/\S+)$")
        .expect("valid regex")
});

/// The DOI in a `dc:identifier`, lower-cased.
#[must_use]
pub fn doi_of(identifier: &str) -> Option<String> {
    DOI.captures(identifier.trim()).map(|caps| caps[1].to_lowercase())
}

/// Dublin Core elements kept from each record.
const DC_FIELDS: &[&str] = &[
    "title",
    "creator",
    "subject",
    "description",
    "publisher",
    "contributor",
    "date",
    "type",
    "format",
    "identifier",
    "source",
    "language",
    "relation",
    "coverage",
    "rights",
];

/// OAI error code meaning "empty result", not a failure.
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// `[sources.connector]` for `type = "oai_pmh"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OaiPmhConfig {
    /// Base URLs of the OAI-PMH endpoints.
    pub endpoints: Vec<String>,
    /// `metadataPrefix`; only `oai_dc` is interpreted.
    pub metadata_prefix: String,
    /// Optional `set` restriction.
    pub set: Option<String>,
}

impl Default for OaiPmhConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            metadata_prefix: "oai_dc".to_string(),
            set: None,
        }
    }
}

/// One non-deleted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OaiRecord {
    /// `header/identifier`.
    pub identifier: String,
    /// `header/datestamp`.
    pub datestamp: Option<String>,
    /// `header/setSpec` values.
    pub sets: Vec<String>,
    /// Dublin Core fields by element name.
    pub dc: BTreeMap<String, Vec<String>>,
}

impl OaiRecord {
    fn first(&self, field: &str) -> Option<String> {
        self.dc.get(field).and_then(|v| v.first()).cloned()
    }

    fn all(&self, field: &str) -> Vec<String> {
        self.dc.get(field).cloned().unwrap_or_default()
    }
}

/// A parsed `ListRecords` response.
#[derive(Debug, Default)]
pub struct ListRecords {
    /// Records, deleted ones excluded.
    pub records: Vec<OaiRecord>,
    /// Deleted records skipped.
    pub deleted: u64,
    /// Non-empty resumption token.
    pub token: Option<String>,
    /// `completeListSize`, when the repository reports it.
    pub complete_list_size: Option<u64>,
    /// `(code, message)` of an OAI `<error>`.
    pub error: Option<(String, String)>,
}

/// Parses a `ListRecords` response.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] on malformed XML.
pub fn parse_list_records(xml: &str) -> Result<ListRecords, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = ListRecords::default();
    let mut record: Option<OaiRecord> = None;
    let mut deleted = false;
    let mut in_header = false;
    let mut in_metadata = false;
    let mut error_code: Option<String> = None;
    // One buffer per open element; a closing element's text is folded into
    // its parent so inline markup (`<i>`, `<sub>`) keeps its words.
    let mut texts: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                texts.push(String::new());
                match name.as_str() {
                    "record" => {
                        record = Some(OaiRecord::default());
                        deleted = false;
                    }
                    "header" => {
                        in_header = true;
                        deleted = attr(&e, "status").as_deref() == Some("deleted");
                    }
                    "metadata" => in_metadata = true,
                    "resumptiontoken" => {
                        out.complete_list_size =
                            attr(&e, "completelistsize").and_then(|s| s.parse().ok());
                    }
                    "error" => error_code = attr(&e, "code"),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match local_name(&e).as_str() {
                "header" if attr(&e, "status").as_deref() == Some("deleted") => deleted = true,
                "resumptiontoken" => {
                    out.complete_list_size =
                        attr(&e, "completelistsize").and_then(|s| s.parse().ok());
                }
                "error" => out.error = Some((attr(&e, "code").unwrap_or_default(), String::new())),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SourceError::parse(format!("OAI-PMH: {e}")))?;
                append(&mut texts, &chunk);
            }
            Ok(Event::CData(t)) => append(&mut texts, &String::from_utf8_lossy(&t)),
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                let value = squash(&texts.pop().unwrap_or_default());
                append(&mut texts, &value);
                match name.as_str() {
                    "record" => {
                        if let Some(r) = record.take() {
                            if deleted {
                                out.deleted += 1;
                            } else if !r.identifier.is_empty() {
                                out.records.push(r);
                            }
                        }
                    }
                    "header" => in_header = false,
                    "metadata" => in_metadata = false,
                    "resumptiontoken" => out.token = (!value.is_empty()).then_some(value),
                    "error" => {
                        out.error = Some((error_code.take().unwrap_or_default(), value));
                    }
                    _ => {
                        if let Some(r) = record.as_mut() {
                            if in_header {
                                match name.as_str() {
                                    "identifier" => r.identifier = value,
                                    "datestamp" => r.datestamp = Some(value),
                                    "setspec" => r.sets.push(value),
                                    _ => {}
                                }
                            } else if in_metadata
                                && !value.is_empty()
                                && DC_FIELDS.contains(&name.as_str())
                            {
                                r.dc.entry(name).or_default().push(value);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::parse(format!(
                    "OAI-PMH at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    Ok(out)
}

fn append(texts: &mut [String], chunk: &str) {
    if let Some(top) = texts.last_mut() {
        top.push(' ');
        top.push_str(chunk);
    }
}

/// Orders `dc:identifier` values by how likely they are to be the document:
/// `.pdf` URLs, then repository bitstream/download URLs, then any other
/// HTTP URL.
#[must_use]
pub fn rank_identifiers(identifiers: &[String]) -> Vec<String> {
    let http: Vec<&String> = identifiers
        .iter()
        .filter(|i| i.starts_with("http://") || i.starts_with("https://"))
        .collect();
    let pdfs = http.iter().filter(|i| i.to_lowercase().ends_with(".pdf"));
    let bitstreams = http.iter().filter(|i| {
        let lower = i.to_lowercase();
        lower.contains("bitstream") || lower.contains("download")
    });
    let mut out: Vec<String> = Vec::new();
    for url in pdfs.chain(bitstreams).chain(http.iter()) {
        if !out.contains(url) {
            out.push((*url).clone());
        }
    }
    out
}

/// OAI-PMH connector.
#[derive(Debug)]
pub struct OaiPmhConnector {
    http: HttpClient,
    config: OaiPmhConfig,
    endpoints: Vec<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    max_results: Option<u64>,
    keywords: KeywordFilter,
    any_of: Vec<KeywordFilter>,
}

impl OaiPmhConnector {
    /// Creates the connector. The source's `queries` act as an any-of
    /// filter over title, description and subjects; `keywords` must all
    /// match.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no endpoints are configured.
    pub fn new(ctx: &BuildContext<'_>, config: &OaiPmhConfig) -> Result<Self, SourceError> {
        let endpoints: Vec<String> = config
            .endpoints
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(SourceError::config("oai_pmh: no endpoints configured"));
        }
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            endpoints,
            from: ctx.from,
            to: ctx.to,
            max_results: ctx.def.max_results,
            keywords: ctx.def.keyword_filter(),
            any_of: ctx
                .def
                .queries
                .iter()
                .map(|q| KeywordFilter::new(std::slice::from_ref(q)))
                .filter(|f| !f.is_empty())
                .collect(),
        })
    }

    fn passes(&self, c: &Candidate) -> bool {
        self.keywords.matches(c)
            && (self.any_of.is_empty() || self.any_of.iter().any(|f| f.matches(c)))
    }

    fn candidate(endpoint: &str, record: OaiRecord) -> Candidate {
        let title = record.first("title").unwrap_or_else(|| record.identifier.clone());
        let mut c = Candidate::new(SourceKind::OaiPmh, record.identifier.clone(), title);
        c.query = Some(endpoint.to_string());

        let mut urls = rank_identifiers(&record.all("identifier")).into_iter();
        c.payload_url = urls.next();
        c.fallback_urls = urls.collect();
        c.payload = PayloadSpec::pdf().following_landing();
        apply_licenses(&mut c, record.all("rights"));

        c.set_meta("endpoint", endpoint);
        c.set_meta("datestamp", record.datestamp.clone());
        c.set_meta("sets", record.sets.clone());
        c.set_meta("authors", record.all("creator"));
        c.set_meta("subjects", record.all("subject"));
        c.set_meta("description", record.all("description").join("\n"));
        c.set_meta("dates", record.all("date"));
        c.set_meta("types", record.all("type"));
        c.set_meta("publisher", record.first("publisher"));
        c.set_meta("language", record.first("language"));
        c.set_meta("identifiers", record.all("identifier"));
        if let Some(doi) = record.all("identifier").iter().find_map(|i| doi_of(i)) {
            c.set_meta("doi", doi);
        }
        c.raw = serde_json::to_value(&record).unwrap_or_default();
        c
    }
}

#[async_trait]
impl Connector for OaiPmhConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::OaiPmh
    }

    fn queries(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    async fn fetch_page(&self, endpoint: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let consumed = cursor.consumed();
        if self.max_results.is_some_and(|max| consumed >= max) {
            return Ok(Page::default());
        }

        let mut params = vec![("verb", "ListRecords".to_string())];
        if let Some(token) = cursor.token() {
            params.push(("resumptionToken", token.to_string()));
        } else {
            params.push(("metadataPrefix", self.config.metadata_prefix.clone()));
            if let Some(from) = self.from {
                params.push(("from", from.format("%Y-%m-%d").to_string()));
            }
            if let Some(to) = self.to {
                params.push(("until", to.format("%Y-%m-%d").to_string()));
            }
            if let Some(set) = &self.config.set {
                params.push(("set", set.clone()));
            }
        }

        log::info!("[oai_pmh] endpoint={endpoint} consumed={consumed}");
        let xml = self.http.get_text(endpoint, &params).await?;
        let list = parse_list_records(&xml)?;

        if let Some((code, message)) = list.error {
            if code == NO_RECORDS_MATCH {
                log::info!("[oai_pmh] {endpoint}: no records match");
                return Ok(Page::default());
            }
            return Err(SourceError::parse(format!(
                "{endpoint}: OAI error code={code} msg={message}"
            )));
        }
        if list.deleted > 0 {
            log::debug!("[oai_pmh] {endpoint}: skipped {} deleted record(s)", list.deleted);
        }

        let mut records = list.records;
        if let Some(max) = self.max_results {
            let room = usize::try_from(max.saturating_sub(consumed)).unwrap_or(usize::MAX);
            records.truncate(room);
        }
        let returned = records.len() as u64;

        let mut filtered_out = 0;
        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            let c = Self::candidate(endpoint, record);
            if self.passes(&c) {
                candidates.push(c);
            } else {
                filtered_out += 1;
            }
        }

        let consumed = consumed + returned;
        let next = list
            .token
            .filter(|token| cursor.token() != Some(token.as_str()))
            .filter(|_| !self.max_results.is_some_and(|max| consumed >= max))
            .map(|token| Cursor::Token { token, consumed });

        Ok(Page {
            candidates,
            next,
            filtered_out,
            total: list.complete_list_size,
        })
    }
}
