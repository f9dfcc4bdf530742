//! `PubMed` Central connector (NCBI E-utilities).
//!
//! `esearch` pages through PMC ids for a query and date window; `efetch`
//! then pulls each article's JATS XML, which carries the license and the
//! bibliographic fields. The JATS document is kept as an attachment next
//! to the PDF.

use async_trait::async_trait;
use chrono::NaiveDate;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Attachment, Candidate, PayloadSpec, SourceKind};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use crate::json::{strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::{BuildContext, secret};
use crate::xml::{attr, local_name, squash};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// NCBI E-utilities base URL.
pub const EUTILS: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// PMC article pages.
pub const PMC_ARTICLES: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// `[sources.connector]` for `type = "pmc"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PmcConfig {
    /// E-utilities base URL.
    pub base_url: String,
    /// Base of the article pages the PDF links hang off.
    pub articles_url: String,
    /// Contact email NCBI asks for; falls back to `NCBI_EMAIL`.
    pub email: Option<String>,
    /// API key raising the NCBI rate limit; falls back to `NCBI_API_KEY`.
    pub api_key: Option<String>,
    /// Date field the window applies to (`pdat`, `edat`, `mdat`).
    pub date_type: String,
    /// Whether the JATS XML is stored as an attachment.
    pub save_xml: bool,
}

impl Default for PmcConfig {
    fn default() -> Self {
        Self {
            base_url: EUTILS.to_string(),
            articles_url: PMC_ARTICLES.to_string(),
            email: None,
            api_key: None,
            date_type: "pdat".to_string(),
            save_xml: true,
        }
    }
}

// ── JATS ─────────────────────────────────────────────────────────────────

/// Fields pulled out of a JATS article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JatsArticle {
    /// `article-meta/title-group/article-title`.
    pub title: Option<String>,
    /// `journal-title`.
    pub journal: Option<String>,
    /// Abstract text.
    pub abstract_text: Option<String>,
    /// `article-id[pub-id-type=doi]`.
    pub doi: Option<String>,
    /// `article-id[pub-id-type=pmid]`.
    pub pmid: Option<String>,
    /// Publication year.
    pub year: Option<String>,
    /// Author keywords.
    pub keywords: Vec<String>,
    /// License hrefs and statements, most specific first.
    pub licenses: Vec<String>,
    /// `self-uri[content-type=pmc-pdf]` target.
    pub pdf_href: Option<String>,
}

struct Frame {
    name: String,
    text: String,
    id_type: Option<String>,
}

fn on_element(article: &mut JatsArticle, name: &str, e: &BytesStart<'_>) {
    match name {
        "license" => {
            if let Some(href) = attr(e, "href") {
                article.licenses.push(href);
            }
        }
        "ext-link" if attr(e, "ext-link-type").as_deref() == Some("license") => {
            if let Some(href) = attr(e, "href") {
                article.licenses.push(href);
            }
        }
        "self-uri" if attr(e, "content-type").as_deref() == Some("pmc-pdf") => {
            if article.pdf_href.is_none() {
                article.pdf_href = attr(e, "href");
            }
        }
        _ => {}
    }
}

/// Parses the first article of an `efetch` response.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] on malformed XML.
pub fn parse_jats(xml: &str) -> Result<JatsArticle, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut article = JatsArticle::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                on_element(&mut article, &name, &e);
                let id_type = (name == "article-id").then(|| attr(&e, "pub-id-type")).flatten();
                stack.push(Frame {
                    name,
                    text: String::new(),
                    id_type,
                });
            }
            Ok(Event::Empty(e)) => on_element(&mut article, &local_name(&e), &e),
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SourceError::parse(format!("JATS: {e}")))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push(' ');
                    frame.text.push_str(&chunk);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push(' ');
                    frame.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(_)) => {
                let Some(frame) = stack.pop() else {
                    continue;
                };
                let text = squash(&frame.text);
                let within = |n: &str| stack.iter().any(|f| f.name == n);
                let in_meta = within("article-meta");
                match frame.name.as_str() {
                    "article-title" if in_meta && within("title-group") && article.title.is_none() => {
                        article.title = Some(text.clone());
                    }
                    "journal-title" if article.journal.is_none() => article.journal = Some(text.clone()),
                    "abstract" if in_meta && article.abstract_text.is_none() => {
                        article.abstract_text = Some(text.clone());
                    }
                    "article-id" if in_meta => match frame.id_type.as_deref() {
                        Some("doi") if article.doi.is_none() => article.doi = Some(text.clone()),
                        Some("pmid") if article.pmid.is_none() => article.pmid = Some(text.clone()),
                        _ => {}
                    },
                    "year" if in_meta && within("pub-date") && article.year.is_none() => {
                        article.year = Some(text.clone());
                    }
                    "kwd" if in_meta && !text.is_empty() => article.keywords.push(text.clone()),
                    "license_ref" | "license-p" if !text.is_empty() => article.licenses.push(text.clone()),
                    "permissions" if article.licenses.is_empty() && text.to_lowercase().contains("public domain") => {
                        article.licenses.push(text.clone());
                    }
                    _ => {}
                }
                if let Some(parent) = stack.last_mut() {
                    parent.text.push(' ');
                    parent.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::parse(format!(
                    "JATS at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    Ok(article)
}

// ── Connector ────────────────────────────────────────────────────────────

/// PMC connector.
#[derive(Debug)]
pub struct PmcConnector {
    http: HttpClient,
    config: PmcConfig,
    email: String,
    api_key: Option<String>,
    queries: Vec<String>,
    paging: Paging,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl PmcConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no contact email or no queries
    /// are configured.
    pub fn new(ctx: &BuildContext<'_>, config: &PmcConfig) -> Result<Self, SourceError> {
        let email = secret(config.email.as_ref(), "NCBI_EMAIL")
            .ok_or_else(|| SourceError::config("pmc: an email is required (email or NCBI_EMAIL)"))?;
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            email,
            api_key: secret(config.api_key.as_ref(), "NCBI_API_KEY"),
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
            from: ctx.from,
            to: ctx.to,
        })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pmc".to_string()), ("email", self.email.clone())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn esearch(
        &self,
        query: &str,
        offset: u64,
        size: u32,
    ) -> Result<(Vec<String>, Option<u64>), SourceError> {
        let mut params = self.common_params();
        params.extend([
            ("term", query.to_string()),
            ("retmode", "json".to_string()),
            ("retstart", offset.to_string()),
            ("retmax", size.to_string()),
        ]);
        if self.from.is_some() || self.to.is_some() {
            let min = self.from.unwrap_or_else(|| NaiveDate::from_ymd_opt(1800, 1, 1).unwrap_or_default());
            let max = self.to.unwrap_or_else(|| chrono::Utc::now().date_naive());
            params.extend([
                ("datetype", self.config.date_type.clone()),
                ("mindate", min.format("%Y/%m/%d").to_string()),
                ("maxdate", max.format("%Y/%m/%d").to_string()),
            ]);
        }
        let url = format!("{}/esearch.fcgi", self.config.base_url);
        let body = self.http.get_json(&url, &params).await?;
        let ids = strings_at(&body, "esearchresult.idlist")
            .into_iter()
            .map(|id| id.trim_start_matches("PMC").to_string())
            .collect();
        Ok((ids, u64_at(&body, "esearchresult.count")))
    }

    async fn efetch(&self, pmcid: &str) -> Result<String, SourceError> {
        let mut params = self.common_params();
        params.extend([("id", pmcid.to_string()), ("retmode", "xml".to_string())]);
        let url = format!("{}/efetch.fcgi", self.config.base_url);
        Ok(self.http.get_text(&url, &params).await?)
    }

    async fn candidate(&self, query: &str, pmcid: &str) -> Candidate {
        let accession = format!("PMC{pmcid}");
        let article_url = format!("{}/{accession}/", self.config.articles_url);

        let (article, xml) = match self.efetch(pmcid).await {
            Ok(xml) => match parse_jats(&xml) {
                Ok(article) => (article, Some(xml)),
                Err(e) => {
                    log::warn!("[pmc] {accession}: unreadable JATS: {e}");
                    (JatsArticle::default(), Some(xml))
                }
            },
            Err(e) => {
                log::warn!("[pmc] {accession}: efetch failed: {e}");
                (JatsArticle::default(), None)
            }
        };

        let title = article.title.clone().unwrap_or_else(|| accession.clone());
        let mut c = Candidate::new(SourceKind::Pmc, accession.clone(), title);
        c.query = Some(query.to_string());
        c.payload_url = Some(format!("{article_url}pdf/"));
        c.payload = PayloadSpec::pdf().following_landing();
        if let Some(href) = &article.pdf_href {
            let resolved = url::Url::parse(&article_url)
                .and_then(|base| base.join(href))
                .map_or_else(|_| href.clone(), |u| u.to_string());
            c.fallback_urls.push(resolved);
        }
        apply_licenses(&mut c, article.licenses.clone());

        c.set_meta("pmcid", accession.clone());
        c.set_meta("pmid", article.pmid.clone());
        c.set_meta("doi", article.doi.clone());
        c.set_meta("journal", article.journal.clone());
        c.set_meta("year", article.year.clone());
        c.set_meta("abstract", article.abstract_text.clone());
        c.set_meta("keywords", article.keywords.clone());
        c.set_meta("article_url", article_url);
        c.raw = serde_json::to_value(&article).unwrap_or_default();

        if self.config.save_xml
            && let Some(xml) = xml
        {
            c.attachments.push(Attachment {
                file_name: format!("{accession}.xml"),
                bytes: xml.into_bytes(),
            });
        }
        c
    }
}

#[async_trait]
impl Connector for PmcConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Pmc
    }

    fn queries(&self) -> Vec<String> {
        self.queries.clone()
    }

    async fn fetch_page(&self, query: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let offset = cursor.offset();
        if self.paging.exhausted(offset) {
            return Ok(Page::default());
        }
        let size = self.paging.request_size(offset);

        let (ids, total) = self.esearch(query, offset, size).await?;
        log::info!(
            "[pmc] term={query:?} retstart={offset} -> {} ids (total {})",
            ids.len(),
            total.map_or_else(|| "?".to_string(), |t| t.to_string())
        );

        let mut candidates = Vec::with_capacity(ids.len());
        for id in &ids {
            candidates.push(self.candidate(query, id).await);
        }

        Ok(Page {
            candidates,
            next: self
                .paging
                .next_offset(offset, ids.len(), total)
                .map(|offset| Cursor::Offset { offset }),
            filtered_out: 0,
            total,
        })
    }
}
