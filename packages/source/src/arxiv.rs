//! arXiv Atom API connector.
//!
//! Pages through `export.arxiv.org/api/query` with `start`/`max_results`
//! and parses the Atom feed with `quick-xml`. Every entry becomes a
//! candidate whose payload is the paper PDF.

use async_trait::async_trait;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, PayloadSpec, SourceKind};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

use crate::registry::BuildContext;
use crate::xml::{attr, local_name, squash};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// Default API endpoint.
pub const ARXIV_API: &str = "http://export.arxiv.org/api/query";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// `[sources.connector]` for `type = "arxiv"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    /// API endpoint.
    pub base_url: String,
    /// `sortBy` parameter (`relevance`, `lastUpdatedDate`, `submittedDate`).
    pub sort_by: Option<String>,
    /// `sortOrder` parameter.
    pub sort_order: Option<String>,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: ARXIV_API.to_string(),
            sort_by: Some("submittedDate".to_string()),
            sort_order: Some("descending".to_string()),
        }
    }
}

/// One Atom `<entry>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArxivEntry {
    /// Identifier without version (`2401.01234`, `hep-th/9901001`).
    pub id: String,
    /// Version suffix (`v2`), if present.
    pub version: Option<String>,
    /// Paper title.
    pub title: String,
    /// Abstract.
    pub summary: String,
    /// First submission timestamp.
    pub published: Option<String>,
    /// Last update timestamp.
    pub updated: Option<String>,
    /// Author names.
    pub authors: Vec<String>,
    /// Primary category term.
    pub primary_category: Option<String>,
    /// All category terms.
    pub categories: Vec<String>,
    /// Journal DOI, if any.
    pub doi: Option<String>,
    /// Journal reference.
    pub journal_ref: Option<String>,
    /// Author comment.
    pub comment: Option<String>,
    /// Abstract page.
    pub abs_url: Option<String>,
    /// PDF link.
    pub pdf_url: Option<String>,
}

/// A parsed feed page.
#[derive(Debug, Default)]
pub struct ArxivFeed {
    /// `opensearch:totalResults`.
    pub total: Option<u64>,
    /// Entries in feed order.
    pub entries: Vec<ArxivEntry>,
}

/// Splits `http://arxiv.org/abs/2401.01234v2` into `("2401.01234", Some("v2"))`.
fn split_id(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    let id = raw
        .split_once("/abs/")
        .map_or_else(|| raw.rsplit('/').next().unwrap_or(raw), |(_, id)| id);
    if let Some(pos) = id.rfind('v') {
        let (base, version) = id.split_at(pos);
        if !base.is_empty() && version.len() > 1 && version[1..].chars().all(|c| c.is_ascii_digit()) {
            return (base.to_string(), Some(version.to_string()));
        }
    }
    (id.to_string(), None)
}

fn on_link(entry: &mut ArxivEntry, e: &quick_xml::events::BytesStart<'_>) {
    let Some(href) = attr(e, "href") else {
        return;
    };
    let is_pdf = attr(e, "title").as_deref() == Some("pdf")
        || attr(e, "type").as_deref() == Some("application/pdf");
    if is_pdf {
        entry.pdf_url = Some(href);
    } else if attr(e, "rel").as_deref() == Some("alternate") {
        entry.abs_url = Some(href);
    }
}

fn on_attrs(entry: &mut ArxivEntry, name: &str, e: &quick_xml::events::BytesStart<'_>) {
    match name {
        "link" => on_link(entry, e),
        "category" => {
            if let Some(term) = attr(e, "term") {
                entry.categories.push(term);
            }
        }
        "primary_category" => entry.primary_category = attr(e, "term"),
        _ => {}
    }
}

/// Parses an arXiv Atom feed.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] on malformed XML.
pub fn parse_feed(xml: &str) -> Result<ArxivFeed, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ArxivFeed::default();
    let mut current: Option<ArxivEntry> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                text.clear();
                if name == "entry" {
                    current = Some(ArxivEntry::default());
                } else if let Some(entry) = current.as_mut() {
                    on_attrs(entry, &name, &e);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    on_attrs(entry, &local_name(&e), &e);
                }
            }
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SourceError::parse(format!("arXiv feed: {e}")))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(t)) => text.push_str(&String::from_utf8_lossy(&t)),
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                let value = squash(&text);
                text.clear();
                match (current.as_mut(), name.as_str()) {
                    (None, "totalresults") => feed.total = value.parse().ok(),
                    (Some(_), "entry") => {
                        if let Some(entry) = current.take()
                            && !entry.id.is_empty()
                        {
                            feed.entries.push(entry);
                        }
                    }
                    (Some(entry), "id") => {
                        let (id, version) = split_id(&value);
                        entry.id = id;
                        entry.version = version;
                    }
                    (Some(entry), "title") => entry.title = value,
                    (Some(entry), "summary") => entry.summary = value,
                    (Some(entry), "published") => entry.published = Some(value),
                    (Some(entry), "updated") => entry.updated = Some(value),
                    (Some(entry), "name") if !value.is_empty() => entry.authors.push(value),
                    (Some(entry), "doi") if !value.is_empty() => entry.doi = Some(value),
                    (Some(entry), "journal_ref") if !value.is_empty() => entry.journal_ref = Some(value),
                    (Some(entry), "comment") if !value.is_empty() => entry.comment = Some(value),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::parse(format!(
                    "arXiv feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    Ok(feed)
}

impl ArxivEntry {
    /// Converts the entry into a candidate.
    #[must_use]
    pub fn into_candidate(self, query: &str) -> Candidate {
        let mut c = Candidate::new(SourceKind::Arxiv, self.id.clone(), self.title.clone());
        c.payload_url = Some(
            self.pdf_url
                .clone()
                .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}.pdf", self.id)),
        );
        c.payload = PayloadSpec::pdf();
        c.query = Some(query.to_string());
        c.set_meta("abstract", self.summary.clone());
        c.set_meta("authors", self.authors.clone());
        c.set_meta("published", self.published.clone());
        c.set_meta("updated", self.updated.clone());
        c.set_meta("primary_category", self.primary_category.clone());
        c.set_meta("categories", self.categories.clone());
        c.set_meta("doi", self.doi.clone());
        c.set_meta("journal_ref", self.journal_ref.clone());
        c.set_meta("comment", self.comment.clone());
        c.set_meta("arxiv_version", self.version.clone());
        c.set_meta("abs_url", self.abs_url.clone());
        c.raw = serde_json::to_value(&self).unwrap_or_default();
        c
    }
}

/// arXiv search connector.
#[derive(Debug)]
pub struct ArxivConnector {
    http: HttpClient,
    config: ArxivConfig,
    queries: Vec<String>,
    paging: Paging,
}

impl ArxivConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no queries are configured.
    pub fn new(ctx: &BuildContext<'_>, config: &ArxivConfig) -> Result<Self, SourceError> {
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            queries: ctx.def.require_queries()?,
            paging: ctx.def.paging(DEFAULT_PAGE_SIZE),
        })
    }
}

#[async_trait]
impl Connector for ArxivConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
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

        let mut params = vec![
            ("search_query", query.to_string()),
            ("start", offset.to_string()),
            ("max_results", size.to_string()),
        ];
        if let Some(sort_by) = &self.config.sort_by {
            params.push(("sortBy", sort_by.clone()));
        }
        if let Some(sort_order) = &self.config.sort_order {
            params.push(("sortOrder", sort_order.clone()));
        }

        log::info!("[arxiv] query={query:?} start={offset} max_results={size}");
        let xml = self.http.get_text(&self.config.base_url, &params).await?;
        let feed = parse_feed(&xml)?;

        let returned = feed.entries.len();
        let next = self
            .paging
            .next_offset(offset, returned, feed.total)
            .map(|offset| Cursor::Offset { offset });

        Ok(Page {
            candidates: feed
                .entries
                .into_iter()
                .map(|e| e.into_candidate(query))
                .collect(),
            next,
            filtered_out: 0,
            total: feed.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;
    use crate::test_support::{context, definition};

    fn feed(total: u64, ids: &[&str]) -> String {
        let entries: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<entry>
  <id>http://arxiv.org/abs/{id}v2</id>
  <updated>2024-02-01T00:00:00Z</updated>
  <published>2024-01-15T00:00:00Z</published>
  <title>Resistance training
    and {id}</title>
  <summary>  Hypertrophy &amp; strength outcomes.  </summary>
  <author><name>A. Lifter</name></author>
  <author><name>B. Coach</name></author>
  <arxiv:doi>10.1000/{id}</arxiv:doi>
  <link href="http://arxiv.org/abs/{id}v2" rel="alternate" type="text/html"/>
  <link title="pdf" href="http://arxiv.org/pdf/{id}v2" rel="related" type="application/pdf"/>
  <arxiv:primary_category term="q-bio.TO" scheme="http://arxiv.org/schemas/atom"/>
  <category term="q-bio.TO" scheme="http://arxiv.org/schemas/atom"/>
  <category term="physics.med-ph" scheme="http://arxiv.org/schemas/atom"/>
</entry>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/"
      xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/xyz</id>
  <opensearch:totalResults>{total}</opensearch:totalResults>
  <opensearch:startIndex>0</opensearch:startIndex>
  {entries}
</feed>"#
        )
    }

    #[test]
    fn parses_atom_entries() {
        let parsed = parse_feed(&feed(2, &["2401.00001", "2401.00002"])).unwrap();
        assert_eq!(parsed.total, Some(2));
        assert_eq!(parsed.entries.len(), 2);

        let e = &parsed.entries[0];
        assert_eq!(e.id, "2401.00001");
        assert_eq!(e.version.as_deref(), Some("v2"));
        assert_eq!(e.title, "Resistance training and 2401.00001");
        assert_eq!(e.summary, "Hypertrophy & strength outcomes.");
        assert_eq!(e.authors, vec!["A. Lifter", "B. Coach"]);
        assert_eq!(e.doi.as_deref(), Some("10.1000/2401.00001"));
        assert_eq!(e.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2401.00001v2"));
        assert_eq!(e.primary_category.as_deref(), Some("q-bio.TO"));
        assert_eq!(e.categories, vec!["q-bio.TO", "physics.med-ph"]);
    }

    #[test]
    fn splits_old_and_new_style_ids() {
        assert_eq!(
            split_id("http://arxiv.org/abs/hep-th/9901001v1"),
            ("hep-th/9901001".to_string(), Some("v1".to_string()))
        );
        assert_eq!(split_id("2401.00001"), ("2401.00001".to_string(), None));
    }

    #[test]
    fn candidate_falls_back_to_canonical_pdf_url() {
        let entry = ArxivEntry {
            id: "2401.00009".to_string(),
            title: "T".to_string(),
            ..ArxivEntry::default()
        };
        let c = entry.into_candidate("q");
        assert_eq!(c.payload_url.as_deref(), Some("https://arxiv.org/pdf/2401.00009.pdf"));
        assert_eq!(c.query.as_deref(), Some("q"));
    }

    #[test]
    fn malformed_feed_is_a_parse_error() {
        assert!(matches!(
            parse_feed("<feed><entry><id>x</id></feed>"),
            Err(SourceError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "all:strength".into()),
                Matcher::UrlEncoded("start".into(), "0".into()),
                Matcher::UrlEncoded("max_results".into(), "2".into()),
            ]))
            .with_body(feed(3, &["2401.00001", "2401.00002"]))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/query")
            .match_query(Matcher::UrlEncoded("start".into(), "2".into()))
            .with_body(feed(3, &["2401.00003"]))
            .expect(1)
            .create_async()
            .await;

        let def = definition(
            r#"
            [[sources]]
            queries = ["all:strength"]
            page_size = 2
            rate_per_sec = 0.0
            [sources.connector]
            type = "arxiv"
            "#,
        );
        let config = ArxivConfig {
            base_url: format!("{}/api/query", server.url()),
            ..ArxivConfig::default()
        };
        let connector = ArxivConnector::new(&context(&def), &config).unwrap();

        let page = connector.fetch_page("all:strength", &Cursor::Start).await.unwrap();
        assert_eq!(page.candidates.len(), 2);
        assert_eq!(page.total, Some(3));
        let next = page.next.unwrap();
        assert_eq!(next, Cursor::Offset { offset: 2 });

        let page = connector.fetch_page("all:strength", &next).await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert!(page.next.is_none());

        first.assert_async().await;
        second.assert_async().await;
    }
}
