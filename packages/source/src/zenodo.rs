//! Zenodo records search connector.

use async_trait::async_trait;
use openstrength_fetch::HttpClient;
use openstrength_harvest_models::{Candidate, SourceKind};
use serde::Deserialize;
use serde_json::Value;

use crate::json::{array_at, resolve_path, str_at, strings_at, u64_at};
use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::repository::{RepositoryFile, apply_files};
use crate::{Connector, Cursor, Page, Paging, SourceError};

/// Records search endpoint.
pub const ZENODO_API: &str = "https://zenodo.org/api/records";

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Zenodo rejects larger pages.
const MAX_PAGE_SIZE: u32 = 1000;

/// `[sources.connector]` for `type = "zenodo"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZenodoConfig {
    /// Search endpoint.
    pub base_url: String,
}

impl Default for ZenodoConfig {
    fn default() -> Self {
        Self {
            base_url: ZENODO_API.to_string(),
        }
    }
}

/// License id of a record: `metadata.license.id`, or `metadata.license`
/// when it is a plain string.
fn license(rec: &Value) -> Option<String> {
    str_at(rec, "metadata.license.id")
        .or_else(|| str_at(rec, "metadata.license.identifier"))
        .or_else(|| str_at(rec, "metadata.license"))
}

fn files(rec: &Value) -> Vec<RepositoryFile> {
    array_at(rec, "files")
        .iter()
        .filter_map(|f| {
            let url = str_at(f, "links.download").or_else(|| str_at(f, "links.self"))?;
            let name = str_at(f, "key")
                .or_else(|| str_at(f, "filename"))
                .unwrap_or_else(|| "file".to_string());
            Some(RepositoryFile {
                name,
                url,
                size: u64_at(f, "size"),
            })
        })
        .collect()
}

/// Zenodo connector.
#[derive(Debug)]
pub struct ZenodoConnector {
    http: HttpClient,
    config: ZenodoConfig,
    queries: Vec<String>,
    paging: Paging,
}

impl ZenodoConnector {
    /// Creates the connector.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no queries are configured.
    pub fn new(ctx: &BuildContext<'_>, config: &ZenodoConfig) -> Result<Self, SourceError> {
        let paging = ctx.def.paging(DEFAULT_PAGE_SIZE);
        Ok(Self {
            http: ctx.http.clone(),
            config: config.clone(),
            queries: ctx.def.require_queries()?,
            paging: Paging::new(paging.page_size.clamp(1, MAX_PAGE_SIZE), paging.max_results),
        })
    }

    fn candidate(query: &str, rec: &Value) -> Option<Candidate> {
        let id = str_at(rec, "id").or_else(|| str_at(rec, "doi"))?;
        let meta = resolve_path(rec, "metadata").unwrap_or(&Value::Null);
        let title = str_at(meta, "title").unwrap_or_else(|| id.clone());

        let mut c = Candidate::new(SourceKind::Zenodo, id, title);
        c.query = Some(query.to_string());
        apply_files(&mut c, &files(rec));
        apply_licenses(&mut c, license(rec).into_iter().collect());

        c.set_meta("doi", str_at(rec, "doi").or_else(|| str_at(meta, "doi")));
        c.set_meta("description", str_at(meta, "description"));
        c.set_meta("publication_date", str_at(meta, "publication_date"));
        c.set_meta("resource_type", str_at(meta, "resource_type.type"));
        c.set_meta("keywords", strings_at(meta, "keywords"));
        c.set_meta(
            "authors",
            array_at(meta, "creators")
                .iter()
                .filter_map(|a| str_at(a, "name"))
                .collect::<Vec<_>>(),
        );
        c.set_meta("landing_url", str_at(rec, "links.html"));
        c.raw = rec.clone();
        Some(c)
    }
}

#[async_trait]
impl Connector for ZenodoConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Zenodo
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

        log::info!("[zenodo] query={query:?} page={page}");
        let body = self
            .http
            .get_json(
                &self.config.base_url,
                &[
                    ("q", query.to_string()),
                    ("size", self.paging.page_size.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;

        // Older deployments answer with a bare array.
        let hits = match &body {
            Value::Array(items) => items.as_slice(),
            _ => array_at(&body, "hits.hits"),
        };
        let total = u64_at(&body, "hits.total").or_else(|| u64_at(&body, "hits.total.value"));
        let keep = usize::try_from(self.paging.request_size(offset)).unwrap_or(usize::MAX);

        Ok(Page {
            candidates: hits
                .iter()
                .take(keep)
                .filter_map(|rec| Self::candidate(query, rec))
                .collect(),
            next: self
                .paging
                .next_page(page, hits.len(), total)
                .map(|page| Cursor::Page { page }),
            filtered_out: 0,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use openstrength_harvest_models::PayloadKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::{context, definition};

    fn record(id: u64, files: &Value) -> Value {
        json!({
            "id": id,
            "doi": format!("10.5281/zenodo.{id}"),
            "links": {"html": format!("https://zenodo.org/records/{id}")},
            "metadata": {
                "title": format!("Powerlifting dataset {id}"),
                "description": "<p>Meet results.</p>",
                "publication_date": "2023-05-01",
                "license": {"id": "cc-by-4.0"},
                "creators": [{"name": "Lifter, A."}],
                "resource_type": {"type": "dataset"}
            },
            "files": files
        })
    }

    #[test]
    fn picks_pdf_and_normalizes_license() {
        let rec = record(
            7,
            &json!([
                {"key": "results.csv", "size": 100, "links": {"self": "https://zenodo.org/api/records/7/files/results.csv/content"}},
                {"key": "paper.pdf", "size": 2000, "links": {"self": "https://zenodo.org/api/records/7/files/paper.pdf/content"}}
            ]),
        );
        let c = ZenodoConnector::candidate("q", &rec).unwrap();
        assert_eq!(c.external_id, "7");
        assert_eq!(
            c.payload_url.as_deref(),
            Some("https://zenodo.org/api/records/7/files/paper.pdf/content")
        );
        assert_eq!(c.payload.kind, PayloadKind::Pdf);
        assert_eq!(c.license_normalized.as_deref(), Some("cc-by"));
        assert_eq!(c.metadata["doi"], "10.5281/zenodo.7");
    }

    #[test]
    fn string_license_is_accepted() {
        let mut rec = record(8, &json!([]));
        rec["metadata"]["license"] = json!("CC0-1.0");
        let c = ZenodoConnector::candidate("q", &rec).unwrap();
        assert_eq!(c.license_normalized.as_deref(), Some("cc0"));
        assert!(c.payload_url.is_none());
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/api/records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "powerlifting".into()),
                Matcher::UrlEncoded("size".into(), "2".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_body(
                json!({"hits": {"total": 3, "hits": [record(1, &json!([])), record(2, &json!([]))]}})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/records")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_body(json!({"hits": {"total": 3, "hits": [record(3, &json!([]))]}}).to_string())
            .expect(1)
            .create_async()
            .await;

        let def = definition(
            r#"
            [[sources]]
            queries = ["powerlifting"]
            page_size = 2
            rate_per_sec = 0.0
            [sources.connector]
            type = "zenodo"
            "#,
        );
        let config = ZenodoConfig {
            base_url: format!("{}/api/records", server.url()),
        };
        let connector = ZenodoConnector::new(&context(&def), &config).unwrap();

        let page = connector.fetch_page("powerlifting", &Cursor::Start).await.unwrap();
        assert_eq!(page.candidates.len(), 2);
        assert_eq!(page.total, Some(3));
        let next = page.next.unwrap();

        let page = connector.fetch_page("powerlifting", &next).await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert!(page.next.is_none());

        first.assert_async().await;
        second.assert_async().await;
    }
}
