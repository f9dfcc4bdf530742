//! Breadth-first crawler for government health sites.
//!
//! Starts from configured seed URLs, stays inside an allow-list of
//! domains, and emits every fetched page or document whose extension is
//! in `filetypes` as a candidate with its bytes already attached. The
//! crawl state lives in a serializable [`Frontier`] carried by the cursor,
//! so each [`Connector::fetch_page`] call processes one batch of URLs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::LazyLock;

use async_trait::async_trait;
use openstrength_fetch::{HttpClient, payload};
use openstrength_harvest_models::{Candidate, PayloadKind, PayloadSpec, Prefetched, SourceKind};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::license::apply_licenses;
use crate::registry::BuildContext;
use crate::{Connector, Cursor, Page, SourceError};

/// Label of the single crawl "query".
pub const CRAWL_QUERY: &str = "crawl";

/// `[sources.connector]` for `type = "gov"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovConfig {
    /// Start URLs.
    pub seeds: Vec<String>,
    /// Hosts (and their subdomains) the crawl may visit. Inferred from the
    /// seeds when empty.
    pub allow_domains: Vec<String>,
    /// Extensions that are saved; pages without an extension count as
    /// `.html`.
    pub filetypes: Vec<String>,
    /// Links deeper than this are not followed.
    pub max_depth: u32,
    /// Saved items per domain before the domain is ignored.
    pub max_per_domain: u64,
    /// URLs fetched per page of results.
    pub batch_size: usize,
    /// License text recorded on every crawled item, for sites whose
    /// content is public domain by statute.
    pub assumed_license: Option<String>,
}

impl Default for GovConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            allow_domains: Vec::new(),
            filetypes: vec![".pdf".to_string(), ".html".to_string()],
            max_depth: 3,
            max_per_domain: 800,
            batch_size: 25,
            assumed_license: None,
        }
    }
}

/// One queued URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Normalized URL.
    pub url: String,
    /// Link distance from a seed.
    pub depth: u32,
}

/// Crawl state: the BFS queue, every URL ever enqueued, and saved counts
/// per domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    /// URLs still to visit, in order.
    pub queue: VecDeque<FrontierEntry>,
    /// Normalized URLs already enqueued.
    pub seen: BTreeSet<String>,
    /// Items emitted per host.
    pub saved_per_domain: BTreeMap<String, u64>,
}

impl Frontier {
    /// Enqueues `url` at `depth` unless it was seen before. Returns whether
    /// it was added.
    pub fn push(&mut self, url: String, depth: u32) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.queue.push_back(FrontierEntry { url, depth });
        true
    }

    fn saved(&self, domain: &str) -> u64 {
        self.saved_per_domain.get(domain).copied().unwrap_or(0)
    }
}

// ── URL helpers ──────────────────────────────────────────────────────────

/// Normalizes a URL for deduplication: fragment stripped, scheme and host
/// lowercased, default port removed, empty path replaced by `/`. Returns
/// `None` for non-HTTP URLs.
#[must_use]
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Lowercased host of `url`.
#[must_use]
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_ascii_lowercase)
}

/// Whether `url`'s host is one of `allow` or a subdomain of one.
#[must_use]
pub fn is_allowed_domain(url: &str, allow: &BTreeSet<String>) -> bool {
    domain_of(url).is_some_and(|host| {
        allow
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    })
}

/// Lowercased extension of the URL path (with the dot), if any.
fn extension(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let name = url.path_segments()?.next_back()?.to_string();
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| format!(".{}", ext.to_ascii_lowercase()))
}

/// Whether `url` is worth fetching under `filetypes`; extensionless paths
/// are treated as HTML.
fn wanted(url: &str, filetypes: &BTreeSet<String>) -> bool {
    extension(url).map_or_else(|| filetypes.contains(".html"), |ext| filetypes.contains(&ext))
}

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

/// Absolute links of every `<a href>` on the page, fragments stripped,
/// `mailto:` and `javascript:` skipped.
#[must_use]
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    doc.select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            let lower = href.to_ascii_lowercase();
            !href.is_empty()
                && !href.starts_with('#')
                && !lower.starts_with("mailto:")
                && !lower.starts_with("javascript:")
        })
        .filter_map(|href| base.join(href).ok())
        .filter_map(|u| normalize_url(u.as_str()))
        .collect()
}

fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|t| crate::xml::squash(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn file_title(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments()?.rfind(|s| !s.is_empty()).map(String::from))
        .unwrap_or_else(|| url.to_string())
}

// ── Connector ────────────────────────────────────────────────────────────

/// Government site crawler.
#[derive(Debug)]
pub struct GovConnector {
    http: HttpClient,
    seeds: Vec<String>,
    allow_domains: BTreeSet<String>,
    filetypes: BTreeSet<String>,
    max_depth: u32,
    max_per_domain: u64,
    batch_size: usize,
    assumed_license: Option<String>,
}

impl GovConnector {
    /// Creates the crawler.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] when no seed is usable.
    pub fn new(ctx: &BuildContext<'_>, config: &GovConfig) -> Result<Self, SourceError> {
        let mut allow_domains: BTreeSet<String> = config
            .allow_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if allow_domains.is_empty() {
            allow_domains = config.seeds.iter().filter_map(|s| domain_of(s)).collect();
            log::info!("[gov] inferred allow_domains={allow_domains:?}");
        }

        let mut seeds = Vec::new();
        for seed in &config.seeds {
            match normalize_url(seed) {
                Some(url) if is_allowed_domain(&url, &allow_domains) => seeds.push(url),
                _ => log::warn!("[gov] seed outside allow_domains or invalid, skipping: {seed}"),
            }
        }
        if seeds.is_empty() {
            return Err(SourceError::config("gov: no usable seed URLs configured"));
        }

        let filetypes = config
            .filetypes
            .iter()
            .map(|f| {
                let f = f.trim().to_ascii_lowercase();
                if f.starts_with('.') { f } else { format!(".{f}") }
            })
            .collect();

        Ok(Self {
            http: ctx.http.clone(),
            seeds,
            allow_domains,
            filetypes,
            max_depth: config.max_depth,
            max_per_domain: config.max_per_domain,
            batch_size: config.batch_size.max(1),
            assumed_license: config.assumed_license.clone(),
        })
    }

    fn seeded(&self) -> Frontier {
        let mut frontier = Frontier::default();
        for seed in &self.seeds {
            frontier.push(seed.clone(), 0);
        }
        frontier
    }

    /// Fetches one URL, returning the candidate to save (if any) and the
    /// links found on it.
    async fn visit(&self, entry: &FrontierEntry) -> (Option<Candidate>, Vec<String>) {
        let fetched = match self.http.get(&entry.url, &[]).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::warn!("[gov] fetch failed: {} :: {e}", entry.url);
                return (None, Vec::new());
            }
        };

        let ct = fetched.content_type.as_deref();
        let is_pdf = payload::is_valid(PayloadKind::Pdf, ct, &fetched.final_url, &fetched.body);
        let is_html = !is_pdf
            && (payload::content_type_matches(PayloadKind::Html, ct)
                || payload::looks_like_html(&fetched.body));

        let html = is_html.then(|| fetched.text());
        let links = html
            .as_deref()
            .map(|h| extract_links(h, &fetched.final_url))
            .unwrap_or_default();

        let spec = if is_pdf && self.filetypes.contains(".pdf") {
            PayloadSpec::pdf()
        } else if is_html && wanted(&fetched.final_url, &self.filetypes) {
            PayloadSpec::html()
        } else {
            log::debug!("[gov] not saving {} (content-type {ct:?})", entry.url);
            return (None, links);
        };

        let title = html
            .as_deref()
            .and_then(page_title)
            .unwrap_or_else(|| file_title(&fetched.final_url));
        let mut candidate = Candidate::new(SourceKind::Gov, entry.url.clone(), title);
        candidate.payload = spec;
        candidate.payload_url = Some(entry.url.clone());
        apply_licenses(&mut candidate, self.assumed_license.iter().cloned().collect());
        candidate.set_meta("requested_url", entry.url.clone());
        candidate.set_meta("final_url", fetched.final_url.clone());
        candidate.set_meta("domain", domain_of(&entry.url).unwrap_or_default());
        candidate.set_meta("depth", entry.depth);
        candidate.set_meta("content_type", fetched.content_type.clone());
        candidate.raw = serde_json::json!({
            "url": entry.url,
            "final_url": fetched.final_url,
            "status": fetched.status,
            "content_type": fetched.content_type,
            "depth": entry.depth,
        });
        candidate.prefetched = Some(Prefetched {
            bytes: fetched.body,
            content_type: fetched.content_type,
        });
        (Some(candidate), links)
    }
}

#[async_trait]
impl Connector for GovConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Gov
    }

    fn queries(&self) -> Vec<String> {
        vec![CRAWL_QUERY.to_string()]
    }

    fn initial_cursor(&self, _query: &str) -> Cursor {
        Cursor::Frontier(Box::new(self.seeded()))
    }

    async fn fetch_page(&self, _query: &str, cursor: &Cursor) -> Result<Page, SourceError> {
        let mut frontier = match cursor {
            Cursor::Frontier(f) => (**f).clone(),
            _ => self.seeded(),
        };

        let mut candidates = Vec::new();
        let mut visited = 0;
        while visited < self.batch_size
            && let Some(entry) = frontier.queue.pop_front()
        {
            let domain = domain_of(&entry.url).unwrap_or_default();
            if frontier.saved(&domain) >= self.max_per_domain {
                continue;
            }
            visited += 1;

            let (candidate, links) = self.visit(&entry).await;
            if let Some(candidate) = candidate {
                *frontier.saved_per_domain.entry(domain).or_default() += 1;
                candidates.push(candidate);
            }

            if entry.depth < self.max_depth {
                for link in links {
                    if !is_allowed_domain(&link, &self.allow_domains)
                        || !wanted(&link, &self.filetypes)
                    {
                        continue;
                    }
                    let link_domain = domain_of(&link).unwrap_or_default();
                    if frontier.saved(&link_domain) >= self.max_per_domain {
                        continue;
                    }
                    frontier.push(link, entry.depth + 1);
                }
            }
        }

        let next = if frontier.queue.is_empty() {
            let saved: u64 = frontier.saved_per_domain.values().sum();
            log::info!(
                "[gov] crawl complete. saved={saved} by_domain={:?}",
                frontier.saved_per_domain
            );
            None
        } else {
            Some(Cursor::Frontier(Box::new(frontier)))
        };

        Ok(Page {
            candidates,
            next,
            filtered_out: 0,
            total: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::*;
    use crate::test_support::{context, definition};

    #[test]
    fn normalizes_urls() {
        assert_eq!(
            normalize_url("HTTPS://WWW.CDC.gov:443/a/b#frag").as_deref(),
            Some("https://www.cdc.gov/a/b")
        );
        assert_eq!(
            normalize_url("http://Example.org").as_deref(),
            Some("http://example.org/")
        );
        assert_eq!(normalize_url("mailto:someone@cdc.gov"), None);
    }

    #[test]
    fn subdomains_are_allowed() {
        let allow: BTreeSet<String> = ["cdc.gov".to_string()].into();
        assert!(is_allowed_domain("https://www.cdc.gov/x", &allow));
        assert!(is_allowed_domain("https://cdc.gov/x", &allow));
        assert!(!is_allowed_domain("https://notcdc.gov/x", &allow));
    }

    #[test]
    fn extracts_and_resolves_links() {
        let html = r##"
            <a href="/guide.pdf">PDF</a>
            <a href="page2#section">Next</a>
            <a href="mailto:x@y.gov">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="#top">Top</a>
        "##;
        let links = extract_links(html, "https://health.gov/dir/index.html");
        assert_eq!(
            links,
            vec![
                "https://health.gov/guide.pdf".to_string(),
                "https://health.gov/dir/page2".to_string(),
            ]
        );
    }

    #[test]
    fn extension_filter_treats_bare_paths_as_html() {
        let types: BTreeSet<String> = [".pdf".to_string(), ".html".to_string()].into();
        assert!(wanted("https://a.gov/report.PDF", &types));
        assert!(wanted("https://a.gov/section/", &types));
        assert!(!wanted("https://a.gov/data.csv", &types));
    }

    #[test]
    fn rejects_config_without_seeds() {
        let def = definition(
            r#"
            [[sources]]
            [sources.connector]
            type = "gov"
            "#,
        );
        assert!(GovConnector::new(&context(&def), &GovConfig::default()).is_err());
    }

    #[tokio::test]
    async fn crawls_breadth_first_within_limits() {
        let mut server = Server::new_async().await;
        let host = server.host_with_port();
        let home = format!(
            r#"<html><head><title>Physical Activity</title></head><body>
               <a href="/guidelines.pdf">Guidelines</a>
               <a href="/about">About</a>
               <a href="/about">About again</a>
               <a href="https://elsewhere.example.com/x">Offsite</a>
               <a href="http://{host}/data.csv">CSV</a>
               </body></html>"#
        );
        let _home = server
            .mock("GET", "/")
            .with_header("content-type", "text/html")
            .with_body(home)
            .expect(1)
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/guidelines.pdf")
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.7 guidelines")
            .expect(1)
            .create_async()
            .await;
        let _about = server
            .mock("GET", "/about")
            .with_header("content-type", "text/html")
            .with_body(r#"<html><body><a href="/deeper">Deeper</a></body></html>"#)
            .expect(1)
            .create_async()
            .await;
        let deeper = server
            .mock("GET", "/deeper")
            .with_body("<html></html>")
            .expect(0)
            .create_async()
            .await;

        let def = definition(
            r#"
            [[sources]]
            rate_per_sec = 0.0
            [sources.connector]
            type = "gov"
            "#,
        );
        let config = GovConfig {
            seeds: vec![server.url()],
            max_depth: 1,
            batch_size: 2,
            assumed_license: Some("Public Domain (U.S. Government Work)".to_string()),
            ..GovConfig::default()
        };
        let connector = GovConnector::new(&context(&def), &config).unwrap();

        let mut cursor = connector.initial_cursor(CRAWL_QUERY);
        let mut all = Vec::new();
        let mut pages = 0;
        loop {
            let page = connector.fetch_page(CRAWL_QUERY, &cursor).await.unwrap();
            pages += 1;
            all.extend(page.candidates);
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        assert_eq!(pages, 2);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "Physical Activity");
        assert_eq!(all[0].payload.kind, PayloadKind::Html);
        assert_eq!(all[1].payload.kind, PayloadKind::Pdf);
        assert!(all[1].prefetched.as_ref().unwrap().bytes.starts_with(b"%PDF"));
        assert!(all.iter().all(|c| c.payload_url.is_some()));
        assert!(
            all.iter()
                .all(|c| c.license_normalized.as_deref() == Some("public-domain"))
        );
        deeper.assert_async().await;
    }

    #[tokio::test]
    async fn per_domain_quota_stops_saving() {
        let mut server = Server::new_async().await;
        let _home = server
            .mock("GET", "/")
            .with_header("content-type", "text/html")
            .with_body(r#"<html><a href="/a.pdf">a</a><a href="/b.pdf">b</a></html>"#)
            .create_async()
            .await;
        let pdfs = server
            .mock("GET", mockito::Matcher::Regex(r"^/[ab]\.pdf$".to_string()))
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4")
            .expect(1)
            .create_async()
            .await;

        let def = definition(
            r#"
            [[sources]]
            rate_per_sec = 0.0
            [sources.connector]
            type = "gov"
            "#,
        );
        let config = GovConfig {
            seeds: vec![server.url()],
            max_per_domain: 2,
            ..GovConfig::default()
        };
        let connector = GovConnector::new(&context(&def), &config).unwrap();
        let page = connector
            .fetch_page(CRAWL_QUERY, &connector.initial_cursor(CRAWL_QUERY))
            .await
            .unwrap();
        assert_eq!(page.candidates.len(), 2);
        assert!(page.next.is_none());
        pdfs.assert_async().await;
    }
}
