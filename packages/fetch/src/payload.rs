//! Payload format validation and landing-page link discovery.
//!
//! Repositories frequently answer a "PDF" link with an HTML landing page,
//! a login wall, or a JSON error. A body is accepted as the expected
//! format when its declared content type matches, when its magic bytes
//! match, or when the URL carries the expected extension and the server
//! did not declare a conflicting type.

use openstrength_harvest_models::PayloadKind;
use scraper::{Html, Selector};

const PDF_CONTENT_TYPES: &[&str] = &["application/pdf", "application/x-pdf", "application/acrobat"];
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// How far into the body to look for magic bytes.
const SNIFF_WINDOW: usize = 1024;

/// Maximum number of landing-page links returned by [`landing_links`].
pub const MAX_LANDING_LINKS: usize = 5;

/// Lower-cased media type without parameters.
fn media_type(content_type: Option<&str>) -> Option<String> {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty())
}

/// Whether the declared content type is the expected one.
#[must_use]
pub fn content_type_matches(kind: PayloadKind, content_type: Option<&str>) -> bool {
    let Some(media) = media_type(content_type) else {
        return false;
    };
    match kind {
        PayloadKind::Pdf => PDF_CONTENT_TYPES.contains(&media.as_str()),
        PayloadKind::Html => HTML_CONTENT_TYPES.contains(&media.as_str()),
        PayloadKind::Any => true,
    }
}

/// Whether the body starts with the format's signature.
#[must_use]
pub fn magic_matches(kind: PayloadKind, body: &[u8]) -> bool {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    match kind {
        PayloadKind::Pdf => window.windows(5).any(|w| w == b"%PDF-"),
        PayloadKind::Html => looks_like_html(window),
        PayloadKind::Any => !body.is_empty(),
    }
}

/// Whether the URL path ends with the format's extension.
#[must_use]
pub fn extension_matches(kind: PayloadKind, url: &str) -> bool {
    let path = url::Url::parse(url).map_or_else(
        |_| url.split(['?', '#']).next().unwrap_or_default().to_string(),
        |u| u.path().to_string(),
    );
    let path = path.to_ascii_lowercase();
    match kind {
        PayloadKind::Pdf => path.ends_with(".pdf"),
        PayloadKind::Html => path.ends_with(".html") || path.ends_with(".htm"),
        PayloadKind::Any => true,
    }
}

/// Whether the declared content type contradicts the expected format.
fn declared_conflict(kind: PayloadKind, content_type: Option<&str>) -> bool {
    let Some(media) = media_type(content_type) else {
        return false;
    };
    match kind {
        PayloadKind::Pdf => {
            HTML_CONTENT_TYPES.contains(&media.as_str())
                || media.starts_with("text/")
                || media.contains("json")
                || media.contains("xml")
        }
        PayloadKind::Html => PDF_CONTENT_TYPES.contains(&media.as_str()),
        PayloadKind::Any => false,
    }
}

/// Decides whether a fetched body is an acceptable payload of `kind`.
#[must_use]
pub fn is_valid(kind: PayloadKind, content_type: Option<&str>, url: &str, body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    if kind == PayloadKind::Any {
        return true;
    }
    content_type_matches(kind, content_type)
        || magic_matches(kind, body)
        || (extension_matches(kind, url) && !declared_conflict(kind, content_type))
}

/// Cheap HTML sniff over the start of a body.
#[must_use]
pub fn looks_like_html(body: &[u8]) -> bool {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window).to_ascii_lowercase();
    let trimmed = text.trim_start();
    trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html") || text.contains("<html")
}

/// Extracts likely document links from an HTML landing page, best first.
///
/// `citation_pdf_url` meta tags win, then anchors ending in `.pdf`, then
/// anchors whose path mentions `/pdf`, `bitstream`, or `download`.
/// Relative links are resolved against `base_url`.
#[must_use]
pub fn landing_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut ranked: Vec<(u8, String)> = Vec::new();

    if let Ok(meta) = Selector::parse(r#"meta[name="citation_pdf_url"]"#) {
        for el in document.select(&meta) {
            if let Some(content) = el.value().attr("content")
                && let Ok(url) = base.join(content.trim())
            {
                ranked.push((0, url.to_string()));
            }
        }
    }

    if let Ok(anchors) = Selector::parse("a[href]") {
        for el in document.select(&anchors) {
            let Some(href) = el.value().attr("href").map(str::trim) else {
                continue;
            };
            let lower = href.to_ascii_lowercase();
            if lower.starts_with("mailto:") || lower.starts_with("javascript:") || lower.starts_with('#') {
                continue;
            }
            let Ok(mut url) = base.join(href) else {
                continue;
            };
            url.set_fragment(None);
            let path = url.path().to_ascii_lowercase();
            let rank = if path.ends_with(".pdf") {
                1
            } else if path.contains("/pdf") || path.contains("bitstream") || path.contains("download") {
                2
            } else {
                continue;
            };
            ranked.push((rank, url.to_string()));
        }
    }

    ranked.sort_by_key(|(rank, _)| *rank);

    let mut links: Vec<String> = Vec::new();
    for (_, url) in ranked {
        if url != base_url && !links.contains(&url) {
            links.push(url);
        }
        if links.len() == MAX_LANDING_LINKS {
            break;
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_by_content_type() {
        assert!(is_valid(
            PayloadKind::Pdf,
            Some("application/pdf; charset=binary"),
            "https://x.org/download?id=1",
            b"whatever",
        ));
    }

    #[test]
    fn accepts_pdf_magic_with_generic_content_type() {
        assert!(is_valid(
            PayloadKind::Pdf,
            Some("application/octet-stream"),
            "https://x.org/file",
            b"%PDF-1.7\n...",
        ));
    }

    #[test]
    fn accepts_pdf_extension_without_content_type() {
        assert!(is_valid(PayloadKind::Pdf, None, "https://x.org/a/paper.PDF?dl=1", b"data"));
    }

    #[test]
    fn rejects_html_served_at_pdf_url() {
        assert!(!is_valid(
            PayloadKind::Pdf,
            Some("text/html; charset=utf-8"),
            "https://x.org/paper.pdf",
            b"<!DOCTYPE html><html><body>Sign in</body></html>",
        ));
    }

    #[test]
    fn rejects_empty_body() {
        assert!(!is_valid(PayloadKind::Pdf, Some("application/pdf"), "https://x.org/a.pdf", b""));
        assert!(!is_valid(PayloadKind::Any, None, "https://x.org/a", b""));
    }

    #[test]
    fn html_sniffing() {
        assert!(looks_like_html(b"  <!doctype html><html></html>"));
        assert!(magic_matches(PayloadKind::Html, b"<HTML><head>"));
        assert!(!looks_like_html(b"%PDF-1.4"));
    }

    #[test]
    fn landing_links_ranked_and_resolved() {
        let html = r#"
            <html><head>
              <meta name="citation_pdf_url" content="/content/paper.full.pdf">
            </head><body>
              <a href="mailto:someone@example.org">mail</a>
              <a href="/bitstream/handle/1/2/thing">bitstream</a>
              <a href="files/other.pdf#page=2">other</a>
              <a href="/about">about</a>
            </body></html>
        "#;
        let links = landing_links(html, "https://repo.example.org/record/42");
        assert_eq!(
            links,
            vec![
                "https://repo.example.org/content/paper.full.pdf".to_string(),
                "https://repo.example.org/record/files/other.pdf".to_string(),
                "https://repo.example.org/bitstream/handle/1/2/thing".to_string(),
            ]
        );
    }
}
