//! Per-candidate work: download the payload, then persist everything.
//!
//! Write order inside an artifact directory is payload, attachments,
//! sidecar, and `metadata.json` last, so a directory with a
//! `metadata.json` is always finished.

use chrono::Utc;
use openstrength_fetch::{HttpClient, PayloadFetch, payload};
use openstrength_harvest_models::{
    ArtifactRecord, Candidate, PayloadRecord, PayloadStatus, PayloadSummary,
};
use openstrength_source::license::LicenseDecision;
use openstrength_store::{ArtifactDir, StoreError};
use sha2::{Digest as _, Sha256};

/// A candidate that passed the idempotency check.
#[derive(Debug)]
pub struct Job {
    /// The candidate.
    pub candidate: Candidate,
    /// Where it is stored.
    pub dir: ArtifactDir,
    /// License gate verdict.
    pub decision: LicenseDecision,
    /// Whether the source downloads payloads at all.
    pub download: bool,
}

/// A stored (or storable) payload body.
struct Body {
    bytes: Vec<u8>,
    url: Option<String>,
    final_url: Option<String>,
    content_type: Option<String>,
}

/// Why no payload was obtained.
struct Miss {
    status: PayloadStatus,
    error: Option<String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Uses the connector's prefetched body when it validates, else tries the
/// payload URL and every fallback in order.
///
/// When every attempt fails the worst outcome wins: a transient failure
/// (`fetch_failed`, retried next run) over a wrong format over 404.
async fn obtain(http: &HttpClient, candidate: &Candidate) -> Result<Body, Miss> {
    let spec = &candidate.payload;

    if let Some(pre) = &candidate.prefetched {
        let url = candidate.payload_url.clone().unwrap_or_default();
        if payload::is_valid(spec.kind, pre.content_type.as_deref(), &url, &pre.bytes) {
            return Ok(Body {
                bytes: pre.bytes.clone(),
                url: candidate.payload_url.clone(),
                final_url: None,
                content_type: pre.content_type.clone(),
            });
        }
        log::debug!("[{}] {}: prefetched body is not {}", candidate.source, candidate.external_id, spec.kind);
    }

    let mut miss: Option<Miss> = None;
    let urls = candidate.payload_url.iter().chain(candidate.fallback_urls.iter());
    for url in urls {
        let attempt = match http.fetch_payload(url, spec).await {
            Ok(PayloadFetch::Valid(fetched)) => {
                return Ok(Body {
                    bytes: fetched.body,
                    url: Some(url.clone()),
                    final_url: (fetched.final_url != *url).then_some(fetched.final_url),
                    content_type: fetched.content_type,
                });
            }
            Ok(PayloadFetch::Invalid {
                final_url,
                content_type,
            }) => Miss {
                status: PayloadStatus::InvalidFormat,
                error: Some(format!(
                    "{final_url}: expected {}, got {}",
                    spec.kind,
                    content_type.as_deref().unwrap_or("unknown content type")
                )),
            },
            Err(e) if e.is_not_found() => Miss {
                status: PayloadStatus::NotFound,
                error: Some(e.to_string()),
            },
            Err(e) => Miss {
                status: PayloadStatus::FetchFailed,
                error: Some(e.to_string()),
            },
        };
        log::debug!(
            "[{}] {}: {url}: {}",
            candidate.source,
            candidate.external_id,
            attempt.status
        );
        if miss.as_ref().is_none_or(|m| severity(attempt.status) > severity(m.status)) {
            miss = Some(attempt);
        }
    }

    Err(miss.unwrap_or(Miss {
        status: PayloadStatus::InvalidFormat,
        error: Some("prefetched body failed validation".to_string()),
    }))
}

const fn severity(status: PayloadStatus) -> u8 {
    match status {
        PayloadStatus::FetchFailed => 3,
        PayloadStatus::InvalidFormat => 2,
        PayloadStatus::NotFound => 1,
        _ => 0,
    }
}

fn stored_name(path: &std::path::Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn sidecar(candidate: &Candidate, status: PayloadStatus) -> PayloadRecord {
    PayloadRecord {
        status,
        url: candidate.payload_url.clone(),
        final_url: None,
        license: candidate.license_raw.clone(),
        license_normalized: candidate.license_normalized.clone(),
        content_type: None,
        bytes: None,
        sha256: None,
        error: None,
        recorded_at: Utc::now(),
    }
}

/// Downloads (when allowed) and persists one candidate, returning its
/// payload status.
///
/// # Errors
///
/// Returns [`StoreError`] when a file cannot be written. Download failures
/// are not errors; they are recorded in the returned status.
pub async fn process(http: &HttpClient, job: Job) -> Result<PayloadStatus, StoreError> {
    let Job {
        mut candidate,
        dir,
        decision,
        download,
    } = job;
    let file_name = candidate.payload.file_name.clone();
    let mut record = sidecar(&candidate, PayloadStatus::NoPayload);
    let mut stored_file = None;

    let status = match decision {
        LicenseDecision::Denied => PayloadStatus::LicenseDenied,
        LicenseDecision::MetadataOnly => PayloadStatus::MetadataOnly,
        LicenseDecision::Allowed if !download || !candidate.has_payload() => PayloadStatus::NoPayload,
        LicenseDecision::Allowed => match obtain(http, &candidate).await {
            Ok(body) => {
                let path = dir.write_file(&file_name, &body.bytes)?;
                stored_file = stored_name(&path);
                record.url = body.url;
                record.final_url = body.final_url;
                record.content_type = body.content_type;
                record.bytes = Some(body.bytes.len() as u64);
                record.sha256 = Some(sha256_hex(&body.bytes));
                PayloadStatus::Downloaded
            }
            Err(miss) => {
                record.error = miss.error;
                miss.status
            }
        },
    };

    record.status = status;

    let mut attachments = Vec::new();
    if decision == LicenseDecision::Allowed {
        for attachment in std::mem::take(&mut candidate.attachments) {
            let path = dir.write_file(&attachment.file_name, &attachment.bytes)?;
            attachments.extend(stored_name(&path));
        }
    }

    if candidate.has_payload() {
        dir.write_sidecar(&file_name, &record)?;
    }

    dir.write_record(&ArtifactRecord {
        candidate,
        payload: PayloadSummary {
            status,
            file: stored_file,
            attachments,
        },
        harvested_at: Utc::now(),
    })?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use mockito::Server;
    use openstrength_fetch::HttpConfig;
    use openstrength_harvest_models::{Attachment, PayloadSpec, Prefetched, SourceKind};

    use super::*;

    fn http() -> HttpClient {
        HttpClient::new(&HttpConfig {
            max_attempts: 1,
            ..HttpConfig::default()
        })
        .unwrap()
    }

    fn job(root: &std::path::Path, candidate: Candidate, decision: LicenseDecision) -> Job {
        Job {
            dir: ArtifactDir::for_candidate(root, &candidate),
            candidate,
            decision,
            download: true,
        }
    }

    #[tokio::test]
    async fn falls_back_to_the_next_url() {
        let mut server = Server::new_async().await;
        let _missing = server.mock("GET", "/a.pdf").with_status(404).create_async().await;
        let _ok = server
            .mock("GET", "/b.pdf")
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.7 body")
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::Doaj, "x1", "t");
        c.payload_url = Some(format!("{}/a.pdf", server.url()));
        c.fallback_urls = vec![format!("{}/b.pdf", server.url())];
        let j = job(tmp.path(), c, LicenseDecision::Allowed);
        let dir = j.dir.clone();

        let status = process(&http(), j).await.unwrap();
        assert_eq!(status, PayloadStatus::Downloaded);
        assert_eq!(std::fs::read(dir.file_path("paper.pdf")).unwrap(), b"%PDF-1.7 body");

        let sidecar: PayloadRecord =
            serde_json::from_slice(&std::fs::read(dir.sidecar_path("paper.pdf")).unwrap()).unwrap();
        assert_eq!(sidecar.url.as_deref(), Some(format!("{}/b.pdf", server.url()).as_str()));
        assert_eq!(sidecar.sha256.as_deref(), Some(sha256_hex(b"%PDF-1.7 body").as_str()));
        assert!(dir.is_complete());
    }

    #[tokio::test]
    async fn transient_failure_outranks_not_found() {
        let mut server = Server::new_async().await;
        let _down = server.mock("GET", "/a.pdf").with_status(503).create_async().await;
        let _gone = server.mock("GET", "/b.pdf").with_status(404).create_async().await;

        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::Core, "x2", "t");
        c.payload_url = Some(format!("{}/a.pdf", server.url()));
        c.fallback_urls = vec![format!("{}/b.pdf", server.url())];
        let j = job(tmp.path(), c, LicenseDecision::Allowed);
        let dir = j.dir.clone();

        assert_eq!(process(&http(), j).await.unwrap(), PayloadStatus::FetchFailed);
        assert!(!dir.file_path("paper.pdf").exists());
        assert!(!dir.is_complete());
    }

    #[tokio::test]
    async fn html_served_for_pdf_is_invalid() {
        let mut server = Server::new_async().await;
        let _page = server
            .mock("GET", "/paper.pdf")
            .with_header("content-type", "text/html")
            .with_body("<!DOCTYPE html><html><body>Login</body></html>")
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::OaiPmh, "x3", "t");
        c.payload_url = Some(format!("{}/paper.pdf", server.url()));
        let j = job(tmp.path(), c, LicenseDecision::Allowed);
        assert_eq!(process(&http(), j).await.unwrap(), PayloadStatus::InvalidFormat);
    }

    #[tokio::test]
    async fn denied_candidates_keep_metadata_and_sidecar_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::Pmc, "PMC1", "t");
        c.payload_url = Some("http://127.0.0.1:9/never.pdf".to_string());
        c.attachments.push(Attachment {
            file_name: "PMC1.xml".to_string(),
            bytes: b"<article/>".to_vec(),
        });
        let j = job(tmp.path(), c, LicenseDecision::Denied);
        let dir = j.dir.clone();

        assert_eq!(process(&http(), j).await.unwrap(), PayloadStatus::LicenseDenied);
        assert!(!dir.file_path("PMC1.xml").exists());
        assert!(dir.sidecar_path("paper.pdf").exists());
        let record = dir.read_record().unwrap().unwrap();
        assert_eq!(record.payload.status, PayloadStatus::LicenseDenied);
        assert!(record.payload.file.is_none());
    }

    #[tokio::test]
    async fn stores_prefetched_body_and_attachments() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::Gov, "https://www.cdc.gov/a", "t");
        c.payload = PayloadSpec::html();
        c.payload_url = Some("https://www.cdc.gov/a".to_string());
        c.prefetched = Some(Prefetched {
            bytes: b"<html><body>guidelines</body></html>".to_vec(),
            content_type: Some("text/html; charset=utf-8".to_string()),
        });
        c.attachments.push(Attachment {
            file_name: "extra.txt".to_string(),
            bytes: b"x".to_vec(),
        });
        let j = job(tmp.path(), c, LicenseDecision::Allowed);
        let dir = j.dir.clone();

        assert_eq!(process(&http(), j).await.unwrap(), PayloadStatus::Downloaded);
        assert!(dir.file_path("page.html").exists());
        let record = dir.read_record().unwrap().unwrap();
        assert_eq!(record.payload.file.as_deref(), Some("page.html"));
        assert_eq!(record.payload.attachments, vec!["extra.txt"]);
    }

    #[tokio::test]
    async fn no_payload_when_downloads_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = Candidate::new(SourceKind::Zenodo, "9", "t");
        c.payload_url = Some("http://127.0.0.1:9/never.pdf".to_string());
        let mut j = job(tmp.path(), c, LicenseDecision::Allowed);
        j.download = false;
        assert_eq!(process(&http(), j).await.unwrap(), PayloadStatus::NoPayload);
    }
}
