#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harvest data model: candidates, payload outcomes, per-source statistics,
//! and run summaries.
//!
//! Everything in this crate is plain data so it can be shared between the
//! connectors, the on-disk store, and the CLI without pulling in any I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

// ── Sources ──────────────────────────────────────────────────────────────

/// Every source the pipeline knows how to harvest.
///
/// Declaration order is the fixed order in which the pipeline runner visits
/// sources.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    /// `PubMed` Central via NCBI E-utilities.
    Pmc,
    /// arXiv Atom search API.
    Arxiv,
    /// bioRxiv / medRxiv details API.
    Biorxiv,
    /// Crawl of allow-listed government sites.
    Gov,
    /// Crossref discovery followed by Unpaywall lookup.
    Unpaywall,
    /// Directory of Open Access Journals.
    Doaj,
    /// CORE aggregator.
    Core,
    /// Any OAI-PMH repository endpoint.
    OaiPmh,
    /// Zenodo records API.
    Zenodo,
    /// Figshare articles API.
    Figshare,
}

impl SourceKind {
    /// All sources in pipeline order.
    pub const ALL: [Self; 10] = [
        Self::Pmc,
        Self::Arxiv,
        Self::Biorxiv,
        Self::Gov,
        Self::Unpaywall,
        Self::Doaj,
        Self::Core,
        Self::OaiPmh,
        Self::Zenodo,
        Self::Figshare,
    ];
}

// ── Candidates ───────────────────────────────────────────────────────────

/// Expected binary format of a candidate's payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadKind {
    /// A PDF document.
    #[default]
    Pdf,
    /// An HTML page.
    Html,
    /// Any file; no format validation is applied.
    Any,
}

/// How a candidate's payload should be fetched and named on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    /// Expected format.
    pub kind: PayloadKind,
    /// File name inside the artifact directory (e.g. `paper.pdf`).
    pub file_name: String,
    /// Whether an HTML landing page may be scanned for a link to the real
    /// document.
    #[serde(default)]
    pub follow_landing: bool,
}

impl PayloadSpec {
    /// A `paper.pdf` payload.
    #[must_use]
    pub fn pdf() -> Self {
        Self {
            kind: PayloadKind::Pdf,
            file_name: "paper.pdf".to_string(),
            follow_landing: false,
        }
    }

    /// A `page.html` payload.
    #[must_use]
    pub fn html() -> Self {
        Self {
            kind: PayloadKind::Html,
            file_name: "page.html".to_string(),
            follow_landing: false,
        }
    }

    /// An unvalidated payload stored under the given file name.
    #[must_use]
    pub fn any(file_name: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Any,
            file_name: file_name.into(),
            follow_landing: false,
        }
    }

    /// Allows following HTML landing pages to the real document.
    #[must_use]
    pub const fn following_landing(mut self) -> Self {
        self.follow_landing = true;
        self
    }
}

impl Default for PayloadSpec {
    fn default() -> Self {
        Self::pdf()
    }
}

/// Payload bytes a connector already holds (e.g. a crawled HTML page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefetched {
    /// Raw body.
    pub bytes: Vec<u8>,
    /// Declared content type, if any.
    pub content_type: Option<String>,
}

/// An extra file stored next to the payload (e.g. JATS XML).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name inside the artifact directory.
    pub file_name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// A discovered item from a source, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Which source produced this candidate.
    pub source: SourceKind,
    /// Source-native identifier (DOI, arXiv id, OAI identifier, URL...).
    pub external_id: String,
    /// Title, possibly empty.
    pub title: String,
    /// License string as reported by the source.
    pub license_raw: Option<String>,
    /// Canonical license tag, when the raw string was recognized.
    pub license_normalized: Option<String>,
    /// Additional raw license strings (e.g. several `dc:rights`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_licenses: Vec<String>,
    /// Primary payload location.
    pub payload_url: Option<String>,
    /// Alternate payload locations tried in order after `payload_url`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_urls: Vec<String>,
    /// How the payload is validated and named.
    #[serde(default)]
    pub payload: PayloadSpec,
    /// Query (or endpoint/server) that surfaced this candidate.
    #[serde(default)]
    pub query: Option<String>,
    /// Source-specific normalized fields (authors, DOI, dates...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Raw source record.
    #[serde(default)]
    pub raw: serde_json::Value,
    /// Payload already fetched by the connector.
    #[serde(skip)]
    pub prefetched: Option<Prefetched>,
    /// Extra files subject to the same license decision as the payload.
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
}

impl Candidate {
    /// Creates a candidate with only its identity filled in.
    #[must_use]
    pub fn new(source: SourceKind, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            title: title.into(),
            license_raw: None,
            license_normalized: None,
            alt_licenses: Vec::new(),
            payload_url: None,
            fallback_urls: Vec::new(),
            payload: PayloadSpec::default(),
            query: None,
            metadata: serde_json::Map::new(),
            raw: serde_json::Value::Null,
            prefetched: None,
            attachments: Vec::new(),
        }
    }

    /// Key used to place the candidate on disk: the external id, falling
    /// back to the DOI and then the title.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        if !self.external_id.trim().is_empty() {
            return self.external_id.trim();
        }
        if let Some(doi) = self.metadata.get("doi").and_then(serde_json::Value::as_str)
            && !doi.trim().is_empty()
        {
            return doi.trim();
        }
        self.title.trim()
    }

    /// Whether there is anything to download or persist as a payload.
    #[must_use]
    pub const fn has_payload(&self) -> bool {
        self.payload_url.is_some() || self.prefetched.is_some()
    }

    /// All raw license strings, primary first.
    pub fn raw_licenses(&self) -> impl Iterator<Item = &str> {
        self.license_raw
            .iter()
            .chain(self.alt_licenses.iter())
            .map(String::as_str)
    }

    /// Inserts a metadata field, skipping `null`s and empty strings.
    pub fn set_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        let value = value.into();
        let empty = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.trim().is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            _ => false,
        };
        if !empty {
            self.metadata.insert(key.to_string(), value);
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────

/// What happened to a candidate's payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadStatus {
    /// Payload fetched, validated, and stored.
    Downloaded,
    /// License gate denied the payload; metadata only.
    LicenseDenied,
    /// No recognized license under an active whitelist, and the source is
    /// configured to keep such items as metadata only.
    MetadataOnly,
    /// Download failed after retries or with a non-404 error.
    FetchFailed,
    /// The payload URL answered 404.
    NotFound,
    /// The response was not the expected format.
    InvalidFormat,
    /// The candidate had no payload location, or downloads are disabled.
    NoPayload,
}

impl PayloadStatus {
    /// Whether a later run should retry this candidate.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::FetchFailed)
    }
}

/// Sidecar written next to a payload, whether or not it was downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRecord {
    /// Outcome.
    pub status: PayloadStatus,
    /// URL the payload was (or would have been) fetched from.
    pub url: Option<String>,
    /// Final URL after redirects and landing-page hops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    /// Raw license string.
    pub license: Option<String>,
    /// Canonical license tag.
    pub license_normalized: Option<String>,
    /// Declared content type of the stored body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Stored size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Hex SHA-256 of the stored body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Error description for failed fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Payload summary embedded in `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSummary {
    /// Outcome.
    pub status: PayloadStatus,
    /// Payload file name when one was stored.
    pub file: Option<String>,
    /// Attachment file names that were stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// The `metadata.json` document of an artifact directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// The normalized candidate, including its raw source record.
    pub candidate: Candidate,
    /// What happened to its payload.
    pub payload: PayloadSummary,
    /// When the record was finalized.
    pub harvested_at: DateTime<Utc>,
}

// ── Statistics ───────────────────────────────────────────────────────────

/// Counters accumulated while harvesting one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    /// Pages fetched.
    pub pages: u64,
    /// Candidates returned by the connector.
    pub seen: u64,
    /// Records dropped by the connector's keyword filter.
    pub filtered_out: u64,
    /// Candidates already present on disk (or repeated within the run).
    pub skipped_existing: u64,
    /// `metadata.json` files written.
    pub saved_metadata: u64,
    /// Payload files written.
    pub saved_payload: u64,
    /// Payloads denied by the license gate.
    pub license_skipped: u64,
    /// Candidates kept as metadata only because their license is unknown.
    pub metadata_only: u64,
    /// Failed downloads or writes.
    pub failed: u64,
}

impl HarvestStats {
    /// Adds another set of counters into this one.
    pub const fn merge(&mut self, other: &Self) {
        self.pages += other.pages;
        self.seen += other.seen;
        self.filtered_out += other.filtered_out;
        self.skipped_existing += other.skipped_existing;
        self.saved_metadata += other.saved_metadata;
        self.saved_payload += other.saved_payload;
        self.license_skipped += other.license_skipped;
        self.metadata_only += other.metadata_only;
        self.failed += other.failed;
    }

    /// Counts one finished candidate by its payload status.
    pub const fn record(&mut self, status: PayloadStatus) {
        match status {
            PayloadStatus::Downloaded => self.saved_payload += 1,
            PayloadStatus::LicenseDenied => self.license_skipped += 1,
            PayloadStatus::MetadataOnly => self.metadata_only += 1,
            PayloadStatus::FetchFailed | PayloadStatus::InvalidFormat => self.failed += 1,
            PayloadStatus::NotFound | PayloadStatus::NoPayload => {}
        }
    }
}

impl std::fmt::Display for HarvestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} saved={} payloads={} existing={} license_skipped={} metadata_only={} failed={} filtered={}",
            self.seen,
            self.saved_metadata,
            self.saved_payload,
            self.skipped_existing,
            self.license_skipped,
            self.metadata_only,
            self.failed,
            self.filtered_out,
        )
    }
}

// ── Run summary ──────────────────────────────────────────────────────────

/// How a single source fared in a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceStatus {
    /// Harvest completed.
    Ok,
    /// Harvest aborted with an error.
    Error,
    /// Source configured but disabled.
    SkippedDisabled,
    /// Source absent from the configuration.
    SkippedMissing,
}

/// Result of one source within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    /// Which source.
    pub source: SourceKind,
    /// Outcome.
    pub status: SourceStatus,
    /// Counters (zero for skipped sources).
    pub stats: HarvestStats,
    /// Error message for failed sources.
    pub error: Option<String>,
    /// Wall time spent on the source.
    pub elapsed_secs: f64,
}

/// Result of a whole pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// One report per visited source, in pipeline order.
    pub reports: Vec<SourceReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(SourceStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(r.status)).count()
    }

    /// Sources that were actually run.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::Ok | SourceStatus::Error))
    }

    /// Sources that completed.
    #[must_use]
    pub fn ok(&self) -> usize {
        self.count(|s| s == SourceStatus::Ok)
    }

    /// Sources that failed.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.count(|s| s == SourceStatus::Error)
    }

    /// Sources skipped because they were disabled or missing.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::SkippedDisabled | SourceStatus::SkippedMissing))
    }

    /// Whether any source failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors() > 0
    }

    /// Counters summed over every source.
    #[must_use]
    pub fn totals(&self) -> HarvestStats {
        let mut total = HarvestStats::default();
        for report in &self.reports {
            total.merge(&report.stats);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn source_kind_round_trips_snake_case() {
        assert_eq!(SourceKind::OaiPmh.to_string(), "oai_pmh");
        assert_eq!(SourceKind::from_str("oai_pmh").unwrap(), SourceKind::OaiPmh);
        assert_eq!(
            serde_json::to_string(&SourceKind::Biorxiv).unwrap(),
            "\"biorxiv\""
        );
    }

    #[test]
    fn pipeline_order_matches_declaration() {
        let mut sorted = SourceKind::ALL;
        sorted.sort();
        assert_eq!(sorted, SourceKind::ALL);
        assert_eq!(SourceKind::ALL[0], SourceKind::Pmc);
    }

    #[test]
    fn storage_key_falls_back_to_doi_then_title() {
        let mut c = Candidate::new(SourceKind::Doaj, "", "A Title");
        assert_eq!(c.storage_key(), "A Title");
        c.set_meta("doi", "10.1/x");
        assert_eq!(c.storage_key(), "10.1/x");
        c.external_id = "abc".to_string();
        assert_eq!(c.storage_key(), "abc");
    }

    #[test]
    fn set_meta_ignores_empty_values() {
        let mut c = Candidate::new(SourceKind::Arxiv, "1", "t");
        c.set_meta("a", "");
        c.set_meta("b", serde_json::Value::Null);
        c.set_meta("c", Vec::<String>::new());
        c.set_meta("d", "kept");
        assert_eq!(c.metadata.len(), 1);
    }

    #[test]
    fn stats_record_counts_by_status() {
        let mut stats = HarvestStats::default();
        stats.record(PayloadStatus::Downloaded);
        stats.record(PayloadStatus::LicenseDenied);
        stats.record(PayloadStatus::FetchFailed);
        stats.record(PayloadStatus::NotFound);
        assert_eq!(stats.saved_payload, 1);
        assert_eq!(stats.license_skipped, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn run_summary_counts() {
        let report = |source, status| SourceReport {
            source,
            status,
            stats: HarvestStats::default(),
            error: None,
            elapsed_secs: 0.0,
        };
        let summary = RunSummary {
            reports: vec![
                report(SourceKind::Pmc, SourceStatus::Ok),
                report(SourceKind::Arxiv, SourceStatus::Error),
                report(SourceKind::Biorxiv, SourceStatus::SkippedDisabled),
                report(SourceKind::Gov, SourceStatus::SkippedMissing),
            ],
        };
        assert_eq!(summary.attempted(), 2);
        assert_eq!(summary.ok(), 1);
        assert_eq!(summary.errors(), 1);
        assert_eq!(summary.skipped(), 2);
        assert!(summary.has_errors());
    }
}
