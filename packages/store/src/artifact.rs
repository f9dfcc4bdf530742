//! On-disk layout of harvested items.
//!
//! ```text
//! <raw_root>/<source>/<item slug>/
//!     metadata.json               normalized candidate + raw record, written last
//!     paper.pdf                   payload (name varies per source)
//!     paper.pdf.metadata.json     payload sidecar (status, license, digest)
//!     PMC123.xml                  attachments, if any
//! ```
//!
//! `metadata.json` doubles as the completion marker: an item is considered
//! harvested once it exists, unless it records a retryable payload failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use openstrength_harvest_models::{ArtifactRecord, Candidate, PayloadRecord, PayloadStatus};

use crate::{StoreError, atomic, slug};

/// Name of the per-item metadata document.
pub const METADATA_FILE: &str = "metadata.json";

/// Suffix appended to a payload file name to form its sidecar.
pub const SIDECAR_SUFFIX: &str = ".metadata.json";

/// Directory holding one harvested item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    /// Directory for `candidate` under `raw_root`, keyed by source and id.
    #[must_use]
    pub fn for_candidate(raw_root: &Path, candidate: &Candidate) -> Self {
        Self {
            root: raw_root
                .join(candidate.source.as_ref())
                .join(slug::item_slug(candidate.storage_key(), &candidate.title)),
        }
    }

    /// Wraps an existing directory.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `metadata.json` path.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Path of a payload or attachment file.
    #[must_use]
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.root.join(safe_file_name(file_name))
    }

    /// Sidecar path for a payload file.
    #[must_use]
    pub fn sidecar_path(&self, file_name: &str) -> PathBuf {
        self.root
            .join(format!("{}{SIDECAR_SUFFIX}", safe_file_name(file_name)))
    }

    /// Reads `metadata.json`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file exists but cannot be read or
    /// parsed.
    pub fn read_record(&self) -> Result<Option<ArtifactRecord>, StoreError> {
        let path = self.metadata_path();
        if !atomic::exists(&path) {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Whether this item needs no further work.
    ///
    /// False when `metadata.json` is missing, unreadable, or records a
    /// retryable payload failure.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.read_record() {
            Ok(Some(record)) => !record.payload.status.is_retryable(),
            Ok(None) => false,
            Err(e) => {
                log::warn!("{}: unreadable record, re-harvesting: {e}", self.root.display());
                false
            }
        }
    }

    /// Atomically writes a payload or attachment file and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on write failure.
    pub fn write_file(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.file_path(file_name);
        atomic::write_bytes(&path, bytes)?;
        Ok(path)
    }

    /// Atomically writes a payload sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or write failure.
    pub fn write_sidecar(&self, file_name: &str, record: &PayloadRecord) -> Result<(), StoreError> {
        atomic::write_json(&self.sidecar_path(file_name), record)
    }

    /// Atomically writes `metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or write failure.
    pub fn write_record(&self, record: &ArtifactRecord) -> Result<(), StoreError> {
        atomic::write_json(&self.metadata_path(), record)
    }
}

/// Keeps source-supplied file names inside the artifact directory.
fn safe_file_name(file_name: &str) -> String {
    let slug = slug::slugify(file_name);
    if slug.is_empty() {
        "payload".to_string()
    } else {
        slug
    }
}

// ── Inventory ────────────────────────────────────────────────────────────

/// Per-source counts of recorded payload statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// `source dir name -> status -> count`.
    pub by_source: BTreeMap<String, BTreeMap<PayloadStatus, u64>>,
    /// Item directories without a `metadata.json` (interrupted items).
    pub incomplete: u64,
    /// `metadata.json` files that failed to parse.
    pub unreadable: u64,
}

impl Inventory {
    /// Total recorded items.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_source.values().flat_map(BTreeMap::values).sum()
    }
}

/// Walks `<raw_root>/<source>/<item>` and tallies recorded outcomes.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if a directory cannot be listed. A missing
/// `raw_root` yields an empty inventory.
pub fn inventory(raw_root: &Path) -> Result<Inventory, StoreError> {
    let mut inv = Inventory::default();
    if !raw_root.is_dir() {
        return Ok(inv);
    }

    for source in sorted_dirs(raw_root)? {
        let Some(source_name) = source.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        for item in sorted_dirs(&source)? {
            match ArtifactDir::new(item).read_record() {
                Ok(Some(record)) => {
                    *inv.by_source
                        .entry(source_name.clone())
                        .or_default()
                        .entry(record.payload.status)
                        .or_default() += 1;
                }
                Ok(None) => inv.incomplete += 1,
                Err(_) => inv.unreadable += 1,
            }
        }
    }

    Ok(inv)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use openstrength_harvest_models::{PayloadSummary, SourceKind};

    use super::*;

    fn record(candidate: Candidate, status: PayloadStatus) -> ArtifactRecord {
        ArtifactRecord {
            candidate,
            payload: PayloadSummary {
                status,
                file: None,
                attachments: Vec::new(),
            },
            harvested_at: Utc::now(),
        }
    }

    #[test]
    fn layout_is_keyed_by_source_and_id() {
        let candidate = Candidate::new(SourceKind::Biorxiv, "10.1101/2024.01.01.000001", "t");
        let dir = ArtifactDir::for_candidate(Path::new("/data/raw"), &candidate);
        assert_eq!(dir.path().parent(), Some(Path::new("/data/raw/biorxiv")));
        let name = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("10.1101_2024.01.01.000001-"));
        assert_eq!(
            dir.sidecar_path("paper.pdf"),
            dir.path().join("paper.pdf.metadata.json")
        );

        let plain = Candidate::new(SourceKind::Zenodo, "123", "t");
        assert_eq!(
            ArtifactDir::for_candidate(Path::new("/data/raw"), &plain).path(),
            Path::new("/data/raw/zenodo/123")
        );
    }

    #[test]
    fn ids_differing_only_in_separators_get_their_own_dirs() {
        let a = Candidate::new(SourceKind::Doaj, "a/b", "t");
        let b = Candidate::new(SourceKind::Doaj, "a_b", "t");
        assert_ne!(
            ArtifactDir::for_candidate(Path::new("/r"), &a),
            ArtifactDir::for_candidate(Path::new("/r"), &b)
        );
    }

    #[test]
    fn file_names_cannot_escape() {
        let dir = ArtifactDir::new(PathBuf::from("/r/x"));
        assert_eq!(dir.file_path("../../evil.sh"), Path::new("/r/x/evil.sh"));
        assert_eq!(dir.file_path(""), Path::new("/r/x/payload"));
    }

    #[test]
    fn completeness_follows_recorded_status() {
        let tmp = tempfile::tempdir().unwrap();
        let candidate = Candidate::new(SourceKind::Zenodo, "123", "t");
        let dir = ArtifactDir::for_candidate(tmp.path(), &candidate);
        assert!(!dir.is_complete());

        dir.write_record(&record(candidate.clone(), PayloadStatus::FetchFailed))
            .unwrap();
        assert!(!dir.is_complete());

        dir.write_record(&record(candidate, PayloadStatus::LicenseDenied))
            .unwrap();
        assert!(dir.is_complete());
    }

    #[test]
    fn record_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut candidate = Candidate::new(SourceKind::Arxiv, "2401.00001", "Paper");
        candidate.set_meta("authors", vec!["A", "B"]);
        let dir = ArtifactDir::for_candidate(tmp.path(), &candidate);
        dir.write_record(&record(candidate.clone(), PayloadStatus::Downloaded))
            .unwrap();

        let back = dir.read_record().unwrap().unwrap();
        assert_eq!(back.candidate.external_id, "2401.00001");
        assert_eq!(back.candidate.metadata["authors"][1], "B");
        assert_eq!(back.payload.status, PayloadStatus::Downloaded);
    }

    #[test]
    fn inventory_tallies_statuses() {
        let tmp = tempfile::tempdir().unwrap();
        for (id, status) in [
            ("1", PayloadStatus::Downloaded),
            ("2", PayloadStatus::Downloaded),
            ("3", PayloadStatus::LicenseDenied),
        ] {
            let candidate = Candidate::new(SourceKind::Doaj, id, "t");
            ArtifactDir::for_candidate(tmp.path(), &candidate)
                .write_record(&record(candidate, status))
                .unwrap();
        }
        fs::create_dir_all(tmp.path().join("doaj/interrupted")).unwrap();

        let inv = inventory(tmp.path()).unwrap();
        assert_eq!(inv.by_source["doaj"][&PayloadStatus::Downloaded], 2);
        assert_eq!(inv.by_source["doaj"][&PayloadStatus::LicenseDenied], 1);
        assert_eq!(inv.incomplete, 1);
        assert_eq!(inv.total(), 3);
    }

    #[test]
    fn inventory_of_missing_root_is_empty() {
        let inv = inventory(Path::new("/definitely/not/here")).unwrap();
        assert_eq!(inv.total(), 0);
    }
}
