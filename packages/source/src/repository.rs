//! File lists of general-purpose data repositories (Zenodo, Figshare).

use openstrength_harvest_models::{Candidate, PayloadSpec};
use serde::Serialize;

/// A downloadable file attached to a repository record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryFile {
    /// File name as published.
    pub name: String,
    /// Direct download URL.
    pub url: String,
    /// Size in bytes, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl RepositoryFile {
    fn is_pdf(&self) -> bool {
        self.name.to_lowercase().ends_with(".pdf")
    }
}

/// Makes the first PDF (else the first file) the payload and lists every
/// file under the `files` metadata key.
///
/// A PDF payload is validated as such; any other file is stored as-is
/// under its own name.
pub fn apply_files(candidate: &mut Candidate, files: &[RepositoryFile]) {
    let chosen = files.iter().find(|f| f.is_pdf()).or_else(|| files.first());
    if let Some(file) = chosen {
        candidate.payload_url = Some(file.url.clone());
        candidate.payload = if file.is_pdf() {
            PayloadSpec::pdf()
        } else {
            PayloadSpec::any(file.name.clone())
        };
    }
    if !files.is_empty() {
        candidate.set_meta(
            "files",
            serde_json::to_value(files).unwrap_or_default(),
        );
    }
}
