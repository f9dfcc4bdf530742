//! Client-side keyword filtering for APIs that cannot search server-side.

use openstrength_harvest_models::Candidate;
use serde_json::Value;

/// Metadata fields searched in addition to the title.
const SEARCHED_FIELDS: &[&str] = &[
    "abstract",
    "description",
    "category",
    "categories",
    "subjects",
    "keywords",
];

/// Requires every configured term to appear (case-insensitively) in a
/// candidate's title, abstract, or category fields.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    terms: Vec<String>,
}

impl KeywordFilter {
    /// Builds a filter; blank terms are dropped and surrounding quotes
    /// stripped, so `"\"gene therapy\""` matches the phrase.
    #[must_use]
    pub fn new(terms: &[String]) -> Self {
        Self {
            terms: terms
                .iter()
                .map(|t| t.trim().trim_matches('"').trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Whether no terms are configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether every term occurs in `text`.
    #[must_use]
    pub fn matches_text(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.terms.iter().all(|term| haystack.contains(term.as_str()))
    }

    /// Whether `candidate` passes the filter.
    #[must_use]
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut text = candidate.title.clone();
        for field in SEARCHED_FIELDS {
            if let Some(value) = candidate.metadata.get(*field) {
                push_text(&mut text, value);
            }
        }
        self.matches_text(&text)
    }

    /// Keeps matching candidates and returns how many were dropped.
    pub fn retain(&self, candidates: &mut Vec<Candidate>) -> u64 {
        let before = candidates.len();
        candidates.retain(|c| self.matches(c));
        (before - candidates.len()) as u64
    }
}

fn push_text(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => {
            out.push('\n');
            out.push_str(s);
        }
        Value::Array(items) => items.iter().for_each(|v| push_text(out, v)),
        _ => {}
    }
}
