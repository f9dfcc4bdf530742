//! License normalization and the whitelist gate.
//!
//! Upstream sources describe licenses every which way: `CC-BY 4.0`,
//! `cc_by_nc_nd`, `https://creativecommons.org/licenses/by-sa/4.0/`,
//! "Creative Commons Attribution License", `cc-zero`, `Public Domain Mark`.
//! [`normalize`] maps all of these onto a small set of canonical tags;
//! anything it does not recognize is `None` ("unknown"), which is distinct
//! from an explicitly disallowed license.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use openstrength_harvest_models::Candidate;
use regex::Regex;
use serde::Deserialize;

/// Every tag [`normalize`] can produce.
pub const CANONICAL_TAGS: &[&str] = &[
    "cc-by",
    "cc-by-sa",
    "cc-by-nc",
    "cc-by-nc-sa",
    "cc-by-nd",
    "cc-by-nc-nd",
    "cc0",
    "public-domain",
];

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_/,;:()\[\]]+").expect("valid regex"));

static CC_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"creativecommons\.org/licenses/([a-z]+(?:-[a-z]+)*)").expect("valid regex")
});

static CC0: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bcc-?0\b|\bcc-?zero\b|publicdomainzero|public-domain-zero|public-domain-dedication|creative-commons-zero",
    )
    .expect("valid regex")
});

static CC_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcc-?by((?:-(?:nc|sa|nd)\b)*)").expect("valid regex")
});

static PUBLIC_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic-?domain\b|\bpdm\b|\bpd\b|\bus-gov|government-work")
        .expect("valid regex")
});

/// Builds `cc-by[-nc][-sa|-nd]` from the modifiers found.
fn cc_tag<'a>(modifiers: impl IntoIterator<Item = &'a str>) -> String {
    let mut nc = false;
    let mut sa = false;
    let mut nd = false;
    for m in modifiers {
        match m {
            "nc" | "noncommercial" | "non-commercial" => nc = true,
            "sa" | "sharealike" | "share-alike" => sa = true,
            "nd" | "noderivs" | "noderivatives" | "no-derivatives" | "no-derivs" => nd = true,
            _ => {}
        }
    }
    let mut tag = String::from("cc-by");
    if nc {
        tag.push_str("-nc");
    }
    if nd {
        tag.push_str("-nd");
    } else if sa {
        tag.push_str("-sa");
    }
    tag
}

/// Maps a raw license string onto a canonical tag, or `None` when the
/// string is not recognized.
#[must_use]
pub fn normalize(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if lower.contains("creativecommons.org") {
        if lower.contains("/publicdomain/zero") {
            return Some("cc0".to_string());
        }
        if lower.contains("/publicdomain/mark") {
            return Some("public-domain".to_string());
        }
        if let Some(caps) = CC_URL.captures(&lower) {
            let mut parts = caps[1].split('-');
            if parts.next() == Some("by") {
                return Some(cc_tag(parts));
            }
        }
    }

    let flat = SEPARATORS.replace_all(&lower, "-");
    let flat = flat.trim_matches('-');

    if CC0.is_match(flat) {
        return Some("cc0".to_string());
    }

    if let Some(caps) = CC_CODE.captures(flat) {
        return Some(cc_tag(caps[1].split('-').filter(|s| !s.is_empty())));
    }

    if (flat.contains("creative-commons") || flat.contains("creativecommons"))
        && flat.contains("attribution")
    {
        let after = flat.split_once("attribution").map_or("", |(_, rest)| rest);
        let words: Vec<&str> = after.split('-').filter(|s| !s.is_empty()).collect();
        let mut mods: Vec<&str> = words.clone();
        // "non-commercial", "share-alike", "no-derivatives" span two words.
        for pair in words.windows(2) {
            match pair {
                ["non", "commercial"] => mods.push("nc"),
                ["share", "alike"] => mods.push("sa"),
                ["no", d] if d.starts_with("deriv") => mods.push("nd"),
                _ => {}
            }
        }
        return Some(cc_tag(mods));
    }

    if PUBLIC_DOMAIN.is_match(flat) {
        return Some("public-domain".to_string());
    }

    None
}

/// Lower-cased, normalized whitelist set.
fn normalized_set<'a>(entries: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    entries
        .into_iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| normalize(&e).unwrap_or(e))
        .collect()
}

/// Whether any of `tags` is on the whitelist. A `None` or empty whitelist
/// allows everything; `None` tags (unknown licenses) never match an active
/// one.
#[must_use]
pub fn is_allowed<'a>(
    tags: impl IntoIterator<Item = Option<&'a str>>,
    whitelist: Option<&[String]>,
) -> bool {
    let allow = normalized_set(whitelist.into_iter().flatten());
    if allow.is_empty() {
        return true;
    }
    tags.into_iter()
        .flatten()
        .any(|tag| allow.contains(&tag.to_lowercase()))
}

/// What to do with candidates whose license is unrecognized while a
/// whitelist is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLicensePolicy {
    /// Treat like a disallowed license.
    #[default]
    Deny,
    /// Keep the metadata, skip the payload, and record it as metadata-only.
    MetadataOnly,
}

/// Outcome of the gate for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseDecision {
    /// Payload may be fetched.
    Allowed,
    /// Payload must not be fetched.
    Denied,
    /// License unknown; keep metadata only.
    MetadataOnly,
}

/// Per-source license gate: the source whitelist merged with the global
/// allow-list.
#[derive(Debug, Clone, Default)]
pub struct LicenseGate {
    whitelist: Option<Vec<String>>,
    unknown: UnknownLicensePolicy,
}

impl LicenseGate {
    /// Builds a gate. With neither list configured (or both empty) the gate
    /// is disabled and allows everything.
    #[must_use]
    pub fn new(
        source_whitelist: Option<&[String]>,
        global_allow: Option<&[String]>,
        unknown: UnknownLicensePolicy,
    ) -> Self {
        let merged: Vec<String> = source_whitelist
            .into_iter()
            .flatten()
            .chain(global_allow.into_iter().flatten())
            .cloned()
            .collect();
        let whitelist = (!normalized_set(&merged).is_empty()).then_some(merged);
        Self { whitelist, unknown }
    }

    /// Whether a whitelist is in force.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.whitelist.is_some()
    }

    /// Decides whether `candidate`'s payload may be fetched.
    #[must_use]
    pub fn decide(&self, candidate: &Candidate) -> LicenseDecision {
        let tags: Vec<String> = candidate
            .license_normalized
            .iter()
            .cloned()
            .chain(candidate.raw_licenses().filter_map(normalize))
            .collect();

        if is_allowed(tags.iter().map(|t| Some(t.as_str())), self.whitelist.as_deref()) {
            LicenseDecision::Allowed
        } else if tags.is_empty() && self.unknown == UnknownLicensePolicy::MetadataOnly {
            LicenseDecision::MetadataOnly
        } else {
            LicenseDecision::Denied
        }
    }
}

/// Sets `license_raw` and `license_normalized` from the first recognizable
/// entry of `raws`, keeping the rest as alternates.
pub fn apply_licenses(candidate: &mut Candidate, raws: Vec<String>) {
    let mut raws: Vec<String> = raws
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    raws.dedup();
    if raws.is_empty() {
        return;
    }
    let primary = raws.iter().position(|r| normalize(r).is_some()).unwrap_or(0);
    let first = raws.remove(primary);
    candidate.license_normalized = normalize(&first);
    candidate.license_raw = Some(first);
    candidate.alt_licenses = raws;
}

#[cfg(test)]
mod tests {
    use openstrength_harvest_models::SourceKind;

    use super::*;

    fn n(s: &str) -> Option<String> {
        normalize(s)
    }

    #[test]
    fn versioned_cc_by_forms_collapse() {
        assert_eq!(n("CC-BY 4.0").as_deref(), Some("cc-by"));
        assert_eq!(n("https://creativecommons.org/licenses/by/4.0/").as_deref(), Some("cc-by"));
        assert_eq!(n("cc-by-4.0").as_deref(), Some("cc-by"));
        assert_eq!(n("cc_by").as_deref(), Some("cc-by"));
        assert_eq!(n("CC BY").as_deref(), Some("cc-by"));
    }

    #[test]
    fn more_specific_variants_win() {
        assert_eq!(n("cc-by-sa").as_deref(), Some("cc-by-sa"));
        assert_eq!(n("CC BY-NC-SA 4.0").as_deref(), Some("cc-by-nc-sa"));
        assert_eq!(n("cc_by_nc_nd").as_deref(), Some("cc-by-nc-nd"));
        assert_eq!(
            n("http://creativecommons.org/licenses/by-nc-nd/3.0/igo/").as_deref(),
            Some("cc-by-nc-nd")
        );
    }

    #[test]
    fn long_names() {
        assert_eq!(
            n("Creative Commons Attribution License").as_deref(),
            Some("cc-by")
        );
        assert_eq!(
            n("Creative Commons Attribution-NonCommercial 4.0 International").as_deref(),
            Some("cc-by-nc")
        );
        assert_eq!(
            n("Creative Commons Attribution Share Alike 4.0").as_deref(),
            Some("cc-by-sa")
        );
    }

    #[test]
    fn public_domain_family() {
        assert_eq!(n("CC0").as_deref(), Some("cc0"));
        assert_eq!(n("cc-zero").as_deref(), Some("cc0"));
        assert_eq!(n("CC0-1.0").as_deref(), Some("cc0"));
        assert_eq!(
            n("https://creativecommons.org/publicdomain/zero/1.0/").as_deref(),
            Some("cc0")
        );
        assert_eq!(n("Public Domain Mark 1.0").as_deref(), Some("public-domain"));
        assert_eq!(n("US-Gov work").as_deref(), Some("public-domain"));
    }

    #[test]
    fn unknown_licenses_are_none() {
        assert_eq!(n(""), None);
        assert_eq!(n("All rights reserved"), None);
        assert_eq!(n("cc_no"), None);
        assert_eq!(n("implied-oa"), None);
        assert_eq!(n("publisher-specific-oa"), None);
    }

    #[test]
    fn whitelist_semantics() {
        let wl = vec!["CC-BY".to_string(), "cc0".to_string()];
        assert!(is_allowed([Some("cc-by")], None));
        assert!(is_allowed([None], None));
        assert!(is_allowed([Some("cc-by")], Some(wl.as_slice())));
        assert!(!is_allowed([Some("cc-by-sa")], Some(wl.as_slice())));
        assert!(!is_allowed([None], Some(wl.as_slice())));
        assert!(is_allowed([None, Some("cc0")], Some(wl.as_slice())));
    }

    #[test]
    fn empty_whitelist_allows_everything() {
        let empty: Vec<String> = Vec::new();
        assert!(is_allowed([Some("cc0")], Some(empty.as_slice())));
        assert!(is_allowed([None], Some(empty.as_slice())));

        let blank = vec!["  ".to_string()];
        assert!(is_allowed([Some("cc-by-nd")], Some(blank.as_slice())));

        let gate = LicenseGate::new(Some(empty.as_slice()), None, UnknownLicensePolicy::Deny);
        assert!(!gate.is_active());
        assert_eq!(gate.decide(&candidate(Some("All rights reserved"))), LicenseDecision::Allowed);
    }

    fn candidate(license: Option<&str>) -> Candidate {
        let mut c = Candidate::new(SourceKind::Doaj, "x", "t");
        apply_licenses(&mut c, license.into_iter().map(String::from).collect());
        c
    }

    #[test]
    fn gate_disabled_without_lists() {
        let gate = LicenseGate::new(None, None, UnknownLicensePolicy::Deny);
        assert!(!gate.is_active());
        assert_eq!(gate.decide(&candidate(None)), LicenseDecision::Allowed);
    }

    #[test]
    fn gate_merges_global_allow_list() {
        let source = vec!["cc-by".to_string()];
        let global = vec!["cc0".to_string()];
        let gate = LicenseGate::new(Some(source.as_slice()), Some(global.as_slice()), UnknownLicensePolicy::Deny);
        assert_eq!(gate.decide(&candidate(Some("CC0 1.0"))), LicenseDecision::Allowed);
        assert_eq!(gate.decide(&candidate(Some("CC BY 4.0"))), LicenseDecision::Allowed);
        assert_eq!(gate.decide(&candidate(Some("CC BY-SA"))), LicenseDecision::Denied);
        assert_eq!(gate.decide(&candidate(None)), LicenseDecision::Denied);
    }

    #[test]
    fn unknown_policy_only_affects_unrecognized_licenses() {
        let wl = vec!["cc-by".to_string()];
        let gate = LicenseGate::new(Some(wl.as_slice()), None, UnknownLicensePolicy::MetadataOnly);
        assert_eq!(gate.decide(&candidate(None)), LicenseDecision::MetadataOnly);
        assert_eq!(
            gate.decide(&candidate(Some("All rights reserved"))),
            LicenseDecision::MetadataOnly
        );
        assert_eq!(gate.decide(&candidate(Some("cc-by-nd"))), LicenseDecision::Denied);
    }

    #[test]
    fn apply_licenses_prefers_recognized_entry() {
        let mut c = Candidate::new(SourceKind::OaiPmh, "x", "t");
        apply_licenses(
            &mut c,
            vec![
                "Open Access".to_string(),
                "http://creativecommons.org/licenses/by/4.0/".to_string(),
            ],
        );
        assert_eq!(c.license_normalized.as_deref(), Some("cc-by"));
        assert_eq!(c.alt_licenses, vec!["Open Access".to_string()]);
    }
}
