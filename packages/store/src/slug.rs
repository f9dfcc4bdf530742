//! Filesystem-safe names derived from source identifiers.

use sha2::{Digest as _, Sha256};

/// Longest slug produced by [`slugify`].
pub const MAX_SLUG_LEN: usize = 120;

/// Used when neither the identifier nor the title yields a slug.
pub const FALLBACK_SLUG: &str = "na";

const HASH_SUFFIX_LEN: usize = 8;

/// Turns an identifier into a single safe path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, runs of `_` collapse,
/// and leading/trailing `_`, `.` and `-` are trimmed, so the result can
/// never be `.` or `..`. Slugs longer than [`MAX_SLUG_LEN`] are cut and
/// suffixed with a short hash of the full input.
#[must_use]
pub fn slugify(raw: &str) -> String {
    let clean = sanitize(raw);
    if clean.len() <= MAX_SLUG_LEN {
        clean
    } else {
        hashed(&clean, raw)
    }
}

/// Like [`slugify`], but suffixes the hash whenever the slug is not `raw`
/// verbatim. Sanitizing is lossy (`a/b` and `a_b` both become `a_b`), so
/// this is the form used for directory keys.
#[must_use]
pub fn unique_slug(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let clean = sanitize(raw);
    if clean == raw && clean.len() <= MAX_SLUG_LEN {
        clean
    } else {
        hashed(&clean, raw)
    }
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_') {
            ch
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches(|c| matches!(c, '_' | '.' | '-')).to_string()
}

/// `<head>-<hash of raw>`, at most [`MAX_SLUG_LEN`] long. An empty head
/// leaves only the hash.
fn hashed(clean: &str, raw: &str) -> String {
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    let suffix = &digest[..HASH_SUFFIX_LEN];
    let keep = MAX_SLUG_LEN - HASH_SUFFIX_LEN - 1;
    // `clean` is ASCII, so any byte index is a char boundary.
    let head = clean[..clean.len().min(keep)].trim_end_matches(|c| matches!(c, '_' | '.' | '-'));
    if head.is_empty() {
        suffix.to_string()
    } else {
        format!("{head}-{suffix}")
    }
}

/// Slug for an artifact directory: the key, else the title, else
/// [`FALLBACK_SLUG`]. Distinct keys always get distinct slugs.
#[must_use]
pub fn item_slug(key: &str, title: &str) -> String {
    let slug = unique_slug(key);
    if !slug.is_empty() {
        return slug;
    }
    let slug = unique_slug(title);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}
