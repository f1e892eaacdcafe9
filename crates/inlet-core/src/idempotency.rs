//! Idempotency key derivation and URL canonicalization.
//!
//! The canonical key is the identity of a logical content item: the
//! collaborator guarantees at-most-one record per key, and the dedup seen-set
//! keys on it. Derivation is deterministic for any item that carries a URL or
//! a title; items with neither get a unique, non-deduplicating key.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::defaults::{TRACKING_PARAMS, TRACKING_PARAM_PREFIX};

/// Whether a query parameter is a tracking parameter to strip.
fn is_tracking_param(name: &str) -> bool {
    name.starts_with(TRACKING_PARAM_PREFIX) || TRACKING_PARAMS.contains(&name)
}

/// Canonicalize a URL for use as an idempotency key.
///
/// Lowercases the host, strips tracking query parameters, collapses trailing
/// slashes and drops the fragment. Returns `None` for unparsable or
/// non-HTTP(S) input. Canonicalization is idempotent:
/// `canonicalize_url(canonicalize_url(u)) == canonicalize_url(u)`.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    Some(out)
}

/// Lowercased hostname of a URL, used to derive `source_name`.
pub fn hostname(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Derive the idempotency key for an item.
///
/// Preference order: canonical URL, then a 32-hex-char digest of
/// `title|published_at`, then a unique time-plus-random key that never
/// deduplicates.
pub fn derive_key(
    url: Option<&str>,
    title: Option<&str>,
    published_at: Option<DateTime<Utc>>,
) -> String {
    if let Some(canonical) = url.and_then(canonicalize_url) {
        return canonical;
    }

    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        let stamp = published_at.map(|t| t.to_rfc3339()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b"|");
        hasher.update(stamp.as_bytes());
        let digest = hex::encode(hasher.finalize());
        return digest[..32].to_string();
    }

    // UUIDv7 embeds the current time plus random bits.
    format!("anon-{}", Uuid::now_v7())
}
