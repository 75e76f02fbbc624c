//! URL identity and hashing helpers shared by the crawler and ingestion.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, SiteKbError};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Canonical form of a page URL: scheme, host, port, and path with the
/// trailing slash removed. Query and fragment are dropped; an empty path
/// becomes `/`.
pub fn canonicalize(raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|e| SiteKbError::parse(format!("invalid URL {raw}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| SiteKbError::parse(format!("URL has no host: {raw}")))?;

    let mut out = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }
    let path = url.path().trim_end_matches('/');
    out.push_str(if path.is_empty() { "/" } else { path });
    Ok(out)
}

/// SHA-256 hex of the canonical URL.
pub fn url_hash(canonical_url: &str) -> String {
    sha256_hex(canonical_url.as_bytes())
}

/// SHA-256 hex of a markdown body.
pub fn content_hash(body: &str) -> String {
    sha256_hex(body.as_bytes())
}

/// `host[:port]` of a URL, used as the source identity.
pub fn domain_of(raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|e| SiteKbError::parse(format!("invalid URL {raw}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| SiteKbError::parse(format!("URL has no host: {raw}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Non-empty path segments of a URL.
pub fn path_segments(raw: &str) -> Vec<String> {
    Url::parse(raw)
        .map(|url| {
            url.path()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// First configured page-type keyword that appears among the segments.
pub fn page_type_for(segments: &[String], page_types: &[String]) -> Option<String> {
    page_types
        .iter()
        .find(|kind| segments.iter().any(|seg| seg.eq_ignore_ascii_case(kind)))
        .cloned()
}
