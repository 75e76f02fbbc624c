//! Markdown page artifacts: one front-matter file per crawled page.
//!
//! Files are the audit trail of a crawl and the input of batch ingestion.
//! The body is stored byte-for-byte so that hashing it again on read gives
//! the same content hash the real-time path computed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use sitekb_markdown::slugify;
use sitekb_shared::{Result, SiteKbError, content_hash, sha256_hex};

const MAX_SLUG_LEN: usize = 80;

/// A page artifact as written to or read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub url: Option<String>,
    pub title: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub body: String,
}

/// File name for a page: a slug of the URL path plus 8 hex chars of its hash.
pub fn artifact_file_name(url: &str) -> String {
    let path_slug = Url::parse(url)
        .map(|u| slugify(u.path()))
        .unwrap_or_else(|_| slugify(url));
    let mut slug = if path_slug.is_empty() {
        "index".to_string()
    } else {
        path_slug
    };
    if let Some((cut, _)) = slug.char_indices().nth(MAX_SLUG_LEN) {
        slug.truncate(cut);
    }
    format!("{slug}-{}.md", &sha256_hex(url.as_bytes())[..8])
}

/// Write a page to `dir` and return the file path. Existing files for the
/// same URL are overwritten.
pub fn write_artifact(dir: &Path, url: &str, title: &str, body: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| SiteKbError::io(dir, e))?;
    let path = dir.join(artifact_file_name(url));
    write_artifact_at(&path, url, title, body)?;
    Ok(path)
}

/// Write a page to an explicit file path, replacing whatever is there.
pub fn write_artifact_at(path: &Path, url: &str, title: &str, body: &str) -> Result<()> {
    let content = format!(
        "---\ntitle: \"{}\"\nurl: {url}\nfetched_at: {}\ncontent_hash: {}\n---\n\n{body}",
        escape_quoted(title),
        Utc::now().to_rfc3339(),
        content_hash(body),
    );

    std::fs::write(path, content).map_err(|e| SiteKbError::io(path, e))?;
    debug!(?path, url, "wrote artifact");
    Ok(())
}

/// Read and parse an artifact file.
pub fn read_artifact(path: &Path) -> Result<Artifact> {
    let raw = std::fs::read_to_string(path).map_err(|e| SiteKbError::io(path, e))?;
    parse_artifact(&raw)
}

/// Parse artifact text. Text without front matter is all body.
pub fn parse_artifact(raw: &str) -> Result<Artifact> {
    let mut artifact = Artifact {
        url: None,
        title: None,
        fetched_at: None,
        content_hash: None,
        body: String::new(),
    };

    let Some(rest) = raw.strip_prefix("---\n") else {
        artifact.body = raw.to_string();
        return Ok(artifact);
    };

    let (front, body) = if let Some(body) = rest.strip_prefix("---\n") {
        ("", body)
    } else {
        let end = rest
            .find("\n---\n")
            .ok_or_else(|| SiteKbError::parse("unterminated front matter"))?;
        (&rest[..end], &rest[end + "\n---\n".len()..])
    };
    artifact.body = body.strip_prefix('\n').unwrap_or(body).to_string();

    for line in front.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "title" => artifact.title = Some(value),
            "url" | "canonical_url" => {
                if artifact.url.is_none() || key.trim() == "url" {
                    artifact.url = Some(value);
                }
            }
            "fetched_at" => {
                artifact.fetched_at = DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "content_hash" => artifact.content_hash = Some(value),
            _ => {}
        }
    }

    Ok(artifact)
}

/// All `*.md` files directly under `dir`, sorted by name.
pub fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| SiteKbError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SiteKbError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
}

fn unquote(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if !quoted {
        return value.to_string();
    }
    value[1..value.len() - 1]
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}
