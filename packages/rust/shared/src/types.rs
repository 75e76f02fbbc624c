//! Core domain types: crawl jobs, documents, and chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// CrawlJob
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed) => true,
            (Self::Running, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One crawl job as held by the job tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub start_url: String,
    pub max_pages: usize,
    /// URLs discovered so far.
    pub total_pages: usize,
    pub pages_crawled: usize,
    /// Pages the ingestion step handled without error, including pages left
    /// as they were because their content was unchanged or already stored.
    pub pages_ingested: usize,
    /// Page- and job-level failures, in the order they happened.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    /// A fresh pending job.
    pub fn new(start_url: impl Into<String>, max_pages: usize) -> Self {
        Self {
            job_id: JobId::new(),
            status: JobStatus::Pending,
            start_url: start_url.into(),
            max_pages,
            total_pages: 0,
            pages_crawled: 0,
            pages_ingested: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Crawled share of the page budget, in percent with two decimals.
    pub fn progress_percentage(&self) -> f64 {
        if self.max_pages == 0 {
            return 0.0;
        }
        let pct = self.pages_crawled as f64 / self.max_pages as f64 * 100.0;
        ((pct * 100.0).round() / 100.0).clamp(0.0, 100.0)
    }
}

/// Serializable point-in-time view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: CrawlJob,
    pub progress_percentage: f64,
}

impl From<&CrawlJob> for JobSnapshot {
    fn from(job: &CrawlJob) -> Self {
        Self {
            progress_percentage: job.progress_percentage(),
            job: job.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Incoming document fields for an upsert keyed by `canonical_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpsert {
    pub url: String,
    pub canonical_url: String,
    /// SHA-256 of `canonical_url`.
    pub url_hash: String,
    /// Owning source domain.
    pub domain: String,
    pub path_segments: Vec<String>,
    pub path_depth: usize,
    pub title: Option<String>,
    pub page_type: Option<String>,
    pub language: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub content_len: Option<usize>,
    /// SHA-256 of the markdown body.
    pub content_hash: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub canonical_url: String,
    pub url_hash: String,
    pub path_segments: Vec<String>,
    pub path_depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_len: Option<usize>,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// A chunk ready to be written for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunk {
    pub chunk_index: usize,
    /// Byte offset of the first character in the document body.
    pub start_char: usize,
    /// Byte offset one past the last character.
    pub end_char: usize,
    pub heading_path: Vec<String>,
    pub anchor: Option<String>,
    pub text: String,
    pub text_tokens: usize,
    pub is_boilerplate: bool,
    pub embedding_model: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A stored chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub heading_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    pub text: String,
    pub text_tokens: usize,
    pub is_boilerplate: bool,
    pub embedding_model: String,
    pub embedding_dim: usize,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.is_terminal());
        assert!(!Running.is_terminal());
    }

    #[test]
    fn progress_rounds_and_handles_zero_budget() {
        let mut job = CrawlJob::new("https://example.com", 3);
        job.pages_crawled = 1;
        assert_eq!(job.progress_percentage(), 33.33);

        job.max_pages = 0;
        assert_eq!(job.progress_percentage(), 0.0);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let mut job = CrawlJob::new("https://example.com", 10);
        job.pages_crawled = 5;
        let json = serde_json::to_value(JobSnapshot::from(&job)).expect("serialize");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress_percentage"], 50.0);
        assert_eq!(json["start_url"], "https://example.com");
        assert!(json.get("completed_at").is_none());
    }
}
