//! In-memory registry of crawl jobs.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use sitekb_shared::{CrawlJob, JobId, JobSnapshot, JobStatus, Result, SiteKbError};

/// Tracks crawl job state for the lifetime of the process.
///
/// Every operation takes the lock for one read-modify-write. Mutators
/// ignore unknown job ids.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, CrawlJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job.
    pub async fn create(&self, start_url: &str, max_pages: usize) -> JobId {
        let job = CrawlJob::new(start_url, max_pages);
        let id = job.job_id;
        self.jobs.lock().await.insert(id, job);
        info!(job_id = %id, start_url, max_pages, "job created");
        id
    }

    pub async fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs.lock().await.get(&id).map(JobSnapshot::from)
    }

    /// Move a job to `status`. Entering a terminal state stamps `completed_at`.
    pub async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(());
        };
        if !job.status.can_transition_to(status) {
            return Err(SiteKbError::validation(format!(
                "job {id}: illegal transition {} -> {status}",
                job.status
            )));
        }
        job.status = status;
        if status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        info!(job_id = %id, %status, "job status changed");
        Ok(())
    }

    /// Raise the crawl counters. Lower values than the current ones are ignored.
    pub async fn update_progress(&self, id: JobId, pages_crawled: usize, total_pages: usize) {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.pages_crawled = job.pages_crawled.max(pages_crawled);
            job.total_pages = job.total_pages.max(total_pages);
        }
    }

    pub async fn increment_ingested(&self, id: JobId) {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.pages_ingested += 1;
        }
    }

    pub async fn add_error(&self, id: JobId, message: impl Into<String>) {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            let message = message.into();
            debug!(job_id = %id, %message, "job error recorded");
            job.errors.push(message);
        }
    }

    /// Record a fatal error and fail the job unless it already finished.
    pub async fn fail(&self, id: JobId, reason: impl std::fmt::Display) {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };
        job.errors.push(format!("fatal: {reason}"));
        if !job.status.is_terminal() {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        }
        info!(job_id = %id, %reason, "job failed");
    }

    /// Newest jobs first, at most `limit`.
    pub async fn list(&self, limit: usize) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<&CrawlJob> = jobs.values().collect();
        all.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        all.into_iter().take(limit).map(JobSnapshot::from).collect()
    }
}
