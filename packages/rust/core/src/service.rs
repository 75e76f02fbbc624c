//! Crawl control surface: start crawl jobs and inspect their state.
//!
//! Each crawled page is written as a markdown artifact and, when enabled,
//! ingested on the spot. Page-level failures land in the job's error list;
//! only a failure of the crawl itself marks the job failed.
//!
//! Artifact folders left with empty pages can be repaired in place with
//! [`CrawlService::repair_folder`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitekb_artifacts::{list_artifacts, read_artifact, write_artifact, write_artifact_at};
use sitekb_crawler::{
    CrawlOptions, CrawlReporter, CrawlSink, CrawlSummary, Crawler, FetchOutcome, FetchedPage,
    Fetcher, PageArtifact, ProfileRegistry, SiteProfile,
};
use sitekb_shared::{
    CrawlSettings, DedupPolicy, JobId, JobSnapshot, JobStatus, Result, SiteKbError, expand_home,
};

use crate::ingest::{IngestionCoordinator, PageInput};
use crate::jobs::JobTracker;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Parameters of one crawl. Unset fields fall back to `[crawl]` settings.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub start_url: String,
    pub max_pages: Option<usize>,
    pub concurrency: Option<usize>,
    pub out_dir: Option<PathBuf>,
    pub site_profile: Option<String>,
    /// Ingest pages as they are crawled.
    pub ingest: bool,
}

impl CrawlRequest {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_pages: None,
            concurrency: None,
            out_dir: None,
            site_profile: None,
            ingest: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CrawlService {
    tracker: Arc<JobTracker>,
    fetcher: Arc<dyn Fetcher>,
    profiles: ProfileRegistry,
    ingestion: Option<Arc<IngestionCoordinator>>,
    settings: CrawlSettings,
}

impl CrawlService {
    pub fn new(
        tracker: Arc<JobTracker>,
        fetcher: Arc<dyn Fetcher>,
        profiles: ProfileRegistry,
        ingestion: Option<Arc<IngestionCoordinator>>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            tracker,
            fetcher,
            profiles,
            ingestion,
            settings,
        }
    }

    /// Create a job and run it in the background.
    pub async fn start(self: &Arc<Self>, request: CrawlRequest) -> JobId {
        let job_id = self.create_job(&request).await;
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run(job_id, request).await });
        job_id
    }

    /// Register a pending job for `request` without running it.
    pub async fn create_job(&self, request: &CrawlRequest) -> JobId {
        let max_pages = request.max_pages.unwrap_or(self.settings.max_pages);
        self.tracker.create(&request.start_url, max_pages).await
    }

    /// Run a created job to completion on the current task.
    #[instrument(skip_all, fields(%job_id, start_url = %request.start_url))]
    pub async fn run(&self, job_id: JobId, request: CrawlRequest) {
        if let Err(e) = self.tracker.update_status(job_id, JobStatus::Running).await {
            warn!(error = %e, "job could not start");
            return;
        }

        match self.execute(job_id, &request).await {
            Ok(summary) => {
                info!(
                    pages_crawled = summary.pages_crawled,
                    pages_failed = summary.pages_failed,
                    "crawl job finished"
                );
                if let Err(e) = self.tracker.update_status(job_id, JobStatus::Completed).await {
                    warn!(error = %e, "job could not complete");
                }
            }
            Err(e) => {
                warn!(error = %e, "crawl job failed");
                self.tracker.fail(job_id, e).await;
            }
        }
    }

    async fn execute(&self, job_id: JobId, request: &CrawlRequest) -> Result<CrawlSummary> {
        let profile_name = request
            .site_profile
            .as_deref()
            .unwrap_or(&self.settings.site_profile);
        let profile = self.profiles.get(profile_name)?;

        let start_url = Url::parse(&request.start_url).map_err(|e| {
            SiteKbError::validation(format!("invalid start URL {}: {e}", request.start_url))
        })?;

        let out_dir = request
            .out_dir
            .clone()
            .unwrap_or_else(|| expand_home(&self.settings.out_dir));
        std::fs::create_dir_all(&out_dir).map_err(|e| SiteKbError::io(&out_dir, e))?;

        let mut options = CrawlOptions::from_settings(&self.settings);
        if let Some(max_pages) = request.max_pages {
            options.max_pages = max_pages;
        }
        if let Some(concurrency) = request.concurrency {
            options.concurrency = concurrency;
            if self.settings.fetch_concurrency.is_none() {
                options.fetch_concurrency = concurrency.max(1);
            }
        }

        let ingestion = if request.ingest {
            self.ingestion.clone()
        } else {
            None
        };
        debug!(profile = %profile.name, out_dir = %out_dir.display(), ingest = ingestion.is_some(), "crawl configured");

        let sink = Arc::new(TrackerSink {
            job_id,
            tracker: Arc::clone(&self.tracker),
            out_dir,
            ingestion,
        });
        let reporter = Arc::new(TrackerReporter {
            job_id,
            tracker: Arc::clone(&self.tracker),
        });

        Crawler::new(Arc::clone(&self.fetcher), options)
            .crawl(&start_url, &profile, sink, reporter)
            .await
    }

    pub async fn get_status(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.tracker.get(job_id).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Vec<JobSnapshot> {
        self.tracker.list(limit).await
    }

    /// Re-fetch every artifact in `dir` that has a URL but an empty body and
    /// rewrite the same file. Repaired pages are ingested when `ingest` is
    /// set and the service has an ingestion coordinator.
    #[instrument(skip_all, fields(dir = %dir.display(), ingest = ingest))]
    pub async fn repair_folder(
        &self,
        dir: &Path,
        site_profile: Option<&str>,
        ingest: bool,
    ) -> Result<RepairSummary> {
        let profile_name = site_profile.unwrap_or(&self.settings.site_profile);
        let profile = Arc::new(self.profiles.get(profile_name)?);

        let files = list_artifacts(dir)?;
        let mut summary = RepairSummary {
            scanned: files.len(),
            ..RepairSummary::default()
        };

        let mut candidates = Vec::new();
        for path in files {
            match read_artifact(&path) {
                Ok(artifact) if artifact.body.trim().is_empty() => {
                    if let Some(url) = artifact.url {
                        candidates.push((path, url));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable artifact"),
            }
        }
        summary.candidates = candidates.len();
        info!(scanned = summary.scanned, candidates = summary.candidates, "repairing artifacts");

        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (path, url) in candidates {
            let fetcher = Arc::clone(&self.fetcher);
            let profile = Arc::clone(&profile);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let result = match permits.acquire().await {
                    Ok(_permit) => repair_artifact(fetcher.as_ref(), &profile, &path, &url).await,
                    Err(_) => Err("repair limiter closed".to_string()),
                };
                (path, url, result)
            });
        }

        let mut repaired = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (file, url, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "repair task aborted");
                    summary.failed += 1;
                    continue;
                }
            };
            match result {
                Ok(page) => {
                    debug!(file = %file.display(), %url, "artifact repaired");
                    summary.repaired += 1;
                    repaired.push((url, page));
                }
                Err(error) => {
                    warn!(file = %file.display(), %url, %error, "artifact not repaired");
                    summary.failed += 1;
                    summary.errors.push(RepairError { file, url, error });
                }
            }
        }
        summary.errors.sort_by(|a, b| a.file.cmp(&b.file));

        if let Some(ingestion) = self.ingestion.as_ref().filter(|_| ingest) {
            for (url, page) in &repaired {
                let input = PageInput {
                    url,
                    title: Some(page.title.as_str()).filter(|t| !t.is_empty()),
                    body: &page.markdown,
                    fetched_at: Some(Utc::now()),
                    status_code: Some(page.status_code),
                };
                match ingestion.ingest_page(&input, DedupPolicy::ContentHash).await {
                    Ok(_) => summary.ingested += 1,
                    Err(e) => warn!(%url, error = %e, "repaired page not ingested"),
                }
            }
        }

        info!(
            repaired = summary.repaired,
            failed = summary.failed,
            ingested = summary.ingested,
            "repair finished"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

/// Tally of [`CrawlService::repair_folder`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    /// Markdown files in the folder.
    pub scanned: usize,
    /// Files with a URL and an empty body.
    pub candidates: usize,
    pub repaired: usize,
    pub failed: usize,
    pub errors: Vec<RepairError>,
    /// Repaired pages ingested without error.
    pub ingested: usize,
}

/// An artifact that is still empty after a repair attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairError {
    pub file: PathBuf,
    pub url: String,
    pub error: String,
}

/// Fetch `url` and rewrite `path` with the result. The generic profile is
/// tried when the configured one fails or extracts nothing.
async fn repair_artifact(
    fetcher: &dyn Fetcher,
    profile: &SiteProfile,
    path: &Path,
    url: &str,
) -> std::result::Result<FetchedPage, String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    let mut page = fetch_non_empty(fetcher, &parsed, profile).await;
    let generic = SiteProfile::generic();
    if page.is_err() && *profile != generic {
        page = fetch_non_empty(fetcher, &parsed, &generic).await;
    }
    let page = page?;

    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let title = if page.title.trim().is_empty() { stem.as_ref() } else { page.title.as_str() };
    write_artifact_at(path, url, title, &page.markdown).map_err(|e| e.to_string())?;
    Ok(page)
}

async fn fetch_non_empty(
    fetcher: &dyn Fetcher,
    url: &Url,
    profile: &SiteProfile,
) -> std::result::Result<FetchedPage, String> {
    match fetcher.fetch(url, profile).await {
        FetchOutcome::Fetched(page) if !page.markdown.trim().is_empty() => Ok(page),
        FetchOutcome::Fetched(_) => Err(format!("no content extracted with profile {}", profile.name)),
        FetchOutcome::Failed(failure) => Err(failure.reason),
    }
}

// ---------------------------------------------------------------------------
// Sink and reporter
// ---------------------------------------------------------------------------

/// Writes the artifact, then ingests the page if ingestion is enabled.
struct TrackerSink {
    job_id: JobId,
    tracker: Arc<JobTracker>,
    out_dir: PathBuf,
    ingestion: Option<Arc<IngestionCoordinator>>,
}

#[async_trait]
impl CrawlSink for TrackerSink {
    async fn on_page(&self, page: &PageArtifact) -> Result<()> {
        write_artifact(&self.out_dir, &page.url, &page.title, &page.markdown)?;

        let Some(ingestion) = &self.ingestion else {
            return Ok(());
        };
        let input = PageInput {
            url: &page.url,
            title: Some(page.title.as_str()).filter(|t| !t.is_empty()),
            body: &page.markdown,
            fetched_at: Some(Utc::now()),
            status_code: Some(page.status_code),
        };
        match ingestion.ingest_page(&input, ingestion.dedup_policy()).await {
            Ok(outcome) => {
                debug!(url = %page.url, action = ?outcome.action, chunks = outcome.chunk_count, "page ingested");
                self.tracker.increment_ingested(self.job_id).await;
            }
            Err(e) => {
                warn!(url = %page.url, error = %e, "ingestion failed");
                self.tracker
                    .add_error(self.job_id, format!("error ingesting {}: {e}", page.url))
                    .await;
            }
        }
        Ok(())
    }
}

struct TrackerReporter {
    job_id: JobId,
    tracker: Arc<JobTracker>,
}

#[async_trait]
impl CrawlReporter for TrackerReporter {
    async fn progress(&self, pages_crawled: usize, discovered: usize) {
        self.tracker
            .update_progress(self.job_id, pages_crawled, discovered)
            .await;
    }

    async fn error(&self, message: String) {
        self.tracker.add_error(self.job_id, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use sitekb_crawler::{FetchFailure, FetchOutcome, FetchedPage, SiteProfile};
    use sitekb_shared::{ChunkingConfig, IngestConfig};
    use sitekb_storage::Storage;
    use uuid::Uuid;

    use crate::ingest::tests::{DIMS, FakeEmbedder, temp_db};

    /// Serves a fixed set of pages; unknown paths are permanent 404s.
    struct SiteFetcher {
        pages: HashMap<&'static str, (&'static str, &'static [&'static str])>,
    }

    impl SiteFetcher {
        fn faculty() -> Self {
            let mut pages: HashMap<&'static str, (&'static str, &'static [&'static str])> =
                HashMap::new();
            pages.insert(
                "/",
                ("# Facultad\n\nBienvenidos a la facultad.\n", &["/ingreso", "/becas", "/perdida"]),
            );
            pages.insert(
                "/ingreso",
                ("# Ingreso\n\n## Requisitos\n\nLos requisitos de inscripción son DNI y título.\n", &["/"]),
            );
            pages.insert("/becas", ("# Becas\n\nLas becas se solicitan en marzo.\n", &[]));
            Self { pages }
        }
    }

    #[async_trait]
    impl Fetcher for SiteFetcher {
        async fn fetch(&self, url: &Url, _profile: &SiteProfile) -> FetchOutcome {
            let Some((markdown, links)) = self.pages.get(url.path()) else {
                return FetchOutcome::Failed(FetchFailure::permanent("HTTP 404 Not Found"));
            };
            let anchors: String = links.iter().map(|l| format!("<a href=\"{l}\">x</a>")).collect();
            FetchOutcome::Fetched(FetchedPage {
                title: url.path().trim_matches('/').to_string(),
                markdown: markdown.to_string(),
                html: format!("<html><body>{anchors}</body></html>"),
                status_code: 200,
            })
        }
    }

    struct Fixture {
        service: Arc<CrawlService>,
        storage: Arc<Storage>,
        out_dir: PathBuf,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(Storage::open(&temp_db(), DIMS).await.unwrap());
        let ingestion = Arc::new(IngestionCoordinator::new(
            storage.clone(),
            Arc::new(FakeEmbedder::default()),
            &ChunkingConfig::default(),
            IngestConfig::default(),
        ));
        let settings = CrawlSettings {
            backoff_base_ms: 1,
            ..CrawlSettings::default()
        };
        let service = Arc::new(CrawlService::new(
            Arc::new(JobTracker::new()),
            Arc::new(SiteFetcher::faculty()),
            ProfileRegistry::new(),
            Some(ingestion),
            settings,
        ));
        let out_dir = std::env::temp_dir().join(format!("sitekb_md_{}", Uuid::now_v7()));
        Fixture {
            service,
            storage,
            out_dir,
        }
    }

    fn request(fixture: &Fixture) -> CrawlRequest {
        CrawlRequest {
            max_pages: Some(10),
            concurrency: Some(2),
            out_dir: Some(fixture.out_dir.clone()),
            ..CrawlRequest::new("https://www.facultad.test/")
        }
    }

    async fn run_to_end(fixture: &Fixture, request: CrawlRequest) -> JobSnapshot {
        let job_id = fixture.service.create_job(&request).await;
        fixture.service.run(job_id, request).await;
        fixture.service.get_status(job_id).await.unwrap()
    }

    #[tokio::test]
    async fn crawl_writes_artifacts_and_ingests() {
        let fixture = fixture().await;
        let snapshot = run_to_end(&fixture, request(&fixture)).await;

        assert_eq!(snapshot.job.status, JobStatus::Completed);
        assert_eq!(snapshot.job.pages_crawled, 3);
        assert_eq!(snapshot.job.pages_ingested, 3);
        assert_eq!(snapshot.progress_percentage, 30.0);
        assert!(snapshot.job.completed_at.is_some());
        assert_eq!(snapshot.job.errors.len(), 1);
        assert!(snapshot.job.errors[0].starts_with("permanent failure: "));
        assert!(snapshot.job.errors[0].contains("/perdida"));

        let artifacts = sitekb_artifacts::list_artifacts(&fixture.out_dir).unwrap();
        assert_eq!(artifacts.len(), 3);

        let doc = fixture
            .storage
            .get_document_by_canonical_url("https://www.facultad.test/becas")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status_code, Some(200));
        assert_eq!(doc.title.as_deref(), Some("becas"));
    }

    #[tokio::test]
    async fn recrawl_is_idempotent() {
        let fixture = fixture().await;
        run_to_end(&fixture, request(&fixture)).await;
        let first = fixture.storage.stats().await.unwrap();

        let snapshot = run_to_end(&fixture, request(&fixture)).await;
        assert_eq!(snapshot.job.status, JobStatus::Completed);
        // Unchanged pages still count as ingested.
        assert_eq!(snapshot.job.pages_ingested, 3);
        assert_eq!(snapshot.job.errors.len(), 1);
        let second = fixture.storage.stats().await.unwrap();
        assert_eq!(first.documents, second.documents);
        assert_eq!(first.chunks, second.chunks);
    }

    #[tokio::test]
    async fn no_ingest_only_writes_artifacts() {
        let fixture = fixture().await;
        let request = CrawlRequest {
            ingest: false,
            ..request(&fixture)
        };
        let snapshot = run_to_end(&fixture, request).await;

        assert_eq!(snapshot.job.status, JobStatus::Completed);
        assert_eq!(snapshot.job.pages_ingested, 0);
        assert_eq!(sitekb_artifacts::list_artifacts(&fixture.out_dir).unwrap().len(), 3);
        assert_eq!(fixture.storage.stats().await.unwrap().documents, 0);
    }

    #[tokio::test]
    async fn unknown_profile_fails_job() {
        let fixture = fixture().await;
        let request = CrawlRequest {
            site_profile: Some("nope".into()),
            ..request(&fixture)
        };
        let snapshot = run_to_end(&fixture, request).await;

        assert_eq!(snapshot.job.status, JobStatus::Failed);
        assert_eq!(snapshot.job.pages_crawled, 0);
        assert!(snapshot.job.errors[0].starts_with("fatal: "));
        assert!(snapshot.job.completed_at.is_some());
    }

    #[tokio::test]
    async fn invalid_start_url_fails_job() {
        let fixture = fixture().await;
        let request = CrawlRequest {
            start_url: "not a url".into(),
            ..request(&fixture)
        };
        let snapshot = run_to_end(&fixture, request).await;
        assert_eq!(snapshot.job.status, JobStatus::Failed);
        assert!(snapshot.job.errors[0].contains("invalid start URL"));
    }

    #[tokio::test]
    async fn started_job_runs_in_background() {
        let fixture = fixture().await;
        let job_id = fixture.service.start(request(&fixture)).await;

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = fixture.service.get_status(job_id).await.unwrap().job.status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);

        let jobs = fixture.service.list_jobs(10).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job.job_id, job_id);
    }

    // -----------------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------------

    use sitekb_crawler::HttpFetcher;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn repair_service(storage: Arc<Storage>) -> CrawlService {
        let ingestion = Arc::new(IngestionCoordinator::new(
            storage,
            Arc::new(FakeEmbedder::default()),
            &ChunkingConfig::default(),
            IngestConfig::default(),
        ));
        let fetcher = HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .allow_private_hosts();
        CrawlService::new(
            Arc::new(JobTracker::new()),
            Arc::new(fetcher),
            ProfileRegistry::new(),
            Some(ingestion),
            CrawlSettings::default(),
        )
    }

    /// A folder with one empty page to repair, one that 404s, one complete
    /// page and one without a URL.
    async fn damaged_folder(server: &MockServer) -> PathBuf {
        Mock::given(method("GET"))
            .and(path("/becas"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><head><title>Becas</title></head><body>\
                         <h1>Becas</h1><p>Las becas de ayuda económica se solicitan en marzo.</p>\
                         </body></html>",
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(server)
            .await;

        let dir = std::env::temp_dir().join(format!("sitekb_repair_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let empty = |url: &str| format!("---\ntitle: \"\"\nurl: {url}\n---\n\n  \n");
        std::fs::write(dir.join("becas-viejo.md"), empty(&format!("{}/becas", server.uri()))).unwrap();
        std::fs::write(dir.join("perdida.md"), empty(&format!("{}/perdida", server.uri()))).unwrap();
        std::fs::write(
            dir.join("completo.md"),
            format!("---\ntitle: \"Completo\"\nurl: {}/completo\n---\n\n# Completo\n\nYa tiene texto.\n", server.uri()),
        )
        .unwrap();
        std::fs::write(dir.join("sin-url.md"), "---\ntitle: \"Nada\"\n---\n\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn repair_refetches_empty_artifacts_in_place() {
        let server = MockServer::start().await;
        let dir = damaged_folder(&server).await;
        let complete_before = std::fs::read_to_string(dir.join("completo.md")).unwrap();
        let storage = Arc::new(Storage::open(&temp_db(), DIMS).await.unwrap());
        let service = repair_service(storage.clone()).await;

        let summary = service.repair_folder(&dir, None, true).await.unwrap();

        assert_eq!(summary.scanned, 4);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].file, dir.join("perdida.md"));
        assert!(summary.errors[0].url.ends_with("/perdida"));
        assert!(summary.errors[0].error.contains("404"));

        let repaired = read_artifact(&dir.join("becas-viejo.md")).unwrap();
        assert_eq!(repaired.title.as_deref(), Some("Becas"));
        assert!(repaired.body.contains("se solicitan en marzo"));
        assert!(repaired.content_hash.is_some());
        assert_eq!(list_artifacts(&dir).unwrap().len(), 4);
        assert_eq!(std::fs::read_to_string(dir.join("completo.md")).unwrap(), complete_before);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert!(stats.chunks >= 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn repair_without_ingest_leaves_store_untouched() {
        let server = MockServer::start().await;
        let dir = damaged_folder(&server).await;
        let storage = Arc::new(Storage::open(&temp_db(), DIMS).await.unwrap());
        let service = repair_service(storage.clone()).await;

        let summary = service.repair_folder(&dir, Some("generic"), false).await.unwrap();

        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.ingested, 0);
        assert_eq!(storage.stats().await.unwrap().documents, 0);

        // A second pass finds nothing left to repair but the missing page.
        let again = service.repair_folder(&dir, None, false).await.unwrap();
        assert_eq!(again.candidates, 1);
        assert_eq!(again.repaired, 0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn repair_rejects_unknown_profile() {
        let fixture = fixture().await;
        let err = fixture
            .service
            .repair_folder(&fixture.out_dir, Some("nope"), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
