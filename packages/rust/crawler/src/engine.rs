//! Concurrent, scope-aware crawl worker pool.
//!
//! A fixed number of workers drain one shared [`Frontier`]. Each worker
//! claims a budget slot, fetches with retry, hands the page to the
//! [`CrawlSink`], and enqueues the in-scope links it found. A separate
//! semaphore caps simultaneous fetches.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use sitekb_shared::{CrawlSettings, Result, SiteKbError};

use crate::fetcher::{FailureKind, FetchOutcome, FetchedPage, Fetcher};
use crate::frontier::{Claim, Frontier, Scope, normalize};
use crate::profiles::SiteProfile;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Attempt count and backoff for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Sleep before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Knobs for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub concurrency: usize,
    pub fetch_concurrency: usize,
    pub retry: RetryPolicy,
    pub extra_extensions: Vec<String>,
}

impl CrawlOptions {
    pub fn from_settings(settings: &CrawlSettings) -> Self {
        Self {
            max_pages: settings.max_pages,
            concurrency: settings.concurrency,
            fetch_concurrency: settings.fetch_limit(),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                base_delay: Duration::from_millis(settings.backoff_base_ms),
            },
            extra_extensions: settings.extra_extensions.clone(),
        }
    }
}

/// A successfully crawled page, as handed to the sink.
#[derive(Debug, Clone)]
pub struct PageArtifact {
    pub url: String,
    pub title: String,
    pub markdown: String,
    pub html: String,
    pub status_code: u16,
}

/// Summary of a finished crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    /// Dequeued URLs that were already visited or found the budget spent.
    pub pages_skipped: usize,
    pub discovered: usize,
    pub duration: Duration,
}

/// Receives every crawled page. Runs on the worker, before link expansion.
#[async_trait]
pub trait CrawlSink: Send + Sync {
    async fn on_page(&self, page: &PageArtifact) -> Result<()>;
}

/// Receives progress and page-level errors.
#[async_trait]
pub trait CrawlReporter: Send + Sync {
    async fn progress(&self, pages_crawled: usize, discovered: usize);
    async fn error(&self, message: String);
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Runs crawls against a [`Fetcher`].
pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn Fetcher>, options: CrawlOptions) -> Self {
        Self { fetcher, options }
    }

    /// Crawl the site rooted at `start_url`.
    ///
    /// Page-level failures go to the reporter. An error is returned only for
    /// an invalid start URL or when a worker dies.
    #[instrument(skip_all, fields(start_url = %start_url, profile = %profile.name))]
    pub async fn crawl(
        &self,
        start_url: &Url,
        profile: &SiteProfile,
        sink: Arc<dyn CrawlSink>,
        reporter: Arc<dyn CrawlReporter>,
    ) -> Result<CrawlSummary> {
        let started = Instant::now();

        if !matches!(start_url.scheme(), "http" | "https") {
            return Err(SiteKbError::validation(format!(
                "start URL must be http or https: {start_url}"
            )));
        }
        let scope = Scope::new(start_url, &self.options.extra_extensions)?;

        let frontier = Frontier::new(self.options.max_pages);
        frontier.enqueue(normalize(start_url).as_str());

        let concurrency = self.options.concurrency.max(1);
        let ctx = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            frontier: Arc::clone(&frontier),
            scope,
            profile: profile.clone(),
            sink,
            reporter,
            fetch_permits: Semaphore::new(self.options.fetch_concurrency.max(1)),
            retry: self.options.retry,
            crawled: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });

        info!(
            max_pages = self.options.max_pages,
            concurrency,
            fetch_concurrency = self.options.fetch_concurrency,
            max_attempts = self.options.retry.max_attempts,
            "starting crawl"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.run(worker_id).await });
        }

        let mut fatal: Option<String> = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "crawl worker died");
                frontier.close();
                fatal.get_or_insert_with(|| format!("crawl worker died: {e}"));
            }
        }

        let summary = CrawlSummary {
            pages_crawled: ctx.crawled.load(Ordering::Relaxed),
            pages_failed: ctx.failed.load(Ordering::Relaxed),
            pages_skipped: ctx.skipped.load(Ordering::Relaxed),
            discovered: frontier.discovered(),
            duration: started.elapsed(),
        };

        info!(
            pages_crawled = summary.pages_crawled,
            pages_failed = summary.pages_failed,
            pages_skipped = summary.pages_skipped,
            discovered = summary.discovered,
            duration_ms = summary.duration.as_millis(),
            "crawl completed"
        );

        match fatal {
            Some(message) => Err(SiteKbError::Crawl(message)),
            None => Ok(summary),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct WorkerContext {
    fetcher: Arc<dyn Fetcher>,
    frontier: Arc<Frontier>,
    scope: Scope,
    profile: SiteProfile,
    sink: Arc<dyn CrawlSink>,
    reporter: Arc<dyn CrawlReporter>,
    fetch_permits: Semaphore,
    retry: RetryPolicy,
    crawled: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl WorkerContext {
    async fn run(&self, worker_id: usize) {
        while let Some(lease) = self.frontier.next().await {
            self.process(lease.url()).await;
        }
        debug!(worker_id, "worker exiting");
    }

    async fn process(&self, raw: &str) {
        match self.frontier.try_claim(raw) {
            Claim::Granted => {}
            Claim::AlreadyVisited | Claim::BudgetExhausted => {
                debug!(url = raw, "skipping");
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let Ok(url) = Url::parse(raw) else {
            self.frontier.release_claim();
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let page = match self.fetch_with_retry(&url).await {
            Ok(page) => page,
            Err(message) => {
                self.frontier.release_claim();
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(url = raw, %message, "page failed");
                self.reporter.error(message).await;
                return;
            }
        };

        self.frontier.mark_visited(raw);
        let crawled = self.crawled.fetch_add(1, Ordering::Relaxed) + 1;
        self.reporter
            .progress(crawled, self.frontier.discovered())
            .await;

        let links = extract_links(&page.html, &url);
        let artifact = PageArtifact {
            url: raw.to_string(),
            title: page.title,
            markdown: page.markdown,
            html: page.html,
            status_code: page.status_code,
        };
        if let Err(e) = self.sink.on_page(&artifact).await {
            warn!(url = raw, error = %e, "page sink failed");
            self.reporter
                .error(format!("error processing {raw}: {e}"))
                .await;
        }

        let mut added = 0usize;
        for link in &links {
            if let Some(admitted) = self.scope.admit(link) {
                if self.frontier.enqueue(&admitted) {
                    added += 1;
                }
            }
        }
        debug!(url = raw, links = links.len(), added, "links expanded");
    }

    /// Fetch with retry. The fetch permit is held for one attempt only.
    async fn fetch_with_retry(&self, url: &Url) -> std::result::Result<FetchedPage, String> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = {
                let Ok(_permit) = self.fetch_permits.acquire().await else {
                    return Err(format!("fetch limiter closed: {url}"));
                };
                self.fetcher.fetch(url, &self.profile).await
            };

            let failure = match outcome {
                FetchOutcome::Fetched(page) => return Ok(page),
                FetchOutcome::Failed(failure) => failure,
            };

            if failure.kind == FailureKind::Permanent {
                return Err(format!("permanent failure: {url}: {}", failure.reason));
            }
            if attempt >= max_attempts {
                return Err(format!(
                    "failed after {max_attempts} attempts: {url}: {}",
                    failure.reason
                ));
            }

            let delay = self.retry.delay_after(attempt);
            debug!(%url, attempt, delay_ms = delay.as_millis(), reason = %failure.reason, "retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Extract all links from a page, resolved against the page URL.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    static LINK_SEL: std::sync::LazyLock<Selector> =
        std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

    let doc = Html::parse_document(html);
    doc.select(&LINK_SEL)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            !(href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:"))
        })
        .filter_map(|href| base_url.join(href).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
