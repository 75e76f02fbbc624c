//! Crawl frontier: a FIFO of candidate URLs, the dedup sets, and the page
//! budget shared by all workers of one crawl.
//!
//! Workers take [`Lease`]s from [`Frontier::next`]. A lease is the unit of
//! outstanding work; the frontier reports exhaustion only when the queue is
//! empty and no lease is alive, so links discovered by a slow worker after
//! the queue momentarily drains are still crawled.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use url::Url;

use sitekb_shared::{Result, SiteKbError};

/// Extensions that are never crawled, even when configured as extra.
const DENIED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "mp4", "mp3", "pdf", "zip", "rar", "7z",
    "gz", "css", "js", "woff", "woff2", "ttf",
];

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<String>,
    enqueued: HashSet<String>,
    visited: HashSet<String>,
    claimed: usize,
    in_flight: usize,
    closed: bool,
}

/// Outcome of [`Frontier::try_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// A budget slot is reserved for this URL.
    Granted,
    /// The URL was already fetched.
    AlreadyVisited,
    /// Claims plus visited pages already reach the page budget.
    BudgetExhausted,
}

/// Shared work queue for one crawl.
#[derive(Debug)]
pub struct Frontier {
    state: Mutex<State>,
    notify: Notify,
    max_pages: usize,
}

impl Frontier {
    pub fn new(max_pages: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_pages,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a URL. Returns `false` when it was already enqueued once or the
    /// page budget is spent.
    pub fn enqueue(&self, url: &str) -> bool {
        {
            let mut state = self.lock();
            if state.closed
                || state.visited.len() >= self.max_pages
                || state.enqueued.contains(url)
            {
                return false;
            }
            state.enqueued.insert(url.to_string());
            state.queue.push_back(url.to_string());
        }
        self.notify.notify_waiters();
        true
    }

    /// Wait for the next URL to work on.
    ///
    /// Returns `None` once the frontier is closed, or when the queue is empty
    /// and no lease is outstanding. The latter also closes the frontier so
    /// every other parked worker exits.
    pub async fn next(self: &Arc<Self>) -> Option<Lease> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(url) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(Lease {
                        url,
                        frontier: Arc::clone(self),
                    });
                }
                if state.in_flight == 0 {
                    state.closed = true;
                    drop(state);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Reserve a budget slot for fetching `url`.
    pub fn try_claim(&self, url: &str) -> Claim {
        let mut state = self.lock();
        if state.visited.contains(url) {
            Claim::AlreadyVisited
        } else if state.visited.len() + state.claimed >= self.max_pages {
            Claim::BudgetExhausted
        } else {
            state.claimed += 1;
            Claim::Granted
        }
    }

    /// Turn a granted claim into a visited page.
    pub fn mark_visited(&self, url: &str) {
        let mut state = self.lock();
        state.claimed = state.claimed.saturating_sub(1);
        state.visited.insert(url.to_string());
    }

    /// Give back a granted claim after a failed fetch.
    pub fn release_claim(&self) {
        let mut state = self.lock();
        state.claimed = state.claimed.saturating_sub(1);
    }

    /// Stop handing out work. Parked workers return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of pages fetched so far.
    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    /// Number of distinct URLs ever enqueued.
    pub fn discovered(&self) -> usize {
        self.lock().enqueued.len()
    }

    fn release_lease(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }
}

/// One dequeued URL. Dropping it signals the task is done.
#[derive(Debug)]
pub struct Lease {
    url: String,
    frontier: Arc<Frontier>,
}

impl Lease {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.frontier.release_lease();
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Decides which discovered links belong to the crawl.
#[derive(Debug, Clone)]
pub struct Scope {
    host: String,
    extra_extensions: Vec<String>,
}

impl Scope {
    /// Build the scope for a crawl rooted at `start_url`.
    pub fn new(start_url: &Url, extra_extensions: &[String]) -> Result<Self> {
        let host = start_url
            .host_str()
            .ok_or_else(|| SiteKbError::validation(format!("start URL has no host: {start_url}")))?;

        Ok(Self {
            host: strip_www(host).to_string(),
            extra_extensions: extra_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        })
    }

    /// Normalize `url` and return it when it is admissible, else `None`.
    pub fn admit(&self, url: &Url) -> Option<String> {
        let normalized = normalize(url);

        if !matches!(normalized.scheme(), "http" | "https") {
            return None;
        }
        if normalized.host_str().map(strip_www) != Some(self.host.as_str()) {
            return None;
        }

        match extension(normalized.path()) {
            None => {}
            Some(ext) if DENIED_EXTENSIONS.contains(&ext.as_str()) => return None,
            Some(ext) if ext == "html" || self.extra_extensions.contains(&ext) => {}
            Some(_) => return None,
        }

        Some(normalized.to_string())
    }
}

/// Drop the fragment.
pub fn normalize(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Lowercased extension of the last path segment, without the dot.
fn extension(path: &str) -> Option<String> {
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rfind('.') {
        Some(i) if i > 0 && i + 1 < last.len() => Some(last[i + 1..].to_lowercase()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scope() -> Scope {
        let start = Url::parse("https://www.med.example.edu/").unwrap();
        Scope::new(&start, &[]).unwrap()
    }

    fn admit(scope: &Scope, raw: &str) -> Option<String> {
        scope.admit(&Url::parse(raw).unwrap())
    }

    #[test]
    fn same_host_with_or_without_www() {
        let s = scope();
        assert!(admit(&s, "https://med.example.edu/carreras").is_some());
        assert!(admit(&s, "http://www.med.example.edu/alumnos/").is_some());
    }

    #[test]
    fn subdomains_and_other_hosts_rejected() {
        let s = scope();
        assert!(admit(&s, "https://campus.med.example.edu/").is_none());
        assert!(admit(&s, "https://example.edu/").is_none());
        assert!(admit(&s, "mailto:info@med.example.edu").is_none());
    }

    #[test]
    fn extensions_filtered() {
        let s = scope();
        assert!(admit(&s, "https://med.example.edu/plan.html").is_some());
        assert!(admit(&s, "https://med.example.edu/v1.2/notas").is_some());
        assert!(admit(&s, "https://med.example.edu/plan.pdf").is_none());
        assert!(admit(&s, "https://med.example.edu/logo.PNG").is_none());
        assert!(admit(&s, "https://med.example.edu/index.php").is_none());
    }

    #[test]
    fn extra_extensions_cannot_unlock_denylist() {
        let start = Url::parse("https://med.example.edu/").unwrap();
        let s = Scope::new(&start, &[".php".into(), "pdf".into()]).unwrap();
        assert!(admit(&s, "https://med.example.edu/index.php").is_some());
        assert!(admit(&s, "https://med.example.edu/plan.pdf").is_none());
    }

    #[test]
    fn fragment_stripped() {
        let s = scope();
        assert_eq!(
            admit(&s, "https://med.example.edu/noticias#ultima").as_deref(),
            Some("https://med.example.edu/noticias")
        );
    }

    #[test]
    fn enqueue_is_idempotent() {
        let frontier = Frontier::new(10);
        assert!(frontier.enqueue("https://a.test/"));
        assert!(!frontier.enqueue("https://a.test/"));
        assert_eq!(frontier.discovered(), 1);
    }

    #[test]
    fn budget_counts_claims_and_visits() {
        let frontier = Frontier::new(2);
        assert_eq!(frontier.try_claim("https://a.test/1"), Claim::Granted);
        assert_eq!(frontier.try_claim("https://a.test/2"), Claim::Granted);
        assert_eq!(frontier.try_claim("https://a.test/3"), Claim::BudgetExhausted);

        frontier.release_claim();
        assert_eq!(frontier.try_claim("https://a.test/3"), Claim::Granted);

        frontier.mark_visited("https://a.test/1");
        assert_eq!(frontier.try_claim("https://a.test/1"), Claim::AlreadyVisited);
        assert_eq!(frontier.visited_count(), 1);
    }

    #[test]
    fn enqueue_refused_once_budget_visited() {
        let frontier = Frontier::new(1);
        assert_eq!(frontier.try_claim("https://a.test/"), Claim::Granted);
        frontier.mark_visited("https://a.test/");
        assert!(!frontier.enqueue("https://a.test/other"));
    }

    #[tokio::test]
    async fn next_waits_for_outstanding_lease() {
        let frontier = Frontier::new(10);
        frontier.enqueue("https://a.test/");
        let lease = frontier.next().await.unwrap();

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.next().await.map(|l| l.url().to_string()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        frontier.enqueue("https://a.test/child");
        drop(lease);

        let got = waiter.await.unwrap();
        assert_eq!(got.as_deref(), Some("https://a.test/child"));
    }

    #[tokio::test]
    async fn drained_frontier_closes() {
        let frontier = Frontier::new(10);
        frontier.enqueue("https://a.test/");
        drop(frontier.next().await.unwrap());
        assert!(frontier.next().await.is_none());
        assert!(frontier.is_closed());
        assert!(!frontier.enqueue("https://a.test/late"));
    }

    #[tokio::test]
    async fn close_wakes_parked_workers() {
        let frontier = Frontier::new(10);
        frontier.enqueue("https://a.test/");
        let _lease = frontier.next().await.unwrap();

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.next().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.close();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_enqueue_hands_out_each_url_once() {
        let frontier = Frontier::new(1000);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let frontier = Arc::clone(&frontier);
            tasks.spawn(async move {
                for i in 0..50 {
                    frontier.enqueue(&format!("https://a.test/{i}"));
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        let mut seen = HashSet::new();
        let mut leases = Vec::new();
        for _ in 0..50 {
            let lease = frontier.next().await.unwrap();
            assert!(seen.insert(lease.url().to_string()));
            leases.push(lease);
        }
        drop(leases);
        assert!(frontier.next().await.is_none());
        assert_eq!(seen.len(), 50);
    }
}
