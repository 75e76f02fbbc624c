//! Page fetching: the [`Fetcher`] seam and its HTTP implementation.
//!
//! A fetch never returns an error. It returns a [`FetchOutcome`] that tells
//! the worker pool whether the failure is worth retrying.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use tracing::{debug, instrument, warn};
use url::Url;

use sitekb_shared::{Result, SiteKbError};

use crate::profiles::SiteProfile;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("SiteKB/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// A page that was downloaded and converted.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: String,
    pub markdown: String,
    pub html: String,
    pub status_code: u16,
}

/// Whether a failed fetch may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network errors, timeouts, HTTP 408, 429 and 5xx.
    Transient,
    /// Other HTTP 4xx, non-HTML content, unconvertible markup.
    Permanent,
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl FetchFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedPage),
    Failed(FetchFailure),
}

/// Retrieves one page and renders it to markdown with a site profile.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, profile: &SiteProfile) -> FetchOutcome;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// `reqwest`-backed fetcher with private-network protection.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: false,
        })
    }

    /// Allow crawling localhost and private addresses.
    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private_hosts = true;
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url, profile = %profile.name))]
    async fn fetch(&self, url: &Url, profile: &SiteProfile) -> FetchOutcome {
        if !self.allow_private_hosts && is_private_target(url) {
            warn!("private network target blocked");
            return FetchOutcome::Failed(FetchFailure::permanent("private network target blocked"));
        }

        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::Failed(FetchFailure::transient(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let failure = if is_transient_status(status) {
                FetchFailure::transient(format!("HTTP {status}"))
            } else {
                FetchFailure::permanent(format!("HTTP {status}"))
            };
            return FetchOutcome::Failed(failure);
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html_content_type(content_type) {
                return FetchOutcome::Failed(FetchFailure::permanent(format!(
                    "unsupported content type {content_type}"
                )));
            }
        }

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return FetchOutcome::Failed(FetchFailure::transient(format!(
                    "body read failed: {e}"
                )));
            }
        };

        let converted = match sitekb_markdown::convert(&html, &profile.convert_options(url.as_str()))
        {
            Ok(result) => result,
            Err(e) => return FetchOutcome::Failed(FetchFailure::permanent(e.to_string())),
        };

        debug!(
            status = status.as_u16(),
            markdown_len = converted.markdown.len(),
            "page fetched"
        );

        FetchOutcome::Fetched(FetchedPage {
            title: converted.title,
            markdown: converted.markdown,
            html,
            status_code: status.as_u16(),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

// ---------------------------------------------------------------------------
// Private network protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a loopback, private, or otherwise local address.
fn is_private_target(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }
    host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .allow_private_hosts()
    }

    async fn fetch(server: &MockServer, route: &str) -> FetchOutcome {
        let url = Url::parse(&format!("{}{route}", server.uri())).unwrap();
        fetcher().fetch(&url, &SiteProfile::generic()).await
    }

    fn kind(outcome: &FetchOutcome) -> Option<FailureKind> {
        match outcome {
            FetchOutcome::Fetched(_) => None,
            FetchOutcome::Failed(f) => Some(f.kind),
        }
    }

    #[tokio::test]
    async fn html_page_converted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alumnos"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><head><title>Alumnos</title></head><body>\
                         <nav><a href=\"/\">Inicio</a></nav>\
                         <main><h1>Alumnos</h1><p>Turnos de examen.</p></main></body></html>",
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;

        match fetch(&server, "/alumnos").await {
            FetchOutcome::Fetched(page) => {
                assert_eq!(page.title, "Alumnos");
                assert_eq!(page.status_code, 200);
                assert!(page.markdown.contains("Turnos de examen."));
                assert!(page.html.contains("<nav>"));
            }
            FetchOutcome::Failed(f) => panic!("unexpected failure: {}", f.reason),
        }
    }

    #[tokio::test]
    async fn status_codes_classified() {
        let server = MockServer::start().await;
        for (route, status) in [("/gone", 404), ("/busy", 503), ("/slow", 429), ("/timeout", 408)] {
            Mock::given(path(route))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        assert_eq!(kind(&fetch(&server, "/gone").await), Some(FailureKind::Permanent));
        assert_eq!(kind(&fetch(&server, "/busy").await), Some(FailureKind::Transient));
        assert_eq!(kind(&fetch(&server, "/slow").await), Some(FailureKind::Transient));
        assert_eq!(kind(&fetch(&server, "/timeout").await), Some(FailureKind::Transient));
    }

    #[tokio::test]
    async fn non_html_content_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(path("/plan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4".to_vec()),
            )
            .mount(&server)
            .await;

        assert_eq!(kind(&fetch(&server, "/plan").await), Some(FailureKind::Permanent));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let outcome = fetcher.fetch(&url, &SiteProfile::generic()).await;
        assert_eq!(kind(&outcome), Some(FailureKind::Permanent));
    }

    #[test]
    fn private_targets() {
        for raw in [
            "http://localhost:3000/",
            "http://10.0.0.1/",
            "http://192.168.1.1/admin",
            "http://[::1]/",
            "http://intranet.local/",
        ] {
            assert!(is_private_target(&Url::parse(raw).unwrap()), "{raw}");
        }
        assert!(!is_private_target(&Url::parse("https://med.unne.edu.ar/").unwrap()));
    }

    #[test]
    fn html_content_types() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("Text/HTML; charset=UTF-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("application/json"));
    }
}
