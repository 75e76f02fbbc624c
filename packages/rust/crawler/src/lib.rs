//! Site crawling: frontier, fetcher, site profiles, and the worker pool.
//!
//! This crate provides:
//! - [`Frontier`] and [`Scope`], the shared work queue and host filter
//! - [`Fetcher`] with the `reqwest`-backed [`HttpFetcher`]
//! - [`ProfileRegistry`], named content extraction rules
//! - [`Crawler`], the concurrent worker pool with retry and backoff

pub mod engine;
pub mod fetcher;
pub mod frontier;
pub mod profiles;

pub use engine::{
    CrawlOptions, CrawlReporter, CrawlSink, CrawlSummary, Crawler, PageArtifact, RetryPolicy,
    extract_links,
};
pub use fetcher::{FailureKind, FetchFailure, FetchOutcome, FetchedPage, Fetcher, HttpFetcher};
pub use frontier::{Claim, Frontier, Lease, Scope};
pub use profiles::{ProfileRegistry, SiteProfile};
