//! Core pipeline orchestration for SiteKB.
//!
//! This crate ties crawling, artifacts, chunking, embedding, and storage
//! together: the crawl job service, the ingestion coordinator, hybrid
//! retrieval, and conversational answers.

pub mod answer;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod jobs;
pub mod retrieval;
pub mod service;
pub mod sessions;

pub use answer::{AnswerService, NO_RESULTS_REPLY, format_context};
pub use embedding::{Embedder, OpenAiEmbedder};
pub use generation::{Generator, OpenAiGenerator, Role, Turn};
pub use ingest::{BatchSummary, IngestAction, IngestOutcome, IngestionCoordinator, PageInput};
pub use jobs::JobTracker;
pub use retrieval::{DocumentContext, RetrievalService};
pub use service::{CrawlRequest, CrawlService, RepairError, RepairSummary};
pub use sessions::ConversationStore;
