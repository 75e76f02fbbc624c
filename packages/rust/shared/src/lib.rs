//! Shared types, error model, and configuration for SiteKB.
//!
//! This crate is the foundation depended on by all other SiteKB crates.
//! It provides:
//! - [`SiteKbError`], the unified error type
//! - Domain types ([`CrawlJob`], [`JobStatus`], [`DocumentUpsert`], [`ChunkRecord`])
//! - URL identity helpers ([`canonicalize`], [`url_hash`], [`content_hash`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;
pub mod urls;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, CrawlSettings, DedupPolicy, IngestConfig, LlmConfig,
    RetrievalConfig, SiteProfileConfig, StorageConfig, api_key, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{Result, SiteKbError};
pub use types::{
    ChunkRecord, CrawlJob, DocumentRecord, DocumentUpsert, JobId, JobSnapshot, JobStatus,
    NewChunk,
};
pub use urls::{
    canonicalize, content_hash, domain_of, page_type_for, path_segments, sha256_hex, url_hash,
};
