//! Application configuration for SiteKB.
//!
//! User config lives at `~/.sitekb/sitekb.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteKbError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitekb.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitekb";

// ---------------------------------------------------------------------------
// Config structs (matching sitekb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Crawl defaults.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Content splitter settings.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Ingestion settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Embedding and chat model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval and answer settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Extra site profiles, keyed by name.
    #[serde(default)]
    pub profiles: BTreeMap<String, SiteProfileConfig>,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` is expanded.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.sitekb/sitekb.db".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Page budget per crawl.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Number of crawl workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Simultaneous in-flight fetches. Defaults to `concurrency` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_concurrency: Option<usize>,

    /// Fetch attempts per URL, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base for the exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Site profile used when the crawl request names none.
    #[serde(default = "default_site_profile")]
    pub site_profile: String,

    /// Directory for markdown artifacts.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,

    /// Extensions admitted besides none and `.html` (without the dot).
    #[serde(default)]
    pub extra_extensions: Vec<String>,

    /// Ingest each page as soon as it is crawled.
    #[serde(default = "default_true")]
    pub realtime_ingest: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            fetch_concurrency: None,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            site_profile: default_site_profile(),
            out_dir: default_out_dir(),
            extra_extensions: Vec::new(),
            realtime_ingest: true,
        }
    }
}

impl CrawlSettings {
    /// Effective fetch concurrency.
    pub fn fetch_limit(&self) -> usize {
        self.fetch_concurrency.unwrap_or(self.concurrency).max(1)
    }
}

fn default_max_pages() -> usize {
    600
}
fn default_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_site_profile() -> String {
    "wordpress_elementor".into()
}
fn default_out_dir() -> String {
    "site_md".into()
}
fn default_true() -> bool {
    true
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Token budget per chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Share of link text at or above which a chunk is boilerplate.
    #[serde(default = "default_boilerplate_link_density")]
    pub boilerplate_link_density: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            boilerplate_link_density: default_boilerplate_link_density(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_boilerplate_link_density() -> f64 {
    0.6
}

/// How re-ingestion of a known canonical URL is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Skip when the stored content hash matches, replace otherwise.
    #[default]
    ContentHash,
    /// Skip whenever the URL is already stored.
    SkipExisting,
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Dedup policy for real-time ingestion. Batch ingestion always uses
    /// [`DedupPolicy::ContentHash`].
    #[serde(default)]
    pub dedup: DedupPolicy,

    /// Language tag stored on documents.
    #[serde(default = "default_language")]
    pub language: String,

    /// Path segments that classify a page, first match wins.
    #[serde(default = "default_page_types")]
    pub page_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::default(),
            language: default_language(),
            page_types: default_page_types(),
        }
    }
}

fn default_language() -> String {
    "es".into()
}
fn default_page_types() -> Vec<String> {
    [
        "asignatura",
        "catedra",
        "noticia",
        "alumnos",
        "academica",
        "posgrado",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Store-wide embedding dimension.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Chat model used for answers.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// HTTP timeout for model calls.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            chat_model: default_chat_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}
fn default_embedding_dim() -> usize {
    1536
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates per search leg.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents expanded into answer context.
    #[serde(default = "default_top_documents")]
    pub top_documents: usize,

    /// Conversation turns sent along with a question.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Idle minutes before a conversation is dropped.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_documents: default_top_documents(),
            history_limit: default_history_limit(),
            session_ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_top_documents() -> usize {
    3
}
fn default_history_limit() -> usize {
    6
}
fn default_session_ttl_minutes() -> u64 {
    60
}

/// `[profiles.<name>]` entry: content extraction rules for one site template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteProfileConfig {
    /// CSS selectors for the main content. Empty means the whole body.
    #[serde(default)]
    pub target_selectors: Vec<String>,

    /// Tag names removed before conversion.
    #[serde(default)]
    pub excluded_tags: Vec<String>,

    /// CSS selectors removed before conversion.
    #[serde(default)]
    pub excluded_selectors: Vec<String>,

    /// Link density above which a markdown block is pruned. `None` disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning_threshold: Option<f64>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitekb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SiteKbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitekb/sitekb.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteKbError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SiteKbError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteKbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteKbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteKbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the model API key from the env var named in `[llm]`.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SiteKbError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
