//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use sitekb_core::{
    AnswerService, ConversationStore, CrawlRequest, CrawlService, Embedder, IngestionCoordinator,
    JobTracker, OpenAiEmbedder, OpenAiGenerator, RetrievalService,
};
use sitekb_crawler::{HttpFetcher, ProfileRegistry};
use sitekb_shared::{
    AppConfig, JobStatus, api_key, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
use sitekb_storage::{MatchKind, Storage};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SNIPPET_CHARS: usize = 240;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteKB: crawl a website into a searchable knowledge base.
#[derive(Parser)]
#[command(
    name = "sitekb",
    version,
    about = "Crawl a website, ingest it into a local knowledge base, and ask questions over it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.sitekb/sitekb.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[storage] db_path`.
    #[arg(long, env = "SITEKB_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a site, write markdown artifacts, and ingest every page.
    Crawl {
        /// Start URL. Only pages on the same host are followed.
        url: String,

        /// Page budget.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Number of crawl workers.
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Directory for markdown artifacts.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Site profile: generic, wordpress_elementor, med_unne, or a
        /// profile from the config file.
        #[arg(short, long)]
        profile: Option<String>,

        /// Only write artifacts; skip ingestion.
        #[arg(long)]
        no_ingest: bool,
    },

    /// Re-fetch artifacts that have a URL but an empty body, rewriting
    /// them in place.
    Repair {
        /// Artifact directory.
        dir: PathBuf,

        /// Site profile tried before the generic fallback.
        #[arg(short, long)]
        profile: Option<String>,

        /// Only rewrite artifacts; skip ingestion.
        #[arg(long)]
        no_ingest: bool,
    },

    /// Ingest a folder of markdown artifacts.
    Ingest {
        /// Artifact directory.
        dir: PathBuf,
    },

    /// Hybrid search over ingested chunks.
    Search {
        query: String,

        /// Candidates per search leg.
        #[arg(short, default_value_t = 10)]
        k: usize,
    },

    /// Ask a question. Without one, reads questions from stdin.
    Ask {
        question: Option<String>,

        /// Conversation id.
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Show row counts of the knowledge base.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitekb=info",
        1 => "sitekb=debug",
        _ => "sitekb=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Resolved config plus the handles built from it.
struct Context {
    config: AppConfig,
    config_path: Option<PathBuf>,
    db_path: PathBuf,
}

impl Context {
    fn load(config_path: Option<&Path>, db: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        let db_path = db
            .map(Path::to_path_buf)
            .unwrap_or_else(|| expand_home(&config.storage.db_path));
        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            db_path,
        })
    }

    async fn storage(&self) -> Result<Arc<Storage>> {
        let storage = Storage::open(&self.db_path, self.config.llm.embedding_dim).await?;
        Ok(Arc::new(storage))
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let key = api_key(&self.config)?;
        Ok(Arc::new(OpenAiEmbedder::new(&self.config.llm, key)?))
    }

    async fn ingestion(&self) -> Result<Arc<IngestionCoordinator>> {
        Ok(Arc::new(IngestionCoordinator::new(
            self.storage().await?,
            self.embedder()?,
            &self.config.chunking,
            self.config.ingest.clone(),
        )))
    }

    async fn retrieval(&self) -> Result<Arc<RetrievalService>> {
        Ok(Arc::new(RetrievalService::new(
            self.storage().await?,
            self.embedder()?,
            self.config.retrieval.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config, db, command, ..
    } = cli;
    let context = || Context::load(config.as_deref(), db.as_deref());

    match command {
        Command::Crawl {
            url,
            max_pages,
            concurrency,
            out,
            profile,
            no_ingest,
        } => {
            let ctx = context()?;
            let request = CrawlRequest {
                max_pages,
                concurrency,
                out_dir: out,
                site_profile: profile,
                ingest: !no_ingest && ctx.config.crawl.realtime_ingest,
                ..CrawlRequest::new(url)
            };
            cmd_crawl(&ctx, request).await
        }
        Command::Repair {
            dir,
            profile,
            no_ingest,
        } => cmd_repair(&context()?, &dir, profile.as_deref(), !no_ingest).await,
        Command::Ingest { dir } => cmd_ingest(&context()?, &dir).await,
        Command::Search { query, k } => cmd_search(&context()?, &query, k).await,
        Command::Ask { question, session } => {
            cmd_ask(&context()?, question.as_deref(), &session).await
        }
        Command::Stats => cmd_stats(&context()?).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config.as_deref()),
            ConfigAction::Show => cmd_config_show(&context()?),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn crawl_service(ctx: &Context, ingest: bool) -> Result<CrawlService> {
    let settings = &ctx.config.crawl;
    let fetcher = HttpFetcher::new(Duration::from_secs(settings.request_timeout_secs))?;
    let profiles = ProfileRegistry::with_config(&ctx.config.profiles);
    let ingestion = if ingest {
        Some(ctx.ingestion().await?)
    } else {
        None
    };

    Ok(CrawlService::new(
        Arc::new(JobTracker::new()),
        Arc::new(fetcher),
        profiles,
        ingestion,
        settings.clone(),
    ))
}

async fn cmd_crawl(ctx: &Context, request: CrawlRequest) -> Result<()> {
    let settings = &ctx.config.crawl;
    let service = Arc::new(crawl_service(ctx, request.ingest).await?);

    info!(url = %request.start_url, ingest = request.ingest, "starting crawl");
    let max_pages = request.max_pages.unwrap_or(settings.max_pages);
    let job_id = service.start(request).await;

    let bar = ProgressBar::new(max_pages as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} pages {msg}",
        )?
        .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(80));

    let snapshot = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let snapshot = service
            .get_status(job_id)
            .await
            .ok_or_else(|| eyre!("job {job_id} not found"))?;
        bar.set_position(snapshot.job.pages_crawled as u64);
        bar.set_message(format!(
            "{} ingested, {} errors",
            snapshot.job.pages_ingested,
            snapshot.job.errors.len()
        ));
        if snapshot.job.status.is_terminal() {
            break snapshot;
        }
    };
    bar.finish_and_clear();

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if snapshot.job.status == JobStatus::Failed {
        return Err(eyre!("crawl job {job_id} failed"));
    }
    Ok(())
}

async fn cmd_repair(ctx: &Context, dir: &Path, profile: Option<&str>, ingest: bool) -> Result<()> {
    if !dir.is_dir() {
        return Err(eyre!("'{}' is not a directory", dir.display()));
    }
    let service = crawl_service(ctx, ingest).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Repairing {}", dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let summary = service.repair_folder(dir, profile, ingest).await;
    spinner.finish_and_clear();

    println!("{}", serde_json::to_string_pretty(&summary?)?);
    Ok(())
}

async fn cmd_ingest(ctx: &Context, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(eyre!("'{}' is not a directory", dir.display()));
    }
    let ingestion = ctx.ingestion().await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Ingesting {}", dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let summary = ingestion.ingest_folder(dir).await;
    spinner.finish_and_clear();

    println!("{}", serde_json::to_string_pretty(&summary?)?);
    Ok(())
}

async fn cmd_search(ctx: &Context, query: &str, k: usize) -> Result<()> {
    let retrieval = ctx.retrieval().await?;
    let hits = retrieval.search(query, k).await?;

    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let kind = match hit.kind {
            MatchKind::Vector => "vector",
            MatchKind::Keyword => "keyword",
        };
        let location = match &hit.anchor {
            Some(anchor) => format!("{}#{anchor}", hit.url),
            None => hit.url.clone(),
        };
        println!("{:>2}. [{kind} {:.3}] {location}", rank + 1, hit.score);
        if !hit.heading_path.is_empty() {
            println!("    {}", hit.heading_path.join(" > "));
        }
        println!("    {}", snippet(&hit.text));
        println!();
    }
    Ok(())
}

async fn cmd_ask(ctx: &Context, question: Option<&str>, session: &str) -> Result<()> {
    let key = api_key(&ctx.config)?;
    let generator = Arc::new(OpenAiGenerator::new(&ctx.config.llm, key)?);
    let retrieval_config = &ctx.config.retrieval;
    let sessions = Arc::new(ConversationStore::new(Duration::from_secs(
        retrieval_config.session_ttl_minutes * 60,
    )));
    let service = AnswerService::new(
        ctx.retrieval().await?,
        generator,
        Arc::clone(&sessions),
        retrieval_config.history_limit,
    );

    if let Some(question) = question {
        return print_answer(&service, session, question).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if !question.is_empty() {
            sessions.purge_expired();
            print_answer(&service, session, question).await?;
        }
        eprint!("> ");
    }
    Ok(())
}

async fn print_answer(service: &AnswerService, session: &str, question: &str) -> Result<()> {
    let mut stream = service.answer(session, question).await;
    let mut stdout = std::io::stdout();
    while let Some(piece) = stream.recv().await {
        write!(stdout, "{}", piece?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn cmd_stats(ctx: &Context) -> Result<()> {
    if !ctx.db_path.exists() {
        return Err(eyre!("no database at '{}'", ctx.db_path.display()));
    }
    let storage = Storage::open_readonly(&ctx.db_path).await?;
    let stats = storage.stats().await?;

    println!();
    println!("  Database:  {}", ctx.db_path.display());
    println!("  Sources:   {}", stats.sources);
    println!("  Documents: {}", stats.documents);
    println!("  Chunks:    {}", stats.chunks);
    println!("  Dims:      {}", storage.embedding_dim());
    println!();
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        None => init_config()?,
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, toml::to_string_pretty(&AppConfig::default())?)?;
            path.to_path_buf()
        }
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let source = match &ctx.config_path {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}

/// First line-collapsed characters of a chunk.
fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_crawl_overrides() {
        let cli = Cli::try_parse_from([
            "sitekb",
            "--db",
            "/tmp/kb.db",
            "crawl",
            "https://med.unne.edu.ar/",
            "--max-pages",
            "50",
            "-c",
            "3",
            "--profile",
            "med_unne",
            "--no-ingest",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("/tmp/kb.db")));
        match cli.command {
            Command::Crawl {
                url,
                max_pages,
                concurrency,
                profile,
                no_ingest,
                ..
            } => {
                assert_eq!(url, "https://med.unne.edu.ar/");
                assert_eq!(max_pages, Some(50));
                assert_eq!(concurrency, Some(3));
                assert_eq!(profile.as_deref(), Some("med_unne"));
                assert!(no_ingest);
            }
            _ => panic!("expected crawl"),
        }
    }

    #[test]
    fn parse_repair_command() {
        let cli = Cli::try_parse_from(["sitekb", "repair", "site_md", "-p", "generic", "--no-ingest"])
            .unwrap();
        match cli.command {
            Command::Repair {
                dir,
                profile,
                no_ingest,
            } => {
                assert_eq!(dir, PathBuf::from("site_md"));
                assert_eq!(profile.as_deref(), Some("generic"));
                assert!(no_ingest);
            }
            _ => panic!("expected repair"),
        }

        let cli = Cli::try_parse_from(["sitekb", "repair", "site_md"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Repair { profile: None, no_ingest: false, .. }
        ));
    }

    #[test]
    fn search_k_defaults_to_ten() {
        let cli = Cli::try_parse_from(["sitekb", "search", "becas"]).unwrap();
        assert!(matches!(cli.command, Command::Search { k: 10, .. }));
    }

    #[test]
    fn snippet_collapses_whitespace_and_truncates() {
        assert_eq!(snippet("a\n\n  b"), "a b");
        let long = "x".repeat(SNIPPET_CHARS + 10);
        assert_eq!(snippet(&long).chars().count(), SNIPPET_CHARS + 3);
    }
}
