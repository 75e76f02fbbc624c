//! SiteKB CLI: crawl a site into a searchable knowledge base.
//!
//! Crawls a bounded website, ingests every page into a local libSQL store,
//! and answers questions over it with hybrid retrieval.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
