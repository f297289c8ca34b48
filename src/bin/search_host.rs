//! Headless search host for stdin/stdout JSON communication.
//!
//! Reads `SearchRequest` messages as newline-delimited JSON from stdin and
//! writes one `SearchResponse` or failure envelope per line to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use std::path::PathBuf;

use clap::Parser;
use research_assistant::AppConfig;
use research_assistant::bridge::run_stdio_bridge;
use research_search::SearchService;
use tracing_subscriber::EnvFilter;

/// Aggregated multi-backend search over a JSON stdio bridge.
#[derive(Parser)]
#[command(name = "research-search-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    // Stderr only; stdout is reserved for the JSON protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!("research-search-host starting");

    let service = SearchService::new(config.search)?;
    let outcome = run_stdio_bridge(&service).await;
    service.shutdown();

    outcome.map_err(|e| {
        tracing::error!(error = %e, "research-search-host exited with error");
        anyhow::anyhow!("research-search-host failed: {e}")
    })?;

    tracing::info!("research-search-host shut down cleanly");
    Ok(())
}
