use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smi_core::SymbolSet;
use smi_feed::{RedditFeed, RedditFeedConfig};
use smi_ingest::{load_symbol_set, Config, Ingester, StreamRetry};
use smi_store::PgStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "smi-cli")]
#[command(about = "Symbol mention ingester command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One-shot pull of the channel's most recent submissions.
    Backfill {
        #[arg(long, default_value_t = 1000)]
        limit: u32,
    },
    /// Stream live comments, persisting parents, comments, and mentions.
    Stream,
    /// Apply the versioned schema.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in development; a missing file is fine.
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Stream) {
        Commands::Backfill { limit } => {
            let store = connect_store(&config).await?;
            let feed = connect_feed(&config).await?;
            let ingester = Ingester::new(feed, store, SymbolSet::new());
            let summary = ingester.backfill(limit).await?;
            println!(
                "backfill complete: run_id={} fetched={} inserted={} skipped={} failed={}",
                summary.run_id,
                summary.fetched,
                summary.inserted,
                summary.skipped,
                summary.failed
            );
        }
        Commands::Stream => {
            let store = connect_store(&config).await?;
            let feed = connect_feed(&config).await?;
            let symbols = load_symbol_set(&store, &config.user_agent, config.http_timeout).await?;
            let ingester = Ingester::new(feed, store, symbols)
                .with_stream_retry(StreamRetry::from_base(config.retry_base_delay));

            tokio::select! {
                result = ingester.run_stream() => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, stopping stream");
                }
            }
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn connect_store(config: &Config) -> Result<PgStore> {
    PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")
}

async fn connect_feed(config: &Config) -> Result<RedditFeed> {
    let mut feed_config = RedditFeedConfig::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        config.user_agent.clone(),
        config.channel.clone(),
    );
    feed_config.timeout = config.http_timeout;
    RedditFeed::connect(feed_config)
        .await
        .context("connecting to feed")
}
