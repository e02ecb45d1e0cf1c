mod chain;
mod config;
mod dashboard;
mod ingestor;
mod provider;
mod rest_store;
mod store;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::{config::Settings, ingestor::Ingestor, provider::AlphaVantageClient};

#[derive(Debug, Parser)]
#[command(name = "chain-ingestor", version)]
struct Cli {
    /// Override TRACKED_SYMBOLS (comma-separated tickers)
    #[arg(long, global = true)]
    symbols: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch every tracked chain once, upsert it, and exit (default)
    Ingest {
        /// Override INGEST_CONCURRENCY (max in-flight provider requests)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Serve the read-only chain API over the same table
    Serve {
        /// Override DASHBOARD_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(s) = cli.symbols.as_deref() {
        settings.override_symbols(s)?;
    }

    let command = cli.command.unwrap_or(Command::Ingest { concurrency: None });
    if let Command::Ingest { concurrency: Some(n) } = command {
        settings.ingest_concurrency = n;
    }
    if let Command::Serve { port: Some(p) } = command {
        settings.dashboard_port = p;
    }
    settings.validate()?;

    let store = store::open_store(&settings)?;

    log::info!(
        "app.start command={:?} symbols={} concurrency={} store={}",
        command,
        settings.symbols.len(),
        settings.ingest_concurrency,
        store.describe()
    );

    match command {
        Command::Ingest { .. } => {
            let provider = AlphaVantageClient::new(&settings)?;
            Ingestor::new(&settings, provider, store).run().await;
        }
        Command::Serve { .. } => {
            dashboard::serve_dashboard(settings, store).await?;
        }
    }
    Ok(())
}
