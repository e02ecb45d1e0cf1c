use std::sync::Arc;

use futures_util::{stream, StreamExt};

use crate::{
    chain::OptionContract,
    config::Settings,
    provider::AlphaVantageClient,
    store::ChainStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Empty batch; the store was not called.
    Skipped,
    Written(usize),
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub symbols: usize,
    pub rows_fetched: usize,
    pub rows_written: usize,
    pub empty_symbols: Vec<String>,
    pub failed_symbols: Vec<String>,
}

pub struct Ingestor {
    symbols: Vec<String>,
    concurrency: usize,
    provider: AlphaVantageClient,
    store: Arc<dyn ChainStore>,
}

impl Ingestor {
    pub fn new(settings: &Settings, provider: AlphaVantageClient, store: Arc<dyn ChainStore>) -> Self {
        Self {
            symbols: settings.symbols.clone(),
            concurrency: settings.ingest_concurrency.max(1),
            provider,
            store,
        }
    }

    /// Write one symbol's batch. Failures are logged and reported, never raised,
    /// so one bad batch cannot stop the rest of the run.
    pub async fn upsert_chain(&self, symbol: &str, rows: &[OptionContract]) -> UpsertOutcome {
        if rows.is_empty() {
            return UpsertOutcome::Skipped;
        }
        match self.store.upsert_contracts(rows).await {
            Ok(()) => {
                log::info!("ingest.upserted symbol={} rows={}", symbol, rows.len());
                UpsertOutcome::Written(rows.len())
            }
            Err(e) => {
                log::error!(
                    "ingest.upsert_failed symbol={} rows={} err={:#}",
                    symbol,
                    rows.len(),
                    e
                );
                UpsertOutcome::Failed
            }
        }
    }

    /// One pass over the tracked symbols, in order. At most `concurrency`
    /// provider requests are in flight; writes stay sequential per symbol.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport {
            symbols: self.symbols.len(),
            ..Default::default()
        };

        let provider = &self.provider;
        let mut fetched = std::pin::pin!(stream::iter(self.symbols.iter())
            .map(move |symbol| async move {
                log::info!("ingest.symbol symbol={}", symbol);
                let rows = provider.fetch_chain(symbol).await;
                (symbol, rows)
            })
            .buffered(self.concurrency));

        while let Some((symbol, rows)) = fetched.next().await {
            report.rows_fetched += rows.len();
            match self.upsert_chain(symbol, &rows).await {
                UpsertOutcome::Skipped => report.empty_symbols.push(symbol.clone()),
                UpsertOutcome::Written(n) => report.rows_written += n,
                UpsertOutcome::Failed => report.failed_symbols.push(symbol.clone()),
            }
        }

        log::info!(
            "ingest.done symbols={} rows_fetched={} rows_written={} empty={} failed={} store={}",
            report.symbols,
            report.rows_fetched,
            report.rows_written,
            report.empty_symbols.len(),
            report.failed_symbols.len(),
            self.store.describe()
        );
        if !report.failed_symbols.is_empty() {
            log::warn!("ingest.failed_symbols {}", report.failed_symbols.join(","));
        }
        report
    }
}
