use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{event, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sc_trade_exporter::aggregator::{Aggregator, LiveItemSource, PersistedHistorySource, TransactionSource};
use sc_trade_exporter::cli_args::{Cli, Commands};
use sc_trade_exporter::configuration::{ExporterConfiguration, PriceSource};
use sc_trade_exporter::incremental_fetcher::IncrementalFetcher;
use sc_trade_exporter::metrics_facade::{describe_metrics, MetricsFacade};
use sc_trade_exporter::refresh_scheduler::RefreshScheduler;
use sc_trade_exporter::reqwest_helpers::{api_token_header, create_client};
use sc_trade_exporter::sct_client::{ScTradeClient, ScTradeClientTrait};
use sc_trade_exporter::server::{serve, AppState};
use sct_domain::ReferenceCatalogs;
use sct_store::{FileTransactionLog, TransactionStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    match args {
        Cli { command } => match command {
            Commands::RunExporter { .. } => {
                setup_tracing();

                let cfg = ExporterConfiguration::new(command)?;
                event!(Level::INFO, "Starting exporter with {:?}", cfg);

                run_exporter(cfg).await
            }
        },
    }
}

fn setup_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn run_exporter(cfg: ExporterConfiguration) -> Result<()> {
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow!("Failed to install prometheus recorder: {e}"))?;
    describe_metrics();

    let api_token = cfg.api_token.as_ref().map(|token| api_token_header(&token.0)).transpose()?;
    let client: Arc<dyn ScTradeClientTrait> = Arc::new(ScTradeClient::new(
        create_client(&cfg.client_settings())?,
        cfg.base_url.clone(),
        api_token,
    ));

    let (locations, items) = tokio::try_join!(client.get_locations(), client.get_items())
        .context("Failed to fetch reference catalogs")?;
    let catalogs = Arc::new(ReferenceCatalogs::new(locations, items));
    event!(
        Level::INFO,
        "Loaded {} locations and {} items",
        catalogs.num_locations(),
        catalogs.num_items()
    );

    // the refresh job runs as long as the job scheduler handle is held
    let (source, store, _job_scheduler): (Arc<dyn TransactionSource>, Option<Arc<TransactionStore>>, _) = match &cfg.price_source {
        PriceSource::Persisted {
            transactions_file,
            refresh_interval,
        } => {
            let store = Arc::new(TransactionStore::new(Arc::new(FileTransactionLog::new(transactions_file))));
            store.load().await?;

            let scheduler = Arc::new(RefreshScheduler::new(
                IncrementalFetcher::new(Arc::clone(&client)),
                Arc::clone(&store),
                *refresh_interval,
            ));
            let job_scheduler = scheduler.start().await?;

            (
                Arc::new(PersistedHistorySource::new(Arc::clone(&store))) as Arc<dyn TransactionSource>,
                Some(store),
                Some(job_scheduler),
            )
        }
        PriceSource::Live { cache_ttl } => {
            event!(Level::INFO, "Using live item transactions, cached for {:?}", cache_ttl);
            (
                Arc::new(LiveItemSource::new(Arc::clone(&client), Arc::clone(&catalogs), *cache_ttl)) as Arc<dyn TransactionSource>,
                None,
                None,
            )
        }
    };

    let metrics_facade = MetricsFacade::new(Aggregator::new(source, catalogs), client, store, prometheus_handle);

    serve(
        &cfg.host,
        cfg.port,
        AppState {
            metrics_facade: Arc::new(metrics_facade),
        },
    )
    .await
}
