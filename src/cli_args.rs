use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;

#[derive(Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Which transactions the exported prices are derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransactionSourceKind {
    /// `live` when an api token is configured, `persisted` otherwise
    Auto,
    /// the locally collected history of the public listing feed
    Persisted,
    /// the token-protected per-item endpoint, queried on scrape
    Live,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// runs the exporter
    RunExporter {
        #[arg(long, env("BASE_URL"), default_value = "https://sc-trade.tools/api")]
        base_url: Url,
        #[arg(long, env("HOST"), default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env("PORT"), default_value_t = 9020)]
        port: u16,
        #[arg(long, env("API_TOKEN"), hide_env_values = true)]
        api_token: Option<String>,
        #[arg(long, env("TRANSACTION_SOURCE"), value_enum, default_value_t = TransactionSourceKind::Auto)]
        transaction_source: TransactionSourceKind,
        #[arg(long, env("REFRESH_INTERVAL_SECS"), default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
        refresh_interval_secs: u64,
        #[arg(long, env("TRANSACTIONS_FILE"), default_value = "transactions.csv")]
        transactions_file: PathBuf,
        #[arg(long, env("REQUEST_TIMEOUT_SECS"), default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        request_timeout_secs: u64,
        #[arg(long, env("LIVE_CACHE_TTL_SECS"), default_value_t = 300)]
        live_cache_ttl_secs: u64,
        #[arg(long, env("REQUESTS_PER_SECOND"), default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
        requests_per_second: u32,
        /// skip TLS certificate verification towards the remote API
        #[arg(long, env("ACCEPT_INVALID_CERTS"))]
        accept_invalid_certs: bool,
    },
}
