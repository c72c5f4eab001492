pub mod aggregator;
pub mod cli_args;
pub mod configuration;
pub mod incremental_fetcher;
pub mod metrics_facade;
pub mod pagination;
pub mod refresh_scheduler;
pub mod reqwest_helpers;
pub mod sct_client;
pub mod server;
pub mod ttl_cache;
