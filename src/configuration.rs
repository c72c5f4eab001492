use crate::cli_args::{Commands, TransactionSourceKind};
use crate::reqwest_helpers::ClientSettings;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(pub String);

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Transaction source after `auto` has been decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceSource {
    Persisted {
        transactions_file: PathBuf,
        refresh_interval: Duration,
    },
    Live {
        cache_ttl: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ExporterConfiguration {
    pub base_url: Url,
    pub host: String,
    pub port: u16,
    pub api_token: Option<ApiToken>,
    pub price_source: PriceSource,
    pub request_timeout: Duration,
    pub requests_per_second: NonZeroU32,
    pub accept_invalid_certs: bool,
}

impl ExporterConfiguration {
    pub fn new(commands: Commands) -> Result<Self> {
        match commands {
            Commands::RunExporter {
                base_url,
                host,
                port,
                api_token,
                transaction_source,
                refresh_interval_secs,
                transactions_file,
                request_timeout_secs,
                live_cache_ttl_secs,
                requests_per_second,
                accept_invalid_certs,
            } => {
                let api_token = api_token
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
                    .map(ApiToken);

                if !matches!(base_url.scheme(), "http" | "https") {
                    bail!("base url {} must be http or https", base_url);
                }

                let use_live = match (transaction_source, &api_token) {
                    (TransactionSourceKind::Live, None) => bail!("the live transaction source needs an api token"),
                    (TransactionSourceKind::Live, Some(_)) => true,
                    (TransactionSourceKind::Persisted, _) => false,
                    (TransactionSourceKind::Auto, token) => token.is_some(),
                };

                let price_source = if use_live {
                    PriceSource::Live {
                        cache_ttl: Duration::from_secs(live_cache_ttl_secs),
                    }
                } else {
                    PriceSource::Persisted {
                        transactions_file,
                        refresh_interval: Duration::from_secs(refresh_interval_secs),
                    }
                };

                Ok(Self {
                    base_url,
                    host,
                    port,
                    api_token,
                    price_source,
                    request_timeout: Duration::from_secs(request_timeout_secs),
                    requests_per_second: NonZeroU32::new(requests_per_second)
                        .context("requests per second must be at least 1")?,
                    accept_invalid_certs,
                })
            }
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: self.request_timeout,
            requests_per_second: self.requests_per_second,
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}
