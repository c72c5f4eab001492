use crate::sct_client::ScTradeClientTrait;
use crate::ttl_cache::TtlCache;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use itertools::Itertools;
use mockall::automock;
use sct_domain::{latest_prices, AggregatedPrice, Direction, PriceKey, ReferenceCatalogs, Timestamp, Transaction};
use sct_store::TransactionStore;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, trace_span, Instrument, Level};

pub const DEFAULT_LIVE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Where the aggregator gets its raw transactions from.
#[automock]
#[async_trait]
pub trait TransactionSource: Send + Sync + Debug {
    async fn transactions(&self) -> Result<Arc<Vec<Transaction>>>;
}

/// Reads the history collected by the refresh scheduler.
#[derive(Debug)]
pub struct PersistedHistorySource {
    store: Arc<TransactionStore>,
}

impl PersistedHistorySource {
    pub fn new(store: Arc<TransactionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TransactionSource for PersistedHistorySource {
    async fn transactions(&self) -> Result<Arc<Vec<Transaction>>> {
        Ok(self.store.snapshot().await)
    }
}

/// Asks the token-protected per-item endpoint for every catalog item.
/// Results are cached, the endpoint is too expensive to hit on every scrape.
#[derive(Debug)]
pub struct LiveItemSource {
    client: Arc<dyn ScTradeClientTrait>,
    catalogs: Arc<ReferenceCatalogs>,
    cache: TtlCache<Vec<Transaction>>,
}

impl LiveItemSource {
    pub fn new(client: Arc<dyn ScTradeClientTrait>, catalogs: Arc<ReferenceCatalogs>, cache_ttl: Duration) -> Self {
        Self {
            client,
            catalogs,
            cache: TtlCache::new(cache_ttl),
        }
    }

    async fn fetch_all_items(&self) -> Result<Vec<Transaction>> {
        let observed_at = Timestamp::from_datetime(Utc::now());
        let items = self.catalogs.items().cloned().sorted().collect_vec();
        let span = trace_span!("fetch_item_transactions", num_items = items.len());

        async {
            event!(Level::DEBUG, "Fetching transactions of {} items", items.len());

            let results = join_all(
                items
                    .iter()
                    .map(|item| async move { (item, self.client.get_item_transactions(item).await) }),
            )
            .await;

            let mut transactions = Vec::new();
            let mut num_failed = 0;

            for (item, result) in results {
                match result {
                    Ok(item_transactions) => {
                        transactions.extend(item_transactions.into_iter().map(|it| it.into_transaction(&observed_at)));
                    }
                    Err(err) => {
                        num_failed += 1;
                        event!(Level::WARN, "Failed to fetch transactions of item {}: {:#}", item, err);
                    }
                }
            }

            if !items.is_empty() && num_failed == items.len() {
                bail!("Fetching item transactions failed for all {} items", items.len());
            }

            event!(
                Level::INFO,
                "Fetched {} transactions of {} items ({} failed)",
                transactions.len(),
                items.len() - num_failed,
                num_failed
            );

            Ok(transactions)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl TransactionSource for LiveItemSource {
    async fn transactions(&self) -> Result<Arc<Vec<Transaction>>> {
        self.cache.get_or_refresh(|| self.fetch_all_items()).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestPrices {
    pub buys: BTreeMap<PriceKey, AggregatedPrice>,
    pub sells: BTreeMap<PriceKey, AggregatedPrice>,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    source: Arc<dyn TransactionSource>,
    catalogs: Arc<ReferenceCatalogs>,
}

impl Aggregator {
    pub fn new(source: Arc<dyn TransactionSource>, catalogs: Arc<ReferenceCatalogs>) -> Self {
        Self { source, catalogs }
    }

    pub async fn latest_prices(&self, direction: Direction) -> Result<BTreeMap<PriceKey, AggregatedPrice>> {
        let transactions = self.source.transactions().await?;
        Ok(latest_prices(transactions.iter(), direction, &self.catalogs))
    }

    /// Both directions from a single read of the source.
    pub async fn latest_buy_and_sell_prices(&self) -> Result<LatestPrices> {
        let transactions = self.source.transactions().await?;

        Ok(LatestPrices {
            buys: latest_prices(transactions.iter(), Direction::Buys, &self.catalogs),
            sells: latest_prices(transactions.iter(), Direction::Sells, &self.catalogs),
        })
    }
}
