use crate::aggregator::{Aggregator, LatestPrices};
use crate::refresh_scheduler::FETCH_CYCLES_METRIC;
use crate::sct_client::ScTradeClientTrait;
use anyhow::Result;
use metrics::{describe_counter, describe_gauge, gauge, Label};
use metrics_exporter_prometheus::PrometheusHandle;
use sct_domain::{AggregatedPrice, LeaderboardPosition, PriceKey};
use sct_store::TransactionStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{event, Level};

pub const BUY_PRICE_METRIC: &str = "sc_trading_tools_commodity_buy_price_per_scu_total";
pub const SELL_PRICE_METRIC: &str = "sc_trading_tools_commodity_sell_price_per_scu_total";
pub const LEADERBOARD_POINTS_METRIC: &str = "sc_trading_tools_leaderboard_current_points_total";
pub const TRANSACTIONS_STORED_METRIC: &str = "sc_trading_tools_transactions_stored";

pub fn describe_metrics() {
    describe_gauge!(BUY_PRICE_METRIC, "Commodity total buy price at shop");
    describe_gauge!(SELL_PRICE_METRIC, "Commodity total sell price at shop");
    describe_gauge!(LEADERBOARD_POINTS_METRIC, "Current leaderboard");
    describe_gauge!(TRANSACTIONS_STORED_METRIC, "Number of transactions in the persisted history");
    describe_counter!(FETCH_CYCLES_METRIC, "Fetch cycles of the refresh scheduler by outcome");
}

/// Shop labels only exist for prices of the live source, the listing feed names no shop.
fn price_labels(key: &PriceKey, price: &AggregatedPrice) -> Vec<Label> {
    let mut labels = vec![
        Label::new("commodity", key.commodity.clone()),
        Label::new("system", price.system.clone()),
        Label::new("location", key.location.clone()),
        Label::new("locationType", price.location_type.clone()),
    ];

    if let Some(shop) = &price.shop {
        let security_level = shop
            .security_level
            .map(|level| level.to_string())
            .unwrap_or_else(|| "undefined".to_string());
        labels.push(Label::new("shop", shop.name.clone()));
        labels.push(Label::new("securityLevel", security_level));
        labels.push(Label::new("isHidden", shop.is_hidden.to_string()));
    }

    labels
}

/// Everything one scrape publishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeSnapshot {
    pub prices: LatestPrices,
    pub leaderboard: Vec<LeaderboardPosition>,
    /// only known when the persisted history is the price source
    pub transactions_stored: Option<usize>,
}

#[derive(Clone)]
pub struct MetricsFacade {
    aggregator: Aggregator,
    client: Arc<dyn ScTradeClientTrait>,
    store: Option<Arc<TransactionStore>>,
    handle: PrometheusHandle,
}

impl MetricsFacade {
    pub fn new(
        aggregator: Aggregator,
        client: Arc<dyn ScTradeClientTrait>,
        store: Option<Arc<TransactionStore>>,
        handle: PrometheusHandle,
    ) -> Self {
        Self {
            aggregator,
            client,
            store,
            handle,
        }
    }

    /// Gathers prices and leaderboard concurrently. Either failing fails the scrape.
    pub async fn collect(&self) -> Result<ScrapeSnapshot> {
        let (prices, leaderboard) = tokio::try_join!(
            self.aggregator.latest_buy_and_sell_prices(),
            self.client.get_current_leaderboard()
        )?;

        let transactions_stored = match &self.store {
            Some(store) => Some(store.len().await),
            None => None,
        };

        Ok(ScrapeSnapshot {
            prices,
            leaderboard,
            transactions_stored,
        })
    }

    /// Sets the gauges of the currently installed recorder.
    pub fn record(snapshot: &ScrapeSnapshot) {
        for (key, price) in snapshot.prices.buys.iter() {
            gauge!(BUY_PRICE_METRIC, price_labels(key, price)).set(price.price);
        }

        for (key, price) in snapshot.prices.sells.iter() {
            gauge!(SELL_PRICE_METRIC, price_labels(key, price)).set(price.price);
        }

        // the leaderboard may list a handle more than once, the best position wins
        let points_by_handle: BTreeMap<&str, f64> = snapshot
            .leaderboard
            .iter()
            .rev()
            .map(|entry| (entry.name.as_str(), entry.points))
            .collect();
        for (handle, points) in points_by_handle {
            gauge!(LEADERBOARD_POINTS_METRIC, "handle" => handle.to_string()).set(points);
        }

        if let Some(transactions_stored) = snapshot.transactions_stored {
            gauge!(TRANSACTIONS_STORED_METRIC).set(transactions_stored as f64);
        }
    }

    /// Collects, records and renders the Prometheus text exposition.
    pub async fn scrape(&self) -> Result<String> {
        let snapshot = self.collect().await?;

        event!(
            Level::DEBUG,
            "Scrape: {} buy prices, {} sell prices, {} leaderboard entries",
            snapshot.prices.buys.len(),
            snapshot.prices.sells.len(),
            snapshot.leaderboard.len()
        );

        Self::record(&snapshot);
        Ok(self.handle.render())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aggregator::MockTransactionSource;
    use crate::sct_client::MockScTradeClientTrait;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use sct_domain::{Direction, Location, ReferenceCatalogs, ShopDetails, Timestamp, Transaction};
    use sct_store::InMemoryTransactionLog;
    use tracing_test::traced_test;

    fn everus_gold_sale() -> Transaction {
        Transaction {
            location: "Stanton > Hurston > Everus".to_string(),
            direction: Direction::Sells,
            commodity: "Gold".to_string(),
            price: 100.0,
            quantity: 1.0,
            saturation: 0.5,
            timestamp: Timestamp("2024-01-01T00:00:00Z".to_string()),
            shop: None,
        }
    }

    fn catalogs() -> Arc<ReferenceCatalogs> {
        Arc::new(ReferenceCatalogs::new(
            vec![Location {
                name: "Stanton > Hurston > Everus".to_string(),
                location_type: "station".to_string(),
            }],
            vec!["Gold".to_string()],
        ))
    }

    fn leaderboard() -> Vec<LeaderboardPosition> {
        vec![
            LeaderboardPosition {
                position: 1,
                name: "alice".to_string(),
                points: 1200.0,
            },
            LeaderboardPosition {
                position: 2,
                name: "bob".to_string(),
                points: 800.0,
            },
        ]
    }

    fn facade(source: MockTransactionSource, client: MockScTradeClientTrait, store: Option<Arc<TransactionStore>>) -> MetricsFacade {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        MetricsFacade::new(Aggregator::new(Arc::new(source), catalogs()), Arc::new(client), store, handle)
    }

    /// value of the first sample line starting with `prefix`
    fn sample_value(rendered: &str, prefix: &str) -> Option<f64> {
        rendered
            .lines()
            .find(|line| line.starts_with(prefix))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_collect_gathers_prices_and_leaderboard() {
        let mut source = MockTransactionSource::new();
        source
            .expect_transactions()
            .returning(|| Ok(Arc::new(vec![everus_gold_sale()])));
        let mut client = MockScTradeClientTrait::new();
        client.expect_get_current_leaderboard().returning(|| Ok(leaderboard()));

        let snapshot = facade(source, client, None).collect().await.unwrap();

        assert_eq!(snapshot.prices.sells.len(), 1);
        assert!(snapshot.prices.buys.is_empty());
        assert_eq!(snapshot.leaderboard, leaderboard());
        assert_eq!(snapshot.transactions_stored, None);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_collect_reports_stored_transactions() {
        let mut source = MockTransactionSource::new();
        source.expect_transactions().returning(|| Ok(Arc::new(vec![])));
        let mut client = MockScTradeClientTrait::new();
        client.expect_get_current_leaderboard().returning(|| Ok(vec![]));
        let store = Arc::new(TransactionStore::new(Arc::new(InMemoryTransactionLog::with_transactions(vec![
            everus_gold_sale(),
        ]))));
        store.load().await.unwrap();

        let snapshot = facade(source, client, Some(store)).collect().await.unwrap();

        assert_eq!(snapshot.transactions_stored, Some(1));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_leaderboard_failure_fails_the_scrape() {
        let mut source = MockTransactionSource::new();
        source.expect_transactions().returning(|| Ok(Arc::new(vec![])));
        let mut client = MockScTradeClientTrait::new();
        client
            .expect_get_current_leaderboard()
            .returning(|| Err(anyhow::anyhow!("502 Bad Gateway")));

        assert!(facade(source, client, None).scrape().await.is_err());
    }

    #[test]
    fn test_record_renders_labelled_gauges() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let aggregator_output = sct_domain::latest_prices(&[everus_gold_sale()], Direction::Sells, &catalogs());
        let snapshot = ScrapeSnapshot {
            prices: LatestPrices {
                buys: BTreeMap::new(),
                sells: aggregator_output,
            },
            leaderboard: leaderboard(),
            transactions_stored: Some(42),
        };

        metrics::with_local_recorder(&recorder, || MetricsFacade::record(&snapshot));
        let rendered = handle.render();

        assert_eq!(
            sample_value(
                &rendered,
                r#"sc_trading_tools_commodity_sell_price_per_scu_total{commodity="Gold",system="Stanton",location="Stanton > Hurston > Everus",locationType="station"}"#
            ),
            Some(100.0)
        );
        assert!(!rendered.contains(BUY_PRICE_METRIC));
        assert_eq!(
            sample_value(&rendered, r#"sc_trading_tools_leaderboard_current_points_total{handle="alice"}"#),
            Some(1200.0)
        );
        assert_eq!(
            sample_value(&rendered, r#"sc_trading_tools_leaderboard_current_points_total{handle="bob"}"#),
            Some(800.0)
        );
        assert_eq!(sample_value(&rendered, "sc_trading_tools_transactions_stored"), Some(42.0));
    }

    #[test]
    fn test_duplicate_leaderboard_handle_keeps_best_position() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let snapshot = ScrapeSnapshot {
            leaderboard: vec![
                LeaderboardPosition {
                    position: 1,
                    name: "alice".to_string(),
                    points: 1200.0,
                },
                LeaderboardPosition {
                    position: 7,
                    name: "alice".to_string(),
                    points: 10.0,
                },
            ],
            ..ScrapeSnapshot::default()
        };

        metrics::with_local_recorder(&recorder, || MetricsFacade::record(&snapshot));

        assert_eq!(
            sample_value(&handle.render(), r#"sc_trading_tools_leaderboard_current_points_total{handle="alice"}"#),
            Some(1200.0)
        );
    }

    #[test]
    fn test_live_prices_carry_shop_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let at_shop = |shop: &str, price: f64| Transaction {
            direction: Direction::Buys,
            price,
            shop: Some(ShopDetails {
                name: shop.to_string(),
                security_level: Some(3.0),
                is_hidden: false,
            }),
            ..everus_gold_sale()
        };
        let snapshot = ScrapeSnapshot {
            prices: LatestPrices {
                buys: sct_domain::latest_prices(&[at_shop("Shop A", 90.0), at_shop("Shop B", 95.0)], Direction::Buys, &catalogs()),
                sells: BTreeMap::new(),
            },
            ..ScrapeSnapshot::default()
        };

        metrics::with_local_recorder(&recorder, || MetricsFacade::record(&snapshot));
        let rendered = handle.render();

        let series = |shop: &str| {
            format!(
                r#"sc_trading_tools_commodity_buy_price_per_scu_total{{commodity="Gold",system="Stanton",location="Stanton > Hurston > Everus",locationType="station",shop="{shop}",securityLevel="3",isHidden="false"}}"#
            )
        };
        assert_eq!(sample_value(&rendered, &series("Shop A")), Some(90.0));
        assert_eq!(sample_value(&rendered, &series("Shop B")), Some(95.0));
    }
}
