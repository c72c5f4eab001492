use crate::{system_of, Direction, ReferenceCatalogs, ShopDetails, Timestamp, Transaction};
use itertools::Itertools;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct PriceKey {
    pub commodity: String,
    pub location: String,
    pub shop: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPrice {
    pub price: f64,
    pub system: String,
    pub location_type: String,
    pub timestamp: Timestamp,
    pub shop: Option<ShopDetails>,
}

/// Latest price per (commodity, location, shop) for one direction.
///
/// Transactions without a shop form one group per (commodity, location). Transactions are grouped by the names as reported; the one with the greatest timestamp wins
/// (on equal timestamps the later one in iteration order). The winners are then canonicalized
/// against the catalogs. Groups that collapse onto the same canonical key are resolved by
/// latest-wins again.
pub fn latest_prices<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    direction: Direction,
    catalogs: &ReferenceCatalogs,
) -> BTreeMap<PriceKey, AggregatedPrice> {
    let mut latest_by_reported_key: HashMap<(&str, &str, Option<&str>), &Transaction> = HashMap::new();

    for tx in transactions.into_iter().filter(|tx| tx.direction == direction) {
        let shop = tx.shop.as_ref().map(|shop| shop.name.as_str());
        match latest_by_reported_key.entry((tx.commodity.as_str(), tx.location.as_str(), shop)) {
            Entry::Occupied(mut entry) => {
                if tx.timestamp >= entry.get().timestamp {
                    entry.insert(tx);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }
    }

    latest_by_reported_key
        .into_values()
        .sorted_by(|a, b| a.timestamp.cmp(&b.timestamp))
        .map(|tx| {
            let location = catalogs.resolve_location(&tx.location);
            let key = PriceKey {
                commodity: catalogs.canonical_commodity(&tx.commodity),
                location: location.name.clone(),
                shop: tx.shop.as_ref().map(|shop| shop.name.clone()),
            };
            let price = AggregatedPrice {
                price: tx.price,
                system: system_of(&location.name).to_string(),
                location_type: location.location_type,
                timestamp: tx.timestamp.clone(),
                shop: tx.shop.clone(),
            };
            (key, price)
        })
        .collect()
}
