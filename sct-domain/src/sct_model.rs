use crate::DecodeError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::Display;

/// Separator between the segments of a hierarchical location name, e.g. `Stanton > Hurston > Everus`.
pub const LOCATION_SEPARATOR: &str = " > ";

pub const UNKNOWN_LOCATION_TYPE: &str = "unknown";

/// ISO-8601 timestamp as reported by the remote source.
/// Ordering is lexicographic, which matches chronological order for this format.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Timestamp(pub String);

impl Timestamp {
    pub fn from_datetime(date_time: DateTime<Utc>) -> Self {
        Timestamp(date_time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Display)]
pub enum Direction {
    #[serde(rename = "BUYS")]
    #[strum(serialize = "BUYS")]
    Buys,
    #[serde(rename = "SELLS")]
    #[strum(serialize = "SELLS")]
    Sells,
}

impl Direction {
    pub fn parse(value: &str) -> Result<Self, DecodeError> {
        match value {
            "BUYS" => Ok(Direction::Buys),
            "SELLS" => Ok(Direction::Sells),
            other => Err(DecodeError::UnknownDirection(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub location: String,
    pub direction: Direction,
    pub commodity: String,
    pub price: f64,
    pub quantity: f64,
    pub saturation: f64,
    pub timestamp: Timestamp,
    /// only the per-item endpoint reports the shop, the listing feed and the persisted log don't
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop: Option<ShopDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShopDetails {
    pub name: String,
    pub security_level: Option<f64>,
    pub is_hidden: bool,
}

/// Identity of a transaction. Two records with the same key are the same observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub location: String,
    pub direction: Direction,
    pub commodity: String,
    pub timestamp: Timestamp,
}

impl Transaction {
    pub fn key(&self) -> TransactionKey {
        TransactionKey {
            location: self.location.clone(),
            direction: self.direction,
            commodity: self.commodity.clone(),
            timestamp: self.timestamp.clone(),
        }
    }

    pub fn system(&self) -> &str {
        system_of(&self.location)
    }
}

pub fn system_of(location_name: &str) -> &str {
    location_name
        .split(LOCATION_SEPARATOR)
        .next()
        .unwrap_or(location_name)
}

/// One entry of `GET /crowdsource/commodity-listings`.
/// Everything is optional on the wire; `Transaction::try_from` decides what is usable.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommodityListing {
    pub location: Option<String>,
    pub transaction: Option<String>,
    pub commodity: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub saturation: Option<f64>,
    pub timestamp: Option<String>,
    pub batch_id: Option<String>,
}

impl TryFrom<CommodityListing> for Transaction {
    type Error = DecodeError;

    fn try_from(listing: CommodityListing) -> Result<Self, Self::Error> {
        let direction = required_text("transaction", listing.transaction)?;

        Ok(Transaction {
            location: required_text("location", listing.location)?,
            direction: Direction::parse(&direction)?,
            commodity: required_text("commodity", listing.commodity)?,
            price: required_number("price", listing.price)?,
            quantity: required_number("quantity", listing.quantity)?,
            saturation: required_number("saturation", listing.saturation)?,
            timestamp: Timestamp(required_text("timestamp", listing.timestamp)?),
            shop: None,
        })
    }
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, DecodeError> {
    match value {
        None => Err(DecodeError::MissingField(field)),
        Some(text) if text.trim().is_empty() => Err(DecodeError::EmptyField(field)),
        Some(text) => Ok(text),
    }
}

fn required_number(field: &'static str, value: Option<f64>) -> Result<f64, DecodeError> {
    match value {
        None => Err(DecodeError::MissingField(field)),
        Some(number) if !number.is_finite() => Err(DecodeError::InvalidNumber {
            field,
            value: number.to_string(),
        }),
        Some(number) => Ok(number),
    }
}

/// Spring-style page envelope. Only `content` and `last` drive the pagination.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub last: bool,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_elements: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, last: bool) -> Self {
        Page {
            content,
            last,
            number: None,
            total_pages: None,
            total_elements: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub name: String,
    #[serde(rename = "type")]
    pub location_type: String,
}

impl Location {
    pub fn unknown(name: &str) -> Self {
        Location {
            name: name.to_string(),
            location_type: UNKNOWN_LOCATION_TYPE.to_string(),
        }
    }
}

/// One entry of `GET /items/{item}/transactions`, the token-protected per-item listing.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemTransaction {
    pub location: String,
    #[serde(default)]
    pub shop: Option<String>,
    #[serde(default)]
    pub security_level: Option<f64>,
    #[serde(default)]
    pub faction: Option<String>,
    pub action: Direction,
    pub item_name: String,
    pub price: f64,
    #[serde(default)]
    pub item_quantity_in_scu: Option<f64>,
    pub quantity_in_scu: f64,
    pub max_quantity_in_scu: f64,
    #[serde(default)]
    pub box_sizes_in_scu: Vec<u32>,
    #[serde(default)]
    pub is_hidden: bool,
}

impl ItemTransaction {
    /// The per-item listing carries no timestamp; every entry of one fetch is observed at `observed_at`.
    /// Entries of different shops at one location stay apart through their [`ShopDetails`].
    pub fn into_transaction(self, observed_at: &Timestamp) -> Transaction {
        let saturation = if self.max_quantity_in_scu > 0.0 {
            self.quantity_in_scu / self.max_quantity_in_scu
        } else {
            0.0
        };

        Transaction {
            location: self.location,
            direction: self.action,
            commodity: self.item_name,
            price: self.price,
            quantity: self.quantity_in_scu,
            saturation,
            timestamp: observed_at.clone(),
            shop: self.shop.map(|name| ShopDetails {
                name,
                security_level: self.security_level,
                is_hidden: self.is_hidden,
            }),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LeaderboardPosition {
    pub position: u32,
    pub name: String,
    pub points: f64,
}
