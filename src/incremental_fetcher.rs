use crate::pagination::fetch_pages_until;
use crate::sct_client::ScTradeClientTrait;
use anyhow::Result;
use sct_domain::{CommodityListing, Timestamp, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{event, Level};

/// Upper bound for one walk through the listing feed. Only hit on a cold start against a huge feed.
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// newest-first, deduplicated
    pub new_transactions: Vec<Transaction>,
    pub pages_fetched: u32,
    pub cursor_found: bool,
    pub skipped_records: usize,
    pub duplicates_dropped: usize,
}

/// Pulls everything newer than the known cursor from the paginated, newest-first listing feed.
#[derive(Debug, Clone)]
pub struct IncrementalFetcher {
    client: Arc<dyn ScTradeClientTrait>,
    max_pages: u32,
}

impl IncrementalFetcher {
    pub fn new(client: Arc<dyn ScTradeClientTrait>) -> Self {
        Self::with_max_pages(client, DEFAULT_MAX_PAGES)
    }

    pub fn with_max_pages(client: Arc<dyn ScTradeClientTrait>, max_pages: u32) -> Self {
        Self { client, max_pages }
    }

    pub async fn fetch_new(&self, known_cursor: Option<&Timestamp>) -> Result<Vec<Transaction>> {
        Ok(self.fetch_new_with_report(known_cursor).await?.new_transactions)
    }

    /// The first remote record whose timestamp equals `known_cursor` ends the walk; it and
    /// everything behind it are already known. Without a cursor the whole feed is read.
    ///
    /// Records that don't decode are skipped. A failing page aborts the whole fetch, nothing
    /// of a partial walk is returned.
    pub async fn fetch_new_with_report(&self, known_cursor: Option<&Timestamp>) -> Result<FetchReport> {
        let cursor = known_cursor.map(|ts| ts.0.as_str());

        match cursor {
            None => event!(Level::INFO, "No known transactions. Fetching complete history"),
            Some(cursor) => event!(Level::INFO, "Fetching transactions newer than {}", cursor),
        }

        let fetched = fetch_pages_until(
            |input| self.client.get_commodity_listings_page(input.page),
            |listing: &CommodityListing| cursor.is_some() && listing.timestamp.as_deref() == cursor,
            self.max_pages,
        )
        .await?;

        let mut seen = HashSet::new();
        let mut new_transactions = Vec::with_capacity(fetched.items.len());
        let mut skipped_records = 0;
        let mut duplicates_dropped = 0;

        for listing in fetched.items {
            match Transaction::try_from(listing) {
                Ok(tx) => {
                    if seen.insert(tx.key()) {
                        new_transactions.push(tx);
                    } else {
                        duplicates_dropped += 1;
                    }
                }
                Err(err) => {
                    event!(Level::WARN, "Skipping malformed commodity listing: {}", err);
                    skipped_records += 1;
                }
            }
        }

        if cursor.is_some() && !fetched.stop_marker_found {
            event!(
                Level::WARN,
                "Known transaction not found in the remote feed. Treating all {} fetched transactions as new",
                new_transactions.len()
            );
        }

        event!(
            Level::INFO,
            "Fetched {} new transactions from {} pages ({} skipped, {} duplicates)",
            new_transactions.len(),
            fetched.pages_fetched,
            skipped_records,
            duplicates_dropped
        );

        Ok(FetchReport {
            new_transactions,
            pages_fetched: fetched.pages_fetched,
            cursor_found: fetched.stop_marker_found,
            skipped_records,
            duplicates_dropped,
        })
    }
}
