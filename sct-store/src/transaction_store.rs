use crate::transaction_log::TransactionLogTrait;
use anyhow::{Context, Result};
use itertools::Itertools;
use sct_domain::{Transaction, TransactionKey};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Deduplicated transaction history, newest-first, backed by a persisted log.
///
/// The in-memory collection is only ever replaced as a whole, so readers holding a
/// [`TransactionStore::snapshot`] never observe a half-applied batch.
#[derive(Debug)]
pub struct TransactionStore {
    log: Arc<dyn TransactionLogTrait>,
    transactions: RwLock<Arc<Vec<Transaction>>>,
    // set while the in-memory collection holds records the log doesn't have yet
    unsaved_changes: AtomicBool,
    save_lock: Mutex<()>,
}

impl TransactionStore {
    pub fn new(log: Arc<dyn TransactionLogTrait>) -> Self {
        Self {
            log,
            transactions: RwLock::new(Arc::new(Vec::new())),
            unsaved_changes: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<LoadReport> {
        let loaded = self.log.load().await.context("Failed to load transaction log")?;

        let report = LoadReport {
            loaded: loaded.transactions.len(),
            skipped: loaded.skipped.len(),
        };

        *self.transactions.write().await = Arc::new(loaded.transactions);
        self.unsaved_changes.store(false, Ordering::SeqCst);

        event!(
            Level::INFO,
            "Loaded {} transactions from log ({} malformed lines skipped)",
            report.loaded,
            report.skipped
        );

        Ok(report)
    }

    pub async fn latest(&self) -> Option<Transaction> {
        self.transactions.read().await.first().cloned()
    }

    pub async fn snapshot(&self) -> Arc<Vec<Transaction>> {
        Arc::clone(&*self.transactions.read().await)
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_changes.load(Ordering::SeqCst)
    }

    /// Puts `new_records` (newest-first) in front of the current history and rewrites the log.
    /// Records whose key is already stored are dropped, the store never holds a key twice.
    /// Returns the number of records actually added.
    ///
    /// The records stay in memory even when the write fails; the error is returned and the
    /// next call (even with an empty batch) persists them.
    pub async fn prepend(&self, new_records: Vec<Transaction>) -> Result<usize> {
        let mut num_new = 0;

        if !new_records.is_empty() {
            let mut guard = self.transactions.write().await;
            let mut known_keys: HashSet<TransactionKey> = guard.iter().map(Transaction::key).collect();
            let num_offered = new_records.len();

            let unknown = new_records
                .into_iter()
                .filter(|tx| known_keys.insert(tx.key()))
                .collect_vec();
            num_new = unknown.len();

            if num_new < num_offered {
                event!(
                    Level::WARN,
                    "Dropped {} of {} new transactions, they are already stored",
                    num_offered - num_new,
                    num_offered
                );
            }

            if num_new > 0 {
                let mut combined = Vec::with_capacity(num_new + guard.len());
                combined.extend(unknown);
                combined.extend(guard.iter().cloned());
                *guard = Arc::new(combined);
                self.unsaved_changes.store(true, Ordering::SeqCst);
            }
        }

        if self.has_unsaved_changes() {
            self.save().await?;
        }

        Ok(num_new)
    }

    /// Writes the current collection. Saves are serialized and always write the newest state.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let snapshot = self.snapshot().await;
        self.unsaved_changes.store(false, Ordering::SeqCst);

        if let Err(err) = self.log.save(&snapshot).await {
            self.unsaved_changes.store(true, Ordering::SeqCst);
            return Err(err.context(format!("Failed to persist {} transactions", snapshot.len())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transaction_log::{InMemoryTransactionLog, LoadedLog, MockTransactionLogTrait, SkippedLine};
    use sct_domain::{DecodeError, Direction, Timestamp};
    use test_log::test;

    fn tx(timestamp: &str) -> Transaction {
        Transaction {
            location: "Stanton > Hurston > Lorville".to_string(),
            direction: Direction::Buys,
            commodity: "Laranite".to_string(),
            price: 28.5,
            quantity: 10.0,
            saturation: 0.1,
            timestamp: Timestamp(timestamp.to_string()),
            shop: None,
        }
    }

    #[test(tokio::test)]
    async fn test_empty_store_has_no_latest() {
        let store = TransactionStore::new(Arc::new(InMemoryTransactionLog::new()));

        store.load().await.unwrap();

        assert_eq!(store.latest().await, None);
        assert!(store.is_empty().await);
    }

    #[test(tokio::test)]
    async fn test_latest_is_first_record_of_log() {
        let log = InMemoryTransactionLog::with_transactions(vec![tx("2024-01-02T00:00:00Z"), tx("2024-01-01T00:00:00Z")]);
        let store = TransactionStore::new(Arc::new(log));

        let report = store.load().await.unwrap();

        assert_eq!(report, LoadReport { loaded: 2, skipped: 0 });
        assert_eq!(store.latest().await, Some(tx("2024-01-02T00:00:00Z")));
    }

    #[test(tokio::test)]
    async fn test_load_reports_skipped_lines() {
        let mut log = MockTransactionLogTrait::new();
        log.expect_load().times(1).returning(|| {
            Ok(LoadedLog {
                transactions: vec![tx("2024-01-01T00:00:00Z")],
                skipped: vec![SkippedLine {
                    line_number: 2,
                    error: DecodeError::FieldCount { expected: 7, found: 1 },
                }],
            })
        });
        let store = TransactionStore::new(Arc::new(log));

        let report = store.load().await.unwrap();

        assert_eq!(report, LoadReport { loaded: 1, skipped: 1 });
        assert_eq!(store.len().await, 1);
    }

    #[test(tokio::test)]
    async fn test_prepend_keeps_newest_first_and_persists() {
        let log = Arc::new(InMemoryTransactionLog::with_transactions(vec![tx("2024-01-01T00:00:00Z")]));
        let store = TransactionStore::new(log.clone());
        store.load().await.unwrap();

        let num_new = store
            .prepend(vec![tx("2024-01-03T00:00:00Z"), tx("2024-01-02T00:00:00Z")])
            .await
            .unwrap();

        let expected = vec![tx("2024-01-03T00:00:00Z"), tx("2024-01-02T00:00:00Z"), tx("2024-01-01T00:00:00Z")];
        assert_eq!(num_new, 2);
        assert_eq!(*store.snapshot().await, expected);
        assert_eq!(log.saved().await, expected);
        assert_eq!(store.latest().await, Some(tx("2024-01-03T00:00:00Z")));
    }

    #[test(tokio::test)]
    async fn test_prepend_of_empty_batch_does_not_write() {
        let mut log = MockTransactionLogTrait::new();
        log.expect_save().never();
        let store = TransactionStore::new(Arc::new(log));

        assert_eq!(store.prepend(vec![]).await.unwrap(), 0);
    }

    #[test(tokio::test)]
    async fn test_failed_write_keeps_records_in_memory_and_retries_on_next_prepend() {
        let log = Arc::new(InMemoryTransactionLog::new());
        let store = TransactionStore::new(log.clone());
        log.set_fail_writes(true);

        let result = store.prepend(vec![tx("2024-01-01T00:00:00Z")]).await;

        assert!(result.is_err());
        assert_eq!(store.len().await, 1);
        assert!(store.has_unsaved_changes());
        assert!(log.saved().await.is_empty());

        log.set_fail_writes(false);
        store.prepend(vec![]).await.unwrap();

        assert!(!store.has_unsaved_changes());
        assert_eq!(log.saved().await, vec![tx("2024-01-01T00:00:00Z")]);
    }

    #[test(tokio::test)]
    async fn test_snapshot_is_not_affected_by_later_prepend() {
        let store = TransactionStore::new(Arc::new(InMemoryTransactionLog::new()));
        store.prepend(vec![tx("2024-01-01T00:00:00Z")]).await.unwrap();

        let before = store.snapshot().await;
        store.prepend(vec![tx("2024-01-02T00:00:00Z")]).await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[test(tokio::test)]
    async fn test_prepend_drops_already_stored_keys() {
        let log = Arc::new(InMemoryTransactionLog::with_transactions(vec![
            tx("2024-01-02T00:00:00Z"),
            tx("2024-01-01T00:00:00Z"),
        ]));
        let store = TransactionStore::new(log.clone());
        store.load().await.unwrap();

        let num_new = store
            .prepend(vec![tx("2024-01-03T00:00:00Z"), tx("2024-01-01T00:00:00Z"), tx("2024-01-03T00:00:00Z")])
            .await
            .unwrap();

        let expected = vec![tx("2024-01-03T00:00:00Z"), tx("2024-01-02T00:00:00Z"), tx("2024-01-01T00:00:00Z")];
        assert_eq!(num_new, 1);
        assert_eq!(*store.snapshot().await, expected);
        assert_eq!(log.saved().await, expected);
    }

    #[test(tokio::test)]
    async fn test_prepend_of_only_known_records_does_not_write() {
        let mut log = MockTransactionLogTrait::new();
        log.expect_load().times(1).returning(|| {
            Ok(LoadedLog {
                transactions: vec![tx("2024-01-01T00:00:00Z")],
                skipped: vec![],
            })
        });
        log.expect_save().never();
        let store = TransactionStore::new(Arc::new(log));
        store.load().await.unwrap();

        assert_eq!(store.prepend(vec![tx("2024-01-01T00:00:00Z")]).await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }
}
