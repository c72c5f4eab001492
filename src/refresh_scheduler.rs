use crate::incremental_fetcher::IncrementalFetcher;
use anyhow::{anyhow, Context, Result};
use chrono::{TimeDelta, Utc};
use metrics::counter;
use sct_store::TransactionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{event, Level};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub const FETCH_CYCLES_METRIC: &str = "sc_trading_tools_fetch_cycles_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { new_records: usize, total_records: usize },
    /// another cycle was still running
    Skipped,
}

/// Periodically pulls new remote transactions into the store.
#[derive(Debug)]
pub struct RefreshScheduler {
    fetcher: IncrementalFetcher,
    store: Arc<TransactionStore>,
    refresh_interval: Duration,
    in_flight: Mutex<()>,
}

impl RefreshScheduler {
    pub fn new(fetcher: IncrementalFetcher, store: Arc<TransactionStore>, refresh_interval: Duration) -> Self {
        Self {
            fetcher,
            store,
            refresh_interval,
            in_flight: Mutex::new(()),
        }
    }

    /// One fetch-and-merge. Never runs concurrently with itself, an overlapping call is skipped.
    ///
    /// A failed fetch leaves the store untouched. A failed save keeps the merged records in
    /// memory, the next cycle retries the write.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(CycleOutcome::Skipped);
        };

        let cursor = self.store.latest().await.map(|tx| tx.timestamp);

        let new_records = self
            .fetcher
            .fetch_new(cursor.as_ref())
            .await
            .context("Fetching new transactions failed")?;

        // records the store already holds are dropped by `prepend`, which matters when the
        // cursor vanished from the remote feed and the whole feed comes back as new
        let num_new = self.store.prepend(new_records).await?;

        Ok(CycleOutcome::Completed {
            new_records: num_new,
            total_records: self.store.len().await,
        })
    }

    /// [`Self::run_cycle`] for the background job: the outcome is logged and counted, never returned.
    pub async fn run_logged_cycle(&self) -> Option<CycleOutcome> {
        let result = self.run_cycle().await;

        let outcome = match &result {
            Ok(CycleOutcome::Completed { new_records, total_records }) => {
                event!(
                    Level::INFO,
                    "Stored {} new transactions, {} transactions in total",
                    new_records,
                    total_records
                );
                "success"
            }
            Ok(CycleOutcome::Skipped) => {
                event!(Level::WARN, "Previous fetch cycle is still running. Skipping this one");
                "skipped"
            }
            Err(err) => {
                event!(Level::ERROR, "Fetch cycle failed: {:#}", err);
                "failure"
            }
        };
        counter!(FETCH_CYCLES_METRIC, "outcome" => outcome).increment(1);

        if let Ok(delta) = TimeDelta::from_std(self.refresh_interval) {
            event!(Level::INFO, "Next fetch will be at {}", Utc::now() + delta);
        }

        result.ok()
    }

    /// Runs the first cycle right away, then one every `refresh_interval` in the background.
    /// The returned scheduler keeps running the job as long as it is alive.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        self.run_logged_cycle().await;

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create job scheduler: {e:?}"))?;

        let this = Arc::clone(&self);
        let job = Job::new_repeated_async(self.refresh_interval, move |_uuid, _lock| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.run_logged_cycle().await;
            })
        })
        .map_err(|e| anyhow!("Failed to create refresh job: {e:?}"))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to schedule refresh job: {e:?}"))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start job scheduler: {e:?}"))?;

        event!(Level::INFO, "Refreshing transactions every {:?}", self.refresh_interval);

        Ok(scheduler)
    }
}
