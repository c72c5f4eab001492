use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

/// Single-value cache. Concurrent callers wait for one refresh instead of starting their own.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<T>>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Returns the cached value while it is younger than the ttl, otherwise awaits `refresh`.
    /// A failed refresh leaves the previous entry in place and is not cached.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.entry.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&entry.value));
            }
        }

        let fetched_at = Instant::now();
        let value = Arc::new(refresh().await?);
        *guard = Some(CacheEntry {
            value: Arc::clone(&value),
            fetched_at,
        });

        Ok(value)
    }
}
