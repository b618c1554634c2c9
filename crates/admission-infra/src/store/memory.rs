//! In-memory counter store.
//!
//! DEGRADED MODE ONLY. Counts live in this process, so N instances behind a load
//! balancer each enforce the full ceiling on their own. The limiter uses this store
//! when Redis is unreachable; operators should treat multi-instance limits as
//! per-instance limits for as long as the limiter reports `StoreMode::Degraded`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use admission_core::StoreError;
use admission_core::ports::{Clock, CounterStore, SystemClock, WindowCount};

use crate::monitor::Sweep;

struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Window counters in a `HashMap` behind an async `RwLock`.
///
/// Expired entries are evicted lazily when touched and by [`sweep_expired`](Self::sweep_expired)
/// for keys that are never seen again.
pub struct LocalCounterStore {
    store: RwLock<HashMap<String, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Current count for `key`, or `None` if absent or expired.
    pub async fn peek(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        let store = self.store.read().await;
        store
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.count)
    }

    /// Number of entries held, expired or not.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, entry| !entry.is_expired(now));
        before - store.len()
    }
}

impl Default for LocalCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        // Single write lock makes read-modify-write indivisible per key
        let mut store = self.store.write().await;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(window)
            .ok_or_else(|| StoreError::Operation(format!("window {} out of range", window)))?;

        let entry = store.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now,
        });

        if entry.count > 0 && entry.is_expired(now) {
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count == 1 {
            entry.expires_at = expires_at;
        }

        Ok(WindowCount {
            count: entry.count,
            reset_at: entry.expires_at,
        })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut store = self.store.write().await;

        if let Some(entry) = store.get_mut(key) {
            if entry.is_expired(now) {
                store.remove(key);
            } else {
                entry.count = entry.count.saturating_sub(1);
            }
        }

        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl Sweep for LocalCounterStore {
    fn name(&self) -> &'static str {
        "local-counter-store"
    }

    async fn sweep(&self) -> usize {
        self.sweep_expired().await
    }
}
