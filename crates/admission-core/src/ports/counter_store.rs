//! Counter store port.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Post-increment state of a window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count including the increment that produced this value.
    pub count: u64,
    /// When the window closes.
    pub reset_at: DateTime<Utc>,
}

/// Keyed, expiring integer counters.
///
/// `increment` must be indivisible per key and must set the expiry only when the
/// post-increment value is 1. Later increments never move the expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, opening a window of length `window` if this created the counter.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Decrement `key` without touching its expiry. Never drops below zero.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    /// Drop the counter for `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Cheap liveness check.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
