use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::identity::{RedactedIdentity, RequestIdentity};
use crate::domain::verdict::Verdict;

/// Record of one denied request. Carries no raw credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub identity: RedactedIdentity,
    pub method: String,
    pub path: String,
    pub policy: String,
    pub ceiling: u64,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl DenialEvent {
    pub fn new(identity: &RequestIdentity, verdict: &Verdict, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            identity: identity.redacted(),
            method: identity.method.clone(),
            path: identity.path.clone(),
            policy: verdict.policy.clone(),
            ceiling: verdict.limit,
            remaining: verdict.remaining,
            reset_at: verdict.reset_at,
        }
    }
}

/// A subject (IP or key hash) with its count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub subject: String,
    pub count: u64,
}

/// Histogram bucket, labelled `YYYY-MM-DDTHH:00` (hourly) or `YYYY-MM-DD` (daily).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: String,
    pub count: u64,
}

/// Read view over the abuse monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStats {
    pub generated_at: DateTime<Utc>,
    pub total_requests: u64,
    pub rate_limited_requests: u64,
    /// Percentage of requests denied, 0.0 when nothing was seen.
    pub block_rate: f64,
    pub retained_events: usize,
    pub top_blocked: Vec<RankedCount>,
    pub hourly: Vec<BucketCount>,
    pub daily: Vec<BucketCount>,
    pub top_api_keys: Vec<RankedCount>,
}
