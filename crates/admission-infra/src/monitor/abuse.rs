//! Abuse monitor - passive sink for denial events with rolling aggregates.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, NaiveDate, Utc};

use admission_core::MonitorError;
use admission_core::domain::{
    AggregateStats, BucketCount, DenialEvent, RankedCount, RequestIdentity,
};
use admission_core::ports::{Clock, DenialSink, SystemClock};

use super::janitor::Sweep;

/// Abuse monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Most recent events kept regardless of cleanup cadence.
    pub max_events: usize,
    /// Events and histogram buckets older than this are purged.
    pub retention: Duration,
    /// How often the janitor should run cleanup.
    pub cleanup_interval: Duration,
    /// Length of the ranked lists in stats.
    pub top_n: usize,
    /// Distinct API-key hashes tracked for usage ranking.
    pub max_tracked_keys: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            top_n: 10,
            max_tracked_keys: 10_000,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok());

        Self {
            max_events: var("ABUSE_MONITOR_MAX_EVENTS")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_events),
            retention: var("ABUSE_MONITOR_RETENTION_HOURS")
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.retention),
            cleanup_interval: var("ABUSE_MONITOR_CLEANUP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            top_n: var("ABUSE_MONITOR_TOP_N")
                .map(|v| v as usize)
                .unwrap_or(defaults.top_n),
            max_tracked_keys: var("ABUSE_MONITOR_MAX_TRACKED_KEYS")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_tracked_keys),
        }
    }
}

#[derive(Default)]
struct MonitorState {
    events: VecDeque<DenialEvent>,
    total_requests: u64,
    rate_limited_requests: u64,
    /// Denials per IP over the retained events.
    blocked_by_ip: HashMap<String, u64>,
    hourly: BTreeMap<DateTime<Utc>, u64>,
    daily: BTreeMap<NaiveDate, u64>,
    /// Requests per API-key hash.
    api_key_usage: HashMap<String, u64>,
}

impl MonitorState {
    fn forget(&mut self, event: &DenialEvent) {
        if let Some(count) = self.blocked_by_ip.get_mut(&event.identity.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.blocked_by_ip.remove(&event.identity.ip);
            }
        }
    }
}

/// Records denials and derives statistics and a secondary blocking signal.
///
/// Never gates a request itself. All state sits behind one mutex; a poisoned lock
/// is logged and the update dropped.
pub struct AbuseMonitor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
}

impl AbuseMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, MonitorState>, MonitorError> {
        self.state.lock().map_err(|_| MonitorError::Poisoned)
    }

    /// Record a denial. Failures are logged, never returned.
    pub fn record(&self, event: DenialEvent) {
        if let Err(e) = self.try_record(event) {
            tracing::warn!(error = %e, "Dropping denial event");
        }
    }

    pub fn try_record(&self, event: DenialEvent) -> Result<(), MonitorError> {
        let mut state = self.lock()?;

        state.rate_limited_requests += 1;
        *state
            .blocked_by_ip
            .entry(event.identity.ip.clone())
            .or_insert(0) += 1;

        if let Ok(hour) = event.timestamp.duration_trunc(chrono::Duration::hours(1)) {
            *state.hourly.entry(hour).or_insert(0) += 1;
        }
        *state.daily.entry(event.timestamp.date_naive()).or_insert(0) += 1;

        tracing::debug!(
            ip = %event.identity.ip,
            api_key_present = event.identity.api_key_present,
            policy = %event.policy,
            path = %event.path,
            "Denial recorded"
        );

        state.events.push_back(event);
        while state.events.len() > self.config.max_events {
            if let Some(evicted) = state.events.pop_front() {
                state.forget(&evicted);
            }
        }

        Ok(())
    }

    /// Count one evaluated request toward totals and hashed key usage.
    pub fn try_record_request(&self, identity: &RequestIdentity) -> Result<(), MonitorError> {
        let mut state = self.lock()?;
        state.total_requests += 1;
        if let Some(hash) = identity.redacted().api_key_hash {
            // Keys first seen after the cap is reached are not tracked
            if state.api_key_usage.contains_key(&hash)
                || state.api_key_usage.len() < self.config.max_tracked_keys
            {
                *state.api_key_usage.entry(hash).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// True if `identity` (IP or API-key hash) was denied at least `max_hits` times
    /// within the last `window`.
    pub fn should_block(&self, identity: &str, window: Duration, max_hits: usize) -> bool {
        let now = self.clock.now();
        let since = horizon(now, window);

        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Abuse check skipped");
                return false;
            }
        };

        let hits = state
            .events
            .iter()
            .filter(|e| e.timestamp >= since && e.timestamp <= now)
            .filter(|e| e.identity.matches(identity))
            .count();

        hits >= max_hits
    }

    /// Newest `limit` events, most recent first.
    pub fn recent_events(&self, limit: usize) -> Vec<DenialEvent> {
        match self.lock() {
            Ok(state) => state.events.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> AggregateStats {
        let now = self.clock.now();
        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Serving empty stats");
                return AggregateStats {
                    generated_at: now,
                    total_requests: 0,
                    rate_limited_requests: 0,
                    block_rate: 0.0,
                    retained_events: 0,
                    top_blocked: Vec::new(),
                    hourly: Vec::new(),
                    daily: Vec::new(),
                    top_api_keys: Vec::new(),
                };
            }
        };

        let block_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.rate_limited_requests as f64 / state.total_requests as f64 * 100.0
        };

        AggregateStats {
            generated_at: now,
            total_requests: state.total_requests,
            rate_limited_requests: state.rate_limited_requests,
            block_rate,
            retained_events: state.events.len(),
            top_blocked: top_n(&state.blocked_by_ip, self.config.top_n),
            hourly: state
                .hourly
                .iter()
                .map(|(hour, count)| BucketCount {
                    bucket: hour.format("%Y-%m-%dT%H:00").to_string(),
                    count: *count,
                })
                .collect(),
            daily: state
                .daily
                .iter()
                .map(|(day, count)| BucketCount {
                    bucket: day.format("%Y-%m-%d").to_string(),
                    count: *count,
                })
                .collect(),
            top_api_keys: top_n(&state.api_key_usage, self.config.top_n),
        }
    }

    /// Purge events and buckets older than the retention horizon.
    /// Returns how many events were dropped.
    pub fn cleanup(&self) -> usize {
        let cutoff = horizon(self.clock.now(), self.config.retention);

        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Abuse monitor cleanup skipped");
                return 0;
            }
        };

        // Appends are not strictly time-ordered, so check every event
        let (kept, expired): (VecDeque<DenialEvent>, VecDeque<DenialEvent>) = state
            .events
            .drain(..)
            .partition(|e| e.timestamp >= cutoff);
        state.events = kept;
        for event in &expired {
            state.forget(event);
        }
        let removed = expired.len();

        let hour = chrono::Duration::hours(1);
        state.hourly.retain(|start, _| *start + hour > cutoff);
        let cutoff_day = cutoff.date_naive();
        state.daily.retain(|day, _| *day >= cutoff_day);

        tracing::info!(
            removed,
            retained = state.events.len(),
            "Abuse monitor cleanup complete"
        );
        removed
    }
}

/// `now - window`, saturating at the earliest representable instant.
fn horizon(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn top_n(counts: &HashMap<String, u64>, n: usize) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .iter()
        .map(|(subject, count)| RankedCount {
            subject: subject.clone(),
            count: *count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.subject.cmp(&b.subject)));
    ranked.truncate(n);
    ranked
}

impl DenialSink for AbuseMonitor {
    fn record_request(&self, identity: &RequestIdentity) {
        if let Err(e) = self.try_record_request(identity) {
            tracing::warn!(error = %e, "Dropping request accounting");
        }
    }

    fn record_denial(&self, event: DenialEvent) {
        self.record(event);
    }
}

#[async_trait]
impl Sweep for AbuseMonitor {
    fn name(&self) -> &'static str {
        "abuse-monitor"
    }

    async fn sweep(&self) -> usize {
        self.cleanup()
    }
}
