use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use admission_core::domain::{Exemption, Policy, RequestIdentity, Tier, TierTable};
use admission_core::ports::{Clock, CounterStore, CreditLookup, ManualClock, WindowCount};
use admission_core::{LookupError, StoreError};

use super::{LimiterChain, RateLimiter, StoreMode, TieredLimiter};
use crate::monitor::{AbuseMonitor, MonitorConfig};
use crate::store::LocalCounterStore;

/// Shared-store stand-in that can be switched off mid-test.
#[derive(Default)]
struct FlakyStore {
    inner: LocalCounterStore,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.check()?;
        self.inner.increment(key, window).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.decrement(key).await
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.reset(key).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check()
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

struct FixedBalance {
    balance: i64,
    calls: AtomicUsize,
}

impl FixedBalance {
    fn new(balance: i64) -> Self {
        Self {
            balance,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CreditLookup for FixedBalance {
    async fn credit_balance(&self, _identity: &RequestIdentity) -> Result<i64, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance)
    }
}

struct BrokenLookup;

#[async_trait]
impl CreditLookup for BrokenLookup {
    async fn credit_balance(&self, _identity: &RequestIdentity) -> Result<i64, LookupError> {
        Err(LookupError::Backend("billing database offline".into()))
    }
}

struct SlowLookup;

#[async_trait]
impl CreditLookup for SlowLookup {
    async fn credit_balance(&self, _identity: &RequestIdentity) -> Result<i64, LookupError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(1_000_000)
    }
}

fn policy(name: &str, ceiling: u64) -> Policy {
    Policy::builder(name)
        .ceiling(ceiling)
        .window(Duration::from_secs(60))
        .exempt(Exemption::Path("/health".into()))
        .build()
        .unwrap()
}

fn caller() -> RequestIdentity {
    RequestIdentity::new("POST", "/api/v1/convert")
        .with_api_key("sk_live_4f9a")
        .with_remote_addr("203.0.113.7")
}

fn anonymous() -> RequestIdentity {
    RequestIdentity::new("GET", "/api/v1/status").with_remote_addr("198.51.100.20")
}

fn local_limiter() -> (RateLimiter, Arc<LocalCounterStore>) {
    let local = Arc::new(LocalCounterStore::new());
    (RateLimiter::local_only(local.clone()), local)
}

#[tokio::test]
async fn test_remaining_counts_down_then_denies() {
    let (limiter, _) = local_limiter();
    let policy = policy("general", 5);
    let identity = caller();

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let verdict = limiter.evaluate(&policy, &identity).await;
        assert!(verdict.allowed);
        remaining.push(verdict.remaining);
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let denied = limiter.evaluate(&policy, &identity).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.limit, 5);

    let payload = denied.denial.expect("denial payload");
    assert_eq!(payload.code, "RATE_LIMIT_EXCEEDED");
    assert!(payload.message.contains("limit of 5 per minute"));
    assert!(payload.retry_after_secs > 0 && payload.retry_after_secs <= 60);
}

#[tokio::test]
async fn test_identities_are_counted_separately() {
    let (limiter, local) = local_limiter();
    let policy = policy("general", 1);

    assert!(limiter.evaluate(&policy, &caller()).await.allowed);
    assert!(limiter.evaluate(&policy, &anonymous()).await.allowed);
    assert!(!limiter.evaluate(&policy, &caller()).await.allowed);

    assert_eq!(local.peek("general:api_key:sk_live_4f9a").await, Some(2));
    assert_eq!(local.peek("general:ip:198.51.100.20").await, Some(1));
}

#[tokio::test]
async fn test_window_expiry_starts_fresh_count() {
    let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let local = Arc::new(LocalCounterStore::with_clock(clock.clone()));
    let limiter = RateLimiter::local_only(local).with_clock(clock.clone());
    let policy = policy("general", 2);
    let identity = caller();

    limiter.evaluate(&policy, &identity).await;
    limiter.evaluate(&policy, &identity).await;
    let denied = limiter.evaluate(&policy, &identity).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs(clock.now()), 60);

    clock.advance(Duration::from_secs(30));
    assert!(!limiter.evaluate(&policy, &identity).await.allowed);

    clock.advance(Duration::from_secs(31));
    let fresh = limiter.evaluate(&policy, &identity).await;
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 1);
    assert_eq!(fresh.reset_at, Some(clock.now() + chrono::Duration::seconds(60)));
}

#[tokio::test]
async fn test_exempt_path_never_touches_store() {
    let (limiter, local) = local_limiter();
    let policy = policy("general", 1);
    let health = RequestIdentity::new("GET", "/health").with_remote_addr("203.0.113.7");

    for _ in 0..10 {
        let verdict = limiter.evaluate(&policy, &health).await;
        assert!(verdict.allowed);
        assert!(verdict.exempt);
        assert_eq!(verdict.reset_at, None);
    }
    assert!(local.is_empty().await);
}

#[tokio::test]
async fn test_shared_store_failure_degrades_once() {
    let shared = Arc::new(FlakyStore::default());
    let local = Arc::new(LocalCounterStore::new());
    let limiter = RateLimiter::new(shared.clone(), local.clone());
    let policy = policy("general", 5);
    let identity = caller();
    let key = "general:api_key:sk_live_4f9a";

    assert_eq!(limiter.mode(), StoreMode::Shared);
    for _ in 0..3 {
        assert!(limiter.evaluate(&policy, &identity).await.allowed);
    }
    assert_eq!(shared.inner.peek(key).await, Some(3));
    assert_eq!(local.peek(key).await, None);

    shared.down.store(true, Ordering::SeqCst);

    // The failed request is counted exactly once, in the local store
    let verdict = limiter.evaluate(&policy, &identity).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.remaining, 4);
    assert_eq!(limiter.mode(), StoreMode::Degraded);
    assert_eq!(local.peek(key).await, Some(1));

    let calls = shared.calls.load(Ordering::SeqCst);
    limiter.evaluate(&policy, &identity).await;
    assert_eq!(shared.calls.load(Ordering::SeqCst), calls);
    assert_eq!(local.peek(key).await, Some(2));
    assert_eq!(shared.inner.peek(key).await, Some(3));

    // Recovery only happens on request, and only once the store answers
    assert!(limiter.retry_shared_store().await.is_err());
    assert_eq!(limiter.mode(), StoreMode::Degraded);

    shared.down.store(false, Ordering::SeqCst);
    assert_eq!(limiter.mode(), StoreMode::Degraded);
    assert_eq!(limiter.retry_shared_store().await.unwrap(), StoreMode::Shared);

    let verdict = limiter.evaluate(&policy, &identity).await;
    assert_eq!(verdict.remaining, 1);
    assert_eq!(shared.inner.peek(key).await, Some(4));
}

#[tokio::test]
async fn test_local_only_mode_reports_local() {
    let (limiter, _) = local_limiter();
    assert_eq!(limiter.mode(), StoreMode::Local);
    assert_eq!(limiter.retry_shared_store().await.unwrap(), StoreMode::Local);
    assert_eq!(StoreMode::Degraded.to_string(), "degraded");
}

#[tokio::test]
async fn test_denials_reach_monitor_without_raw_key() {
    let local = Arc::new(LocalCounterStore::new());
    let monitor = Arc::new(AbuseMonitor::new(MonitorConfig::default()));
    let limiter = RateLimiter::local_only(local).with_sink(monitor.clone());
    let policy = policy("general", 2);
    let identity = caller();

    for _ in 0..4 {
        limiter.evaluate(&policy, &identity).await;
    }

    let stats = monitor.stats();
    assert_eq!(stats.rate_limited_requests, 2);
    assert_eq!(stats.top_blocked[0].subject, "203.0.113.7");
    assert_eq!(stats.top_blocked[0].count, 2);

    let events = monitor.recent_events(10);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].policy, "general");
    assert!(events[0].identity.api_key_present);

    let json = serde_json::to_string(&events).unwrap();
    assert!(!json.contains("sk_live_4f9a"));
}

#[tokio::test]
async fn test_refund_returns_quota() {
    let (limiter, local) = local_limiter();
    let policy = policy("general", 2);
    let identity = caller();

    limiter.evaluate(&policy, &identity).await;
    limiter.evaluate(&policy, &identity).await;
    limiter.refund(&policy, &identity).await;
    assert_eq!(local.peek("general:api_key:sk_live_4f9a").await, Some(1));

    let verdict = limiter.evaluate(&policy, &identity).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.remaining, 0);
}

#[tokio::test]
async fn test_admin_reset_clears_counter() {
    let (limiter, _) = local_limiter();
    let policy = policy("general", 1);
    let identity = caller();

    limiter.evaluate(&policy, &identity).await;
    assert!(!limiter.evaluate(&policy, &identity).await.allowed);

    limiter.reset(&policy, &identity).await;
    let verdict = limiter.evaluate(&policy, &identity).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.remaining, 0);
}

#[tokio::test]
async fn test_tiered_anonymous_is_free_without_lookup() {
    let (limiter, _) = local_limiter();
    let lookup = Arc::new(FixedBalance::new(1_000_000));
    let tiered =
        TieredLimiter::new(&policy("tiered", 1), TierTable::default(), lookup.clone()).unwrap();

    let verdict = tiered.evaluate(&limiter, &anonymous()).await;
    assert_eq!(verdict.tier, Some(Tier::Free));
    assert_eq!(verdict.limit, 10);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tiered_balance_selects_ceiling() {
    let (limiter, _) = local_limiter();
    let tiered = TieredLimiter::new(
        &policy("tiered", 1),
        TierTable::default(),
        Arc::new(FixedBalance::new(5_001)),
    )
    .unwrap();

    let verdict = tiered.evaluate(&limiter, &caller()).await;
    assert_eq!(verdict.tier, Some(Tier::Scale));
    assert_eq!(verdict.limit, 120);
    assert_eq!(verdict.remaining, 119);
}

#[tokio::test]
async fn test_tiered_lookup_failure_fails_closed() {
    let (limiter, _) = local_limiter();
    let tiered =
        TieredLimiter::new(&policy("tiered", 1), TierTable::default(), Arc::new(BrokenLookup))
            .unwrap();

    let verdict = tiered.evaluate(&limiter, &caller()).await;
    assert_eq!(verdict.tier, Some(Tier::Free));
    assert_eq!(verdict.limit, 10);

    assert_eq!(tiered.policy_for_name("platinum").ceiling(), 10);
    assert_eq!(tiered.policy_for_name("growth").ceiling(), 60);
}

#[tokio::test(start_paused = true)]
async fn test_tiered_lookup_timeout_fails_closed() {
    let (limiter, _) = local_limiter();
    let tiered =
        TieredLimiter::new(&policy("tiered", 1), TierTable::default(), Arc::new(SlowLookup))
            .unwrap()
            .with_lookup_timeout(Duration::from_millis(200));

    let verdict = tiered.evaluate(&limiter, &caller()).await;
    assert_eq!(verdict.tier, Some(Tier::Free));
    assert_eq!(verdict.limit, 10);
}

#[tokio::test]
async fn test_tiered_exempt_skips_lookup() {
    let (limiter, _) = local_limiter();
    let lookup = Arc::new(FixedBalance::new(100));
    let tiered =
        TieredLimiter::new(&policy("tiered", 1), TierTable::default(), lookup.clone()).unwrap();

    let health = RequestIdentity::new("GET", "/health").with_api_key("sk_live_4f9a");
    assert!(tiered.evaluate(&limiter, &health).await.exempt);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chain_short_circuits_on_first_denial() {
    let local = Arc::new(LocalCounterStore::new());
    let monitor = Arc::new(AbuseMonitor::new(MonitorConfig::default()));
    let limiter = Arc::new(RateLimiter::local_only(local.clone()).with_sink(monitor.clone()));
    let chain = LimiterChain::new(limiter)
        .then(policy("burst", 1))
        .then(policy("general", 10));
    let identity = anonymous();

    let first = chain.evaluate(&identity).await;
    assert!(first.allowed);
    let names: Vec<_> = first.verdicts.iter().map(|v| v.policy.as_str()).collect();
    assert_eq!(names, vec!["burst", "general"]);
    assert_eq!(first.headline().unwrap().policy, "burst");

    let second = chain.evaluate(&identity).await;
    assert!(!second.allowed);
    assert_eq!(second.verdicts.len(), 1);
    assert_eq!(second.denial().unwrap().policy, "burst");

    // The later policy was never consulted for the denied request
    assert_eq!(local.peek("general:ip:198.51.100.20").await, Some(1));

    let stats = monitor.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.rate_limited_requests, 1);
    assert!((stats.block_rate - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_chain_exempt_request_is_not_accounted() {
    let local = Arc::new(LocalCounterStore::new());
    let monitor = Arc::new(AbuseMonitor::new(MonitorConfig::default()));
    let limiter = Arc::new(RateLimiter::local_only(local).with_sink(monitor.clone()));
    let chain = LimiterChain::new(limiter).then(policy("general", 10));

    let verdict = chain
        .evaluate(&RequestIdentity::new("GET", "/health"))
        .await;
    assert!(verdict.allowed);
    assert!(verdict.headline().is_none());
    assert_eq!(monitor.stats().total_requests, 0);
}

#[tokio::test]
async fn test_chain_with_tiered_stage() {
    let (limiter, _) = local_limiter();
    let tiered = TieredLimiter::new(
        &policy("tiered", 1),
        TierTable::default(),
        Arc::new(FixedBalance::new(40)),
    )
    .unwrap();
    let chain = LimiterChain::new(Arc::new(limiter))
        .then(policy("general", 100))
        .then_tiered(Arc::new(tiered));

    let names: Vec<_> = chain.stages().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["general", "tiered"]);

    let verdict = chain.evaluate(&caller()).await;
    assert!(verdict.allowed);
    let headline = verdict.headline().unwrap();
    assert_eq!(headline.policy, "tiered");
    assert_eq!(headline.tier, Some(Tier::Free));
    assert_eq!(headline.remaining, 9);
}
