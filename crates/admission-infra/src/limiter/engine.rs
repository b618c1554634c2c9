//! Policy evaluation against the active counter store.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use admission_core::StoreError;
use admission_core::domain::{DenialEvent, Policy, RequestIdentity, Verdict};
use admission_core::ports::{Clock, CounterStore, DenialSink, NoopSink, SystemClock, WindowCount};

use crate::store::LocalCounterStore;

/// Which store the limiter is counting in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Counting in the shared store; limits hold across instances.
    Shared,
    /// The shared store failed; counting locally until an operator calls
    /// [`RateLimiter::retry_shared_store`].
    Degraded,
    /// No shared store was configured.
    Local,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Shared => f.write_str("shared"),
            StoreMode::Degraded => f.write_str("degraded"),
            StoreMode::Local => f.write_str("local"),
        }
    }
}

/// Evaluates policies for request identities.
///
/// Stateless apart from the store mode: the counter store's atomic increment is the
/// only synchronization. Store faults never surface to callers; the first one flips
/// the limiter to the local store for the rest of the process.
pub struct RateLimiter {
    shared: Option<Arc<dyn CounterStore>>,
    local: Arc<LocalCounterStore>,
    degraded: AtomicBool,
    sink: Arc<dyn DenialSink>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Limiter counting in `shared`, with `local` held in reserve.
    pub fn new(shared: Arc<dyn CounterStore>, local: Arc<LocalCounterStore>) -> Self {
        Self {
            shared: Some(shared),
            local,
            degraded: AtomicBool::new(false),
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Limiter with no shared store. Limits are per-process.
    pub fn local_only(local: Arc<LocalCounterStore>) -> Self {
        Self {
            shared: None,
            local,
            degraded: AtomicBool::new(false),
            sink: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DenialSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(&self) -> &Arc<dyn DenialSink> {
        &self.sink
    }

    pub fn mode(&self) -> StoreMode {
        match (&self.shared, self.degraded.load(Ordering::Acquire)) {
            (None, _) => StoreMode::Local,
            (Some(_), true) => StoreMode::Degraded,
            (Some(_), false) => StoreMode::Shared,
        }
    }

    fn active_shared(&self) -> Option<&Arc<dyn CounterStore>> {
        self.shared
            .as_ref()
            .filter(|_| !self.degraded.load(Ordering::Acquire))
    }

    fn degrade(&self, backend: &str, error: &StoreError) {
        if self
            .degraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                backend,
                error = %error,
                "Shared counter store unavailable, switching to local store; \
                 rate limits are now enforced per instance"
            );
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> WindowCount {
        if let Some(shared) = self.active_shared() {
            match shared.increment(key, window).await {
                Ok(count) => return count,
                Err(e) => self.degrade(shared.backend(), &e),
            }
        }

        match self.local.increment(key, window).await {
            Ok(count) => count,
            Err(e) => {
                // Internal faults never deny compliant traffic
                tracing::error!(error = %e, "Local counter store failed, admitting request");
                WindowCount {
                    count: 1,
                    reset_at: self.clock.now(),
                }
            }
        }
    }

    /// Evaluate one policy for one request.
    pub async fn evaluate(&self, policy: &Policy, identity: &RequestIdentity) -> Verdict {
        if policy.is_exempt(identity) {
            tracing::trace!(policy = %policy.name(), path = %identity.path, "Request exempt");
            return Verdict::exempt(policy);
        }

        let key = policy.counter_key(identity);
        let window = self.increment(&key, policy.window()).await;
        let now = self.clock.now();
        let verdict = Verdict::from_count(policy, window.count, window.reset_at, now);

        if verdict.allowed {
            tracing::trace!(
                policy = %policy.name(),
                count = window.count,
                remaining = verdict.remaining,
                "Request allowed"
            );
        } else {
            tracing::debug!(
                policy = %policy.name(),
                ip = %identity.address(),
                api_key_present = identity.has_api_key(),
                limit = policy.ceiling(),
                "Rate limit exceeded"
            );
            self.sink
                .record_denial(DenialEvent::new(identity, &verdict, now));
        }

        verdict
    }

    /// Give back one request's worth of quota, e.g. when the downstream call failed
    /// and the caller chooses not to charge for it.
    pub async fn refund(&self, policy: &Policy, identity: &RequestIdentity) {
        if policy.is_exempt(identity) {
            return;
        }
        let key = policy.counter_key(identity);

        if let Some(shared) = self.active_shared() {
            match shared.decrement(&key).await {
                Ok(()) => return,
                Err(e) => self.degrade(shared.backend(), &e),
            }
        }

        if let Err(e) = self.local.decrement(&key).await {
            tracing::warn!(error = %e, policy = %policy.name(), "Refund failed");
        }
    }

    /// Administrative override: clear one identity's counter for a policy.
    pub async fn reset(&self, policy: &Policy, identity: &RequestIdentity) {
        let key = policy.counter_key(identity);

        if let Some(shared) = self.active_shared() {
            match shared.reset(&key).await {
                Ok(()) => {
                    tracing::info!(policy = %policy.name(), ip = %identity.address(), "Counter reset");
                    return;
                }
                Err(e) => self.degrade(shared.backend(), &e),
            }
        }

        if let Err(e) = self.local.reset(&key).await {
            tracing::warn!(error = %e, policy = %policy.name(), "Counter reset failed");
        }
    }

    /// Administrative recovery: ping the shared store and switch back to it if healthy.
    ///
    /// Counts accumulated locally while degraded are not carried over.
    pub async fn retry_shared_store(&self) -> Result<StoreMode, StoreError> {
        let Some(shared) = &self.shared else {
            return Ok(StoreMode::Local);
        };

        if !self.degraded.load(Ordering::Acquire) {
            return Ok(StoreMode::Shared);
        }

        shared.health_check().await?;
        self.degraded.store(false, Ordering::Release);
        tracing::info!(backend = shared.backend(), "Shared counter store restored");
        Ok(StoreMode::Shared)
    }
}
