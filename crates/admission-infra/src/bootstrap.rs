//! Startup wiring: one call from configuration to a running admission stack.

use std::sync::Arc;

use admission_core::ConfigError;
use admission_core::domain::RequestIdentity;
use admission_core::ports::CreditLookup;

use crate::config::{AdmissionConfig, StandardPolicies};
use crate::limiter::{ChainVerdict, LimiterChain, RateLimiter, StoreMode, TieredLimiter};
use crate::monitor::{AbuseMonitor, IntervalTicker, Janitor, JanitorHandle, Ticker};
use crate::store::LocalCounterStore;

#[cfg(feature = "redis")]
use crate::store::RedisCounterStore;

/// Limiter, monitor and maintenance loop for one process.
pub struct AdmissionStack {
    pub limiter: Arc<RateLimiter>,
    pub monitor: Arc<AbuseMonitor>,
    pub local: Arc<LocalCounterStore>,
    pub chain: LimiterChain,
    pub policies: StandardPolicies,
    janitor: Option<JanitorHandle>,
}

impl AdmissionStack {
    /// Build the stack. The tiered stage is added only when a credit lookup is given.
    pub async fn from_config(
        config: &AdmissionConfig,
        lookup: Option<Arc<dyn CreditLookup>>,
    ) -> Result<Self, ConfigError> {
        let policies = config.limits.policies()?;
        let monitor = Arc::new(AbuseMonitor::new(config.monitor.clone()));
        let local = Arc::new(LocalCounterStore::new());

        let limiter = Arc::new(connect(config, local.clone()).await?.with_sink(monitor.clone()));

        let tiered = match lookup {
            Some(lookup) => Some(Arc::new(
                TieredLimiter::new(&policies.tiered, config.tiers.clone(), lookup)?
                    .with_lookup_timeout(config.limits.credit_lookup_timeout),
            )),
            None => None,
        };
        let chain = LimiterChain::standard(limiter.clone(), &policies, tiered);

        tracing::info!(
            mode = %limiter.mode(),
            stages = chain.stages().len(),
            "Admission stack ready"
        );

        Ok(Self {
            limiter,
            monitor,
            local,
            chain,
            policies,
            janitor: None,
        })
    }

    pub fn mode(&self) -> StoreMode {
        self.limiter.mode()
    }

    pub async fn admit(&self, identity: &RequestIdentity) -> ChainVerdict {
        self.chain.evaluate(identity).await
    }

    /// Start periodic cleanup at the monitor's configured interval.
    pub fn start_janitor(&mut self) {
        let period = self.monitor.config().cleanup_interval;
        self.start_janitor_with(IntervalTicker::new(period));
    }

    /// Start cleanup driven by `ticker`. A janitor already running is left alone.
    pub fn start_janitor_with<T: Ticker>(&mut self, ticker: T) {
        if self.janitor.is_some() {
            return;
        }
        let janitor = Janitor::new()
            .with_target(self.monitor.clone())
            .with_target(self.local.clone());
        self.janitor = Some(janitor.start(ticker));
    }

    pub fn janitor_running(&self) -> bool {
        self.janitor.as_ref().is_some_and(|j| !j.is_finished())
    }

    pub async fn shutdown(mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.stop().await;
        }
        tracing::info!("Admission stack stopped");
    }
}

#[cfg(feature = "redis")]
async fn connect(
    config: &AdmissionConfig,
    local: Arc<LocalCounterStore>,
) -> Result<RateLimiter, ConfigError> {
    let Some(redis) = &config.redis else {
        tracing::warn!("No shared counter store configured, limits are per instance");
        return Ok(RateLimiter::local_only(local));
    };

    match RedisCounterStore::new(redis.clone()).await {
        Ok(store) => Ok(RateLimiter::new(Arc::new(store), local)),
        Err(e) if redis.fallback_to_memory => {
            tracing::warn!(
                error = %e,
                "Redis unreachable at startup, falling back to local counter store"
            );
            Ok(RateLimiter::local_only(local))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(feature = "redis"))]
async fn connect(
    _config: &AdmissionConfig,
    local: Arc<LocalCounterStore>,
) -> Result<RateLimiter, ConfigError> {
    tracing::warn!("Built without a shared counter store, limits are per instance");
    Ok(RateLimiter::local_only(local))
}
