//! Admission configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use admission_core::PolicyError;
use admission_core::domain::{Exemption, KeyStrategy, Policy, PolicyBuilder, TierTable};

use crate::monitor::MonitorConfig;
use crate::telemetry::TelemetryConfig;

#[cfg(feature = "redis")]
use crate::store::RedisStoreConfig;

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Ceiling and window for one named limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySettings {
    pub max_requests: u64,
    pub window: Duration,
}

impl PolicySettings {
    pub const fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Reads `RATE_LIMIT_<NAME>_MAX_REQUESTS` and `RATE_LIMIT_<NAME>_WINDOW_SECS`.
    /// Unparseable values keep the default; zero is kept and rejected when the policy is built.
    pub fn from_env(name: &str, default: Self) -> Self {
        let name = name.to_uppercase();
        Self {
            max_requests: env_u64(&format!("RATE_LIMIT_{}_MAX_REQUESTS", name))
                .unwrap_or(default.max_requests),
            window: env_u64(&format!("RATE_LIMIT_{}_WINDOW_SECS", name))
                .map(Duration::from_secs)
                .unwrap_or(default.window),
        }
    }
}

/// Policies of the standard chain.
#[derive(Debug, Clone)]
pub struct StandardPolicies {
    pub burst: Policy,
    pub general: Policy,
    pub ip: Policy,
    pub conversion: Policy,
    /// Base for the tier-derived limiter; its ceiling is replaced per tier.
    pub tiered: Policy,
}

/// Settings for every limiter the service runs.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub general: PolicySettings,
    pub conversion: PolicySettings,
    pub burst: PolicySettings,
    pub ip: PolicySettings,
    /// Window of the tier-derived limiter. Ceilings come from the tier table.
    pub tier_window: Duration,
    /// Route family the conversion policy applies to.
    pub conversion_prefix: String,
    /// Paths no limiter counts.
    pub exempt_paths: Vec<String>,
    pub credit_lookup_timeout: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            general: PolicySettings::new(100, 15 * 60),
            conversion: PolicySettings::new(10, 60),
            burst: PolicySettings::new(20, 10),
            ip: PolicySettings::new(300, 15 * 60),
            tier_window: Duration::from_secs(60),
            conversion_prefix: "/api/v1/convert".to_string(),
            exempt_paths: vec!["/health".to_string(), "/ready".to_string()],
            credit_lookup_timeout: Duration::from_millis(500),
        }
    }
}

impl LimiterSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            general: PolicySettings::from_env("general", defaults.general),
            conversion: PolicySettings::from_env("conversion", defaults.conversion),
            burst: PolicySettings::from_env("burst", defaults.burst),
            ip: PolicySettings::from_env("ip", defaults.ip),
            tier_window: env_u64("RATE_LIMIT_TIER_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.tier_window),
            conversion_prefix: env::var("RATE_LIMIT_CONVERSION_PREFIX")
                .unwrap_or(defaults.conversion_prefix),
            exempt_paths: env::var("RATE_LIMIT_EXEMPT_PATHS")
                .map(|v| parse_paths(&v))
                .unwrap_or(defaults.exempt_paths),
            credit_lookup_timeout: env_u64("CREDIT_LOOKUP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.credit_lookup_timeout),
        }
    }

    fn builder(&self, name: &str, settings: PolicySettings) -> PolicyBuilder {
        self.exempt_paths.iter().fold(
            Policy::builder(name)
                .ceiling(settings.max_requests)
                .window(settings.window),
            |builder, path| builder.exempt(Exemption::Path(path.clone())),
        )
    }

    /// Build the standard policies, validating every ceiling and window.
    pub fn policies(&self) -> Result<StandardPolicies, PolicyError> {
        Ok(StandardPolicies {
            burst: self
                .builder("burst", self.burst)
                .denial_message("Too many requests in a short period: limit of {limit} per {window}")
                .build()?,
            general: self.builder("general", self.general).build()?,
            ip: self
                .builder("ip_wide", self.ip)
                .key_strategy(KeyStrategy::Ip)
                .build()?,
            conversion: self
                .builder("conversion", self.conversion)
                .exempt(Exemption::OutsidePrefix(self.conversion_prefix.clone()))
                .denial_message("Conversion limit of {limit} per {window} reached")
                .build()?,
            // Ceiling is a placeholder; TieredLimiter derives one policy per tier
            tiered: self
                .builder(
                    "tiered",
                    PolicySettings {
                        max_requests: 1,
                        window: self.tier_window,
                    },
                )
                .denial_message("Plan limit of {limit} per {window} reached for your tier")
                .build()?,
        })
    }
}

fn parse_paths(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Everything the admission stack needs at startup.
#[derive(Debug, Clone, Default)]
pub struct AdmissionConfig {
    /// Shared store; `None` runs local-only.
    #[cfg(feature = "redis")]
    pub redis: Option<RedisStoreConfig>,
    pub limits: LimiterSettings,
    /// Credit ladder for the tier-derived limiter.
    pub tiers: TierTable,
    pub monitor: MonitorConfig,
    pub telemetry: TelemetryConfig,
}

impl AdmissionConfig {
    /// Load configuration from environment variables.
    ///
    /// Redis is configured only when `REDIS_URL` is set.
    pub fn from_env() -> Self {
        Self {
            #[cfg(feature = "redis")]
            redis: env::var("REDIS_URL")
                .ok()
                .map(|_| RedisStoreConfig::from_env()),
            limits: LimiterSettings::from_env(),
            tiers: tiers_from_env(),
            monitor: MonitorConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }
}

/// Reads `RATE_LIMIT_TIER_LADDER` (see [`TierTable::parse`]). An invalid ladder is
/// logged and the default ladder kept.
fn tiers_from_env() -> TierTable {
    match env::var("RATE_LIMIT_TIER_LADDER") {
        Ok(ladder) => TierTable::parse(&ladder).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid tier ladder, using default");
            TierTable::default()
        }),
        Err(_) => TierTable::default(),
    }
}
