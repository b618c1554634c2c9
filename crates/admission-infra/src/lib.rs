//! # Admission Infrastructure
//!
//! Concrete implementations of the ports defined in `admission-core`, plus the
//! limiter engine, abuse monitor and startup wiring built on them.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, local store only
//! - `redis` - Redis shared counter store

pub mod bootstrap;
pub mod config;
pub mod limiter;
pub mod monitor;
pub mod store;
pub mod telemetry;

// Re-exports
pub use bootstrap::AdmissionStack;
pub use config::{AdmissionConfig, LimiterSettings, PolicySettings, StandardPolicies};
pub use limiter::{ChainVerdict, LimiterChain, RateLimiter, Stage, StoreMode, TieredLimiter};
pub use monitor::{
    AbuseMonitor, IntervalTicker, Janitor, JanitorHandle, MonitorConfig, Sweep, Ticker,
};
pub use store::LocalCounterStore;
pub use telemetry::{TelemetryConfig, init_telemetry};

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use store::{RedisCounterStore, RedisStoreConfig};
