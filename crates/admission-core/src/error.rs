//! Error types for admission control.
//!
//! None of these ever reach a caller as a request failure: the limiter turns
//! store errors into degraded-mode limiting and the monitor swallows its own.

use thiserror::Error;

/// Counter store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached (connect failure, timeout, broken pipe).
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter store operation failed: {0}")]
    Operation(String),
}

/// Policy construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Policy name must not be empty")]
    EmptyName,

    #[error("Policy {0}: ceiling must be greater than zero")]
    InvalidCeiling(String),

    #[error("Policy {0}: window must be greater than zero")]
    InvalidWindow(String),

    #[error("Policy {0}: window exceeds the maximum of 366 days")]
    WindowTooLong(String),
}

/// Credit lookup errors.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Credit lookup failed: {0}")]
    Backend(String),

    #[error("No subscription found for identity")]
    NotFound,
}

/// Abuse monitor errors.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor state lock poisoned")]
    Poisoned,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid policy configuration: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Counter store unavailable at startup: {0}")]
    Store(#[from] StoreError),
}
