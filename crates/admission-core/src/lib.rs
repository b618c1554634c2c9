//! # Admission Core
//!
//! The domain layer of the admission-control engine.
//! This crate contains policies, verdicts, tiers and the ports that
//! infrastructure implements. It performs no I/O.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::{ConfigError, LookupError, MonitorError, PolicyError, StoreError};
