//! Rate-limit evaluation.
//!
//! [`RateLimiter`] counts one policy at a time, [`TieredLimiter`] picks the policy
//! from the caller's tier, and [`LimiterChain`] runs several in a fixed order.

mod chain;
mod engine;
mod tiered;

#[cfg(test)]
mod tests;

pub use chain::{ChainVerdict, LimiterChain, Stage};
pub use engine::{RateLimiter, StoreMode};
pub use tiered::TieredLimiter;
