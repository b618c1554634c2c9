//! Abuse monitoring and periodic maintenance.

mod abuse;
mod janitor;

pub use abuse::{AbuseMonitor, MonitorConfig};
pub use janitor::{IntervalTicker, Janitor, JanitorHandle, Sweep, Ticker};
