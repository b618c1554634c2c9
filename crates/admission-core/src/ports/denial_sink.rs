use crate::domain::{DenialEvent, RequestIdentity};

/// Receives request accounting and denial events from the limiter.
///
/// Implementations must not fail or block the request path; errors are theirs to log.
pub trait DenialSink: Send + Sync {
    /// Called once per non-exempt request that reached a limiter.
    fn record_request(&self, identity: &RequestIdentity);

    /// Called for every denial, before the verdict is returned.
    fn record_denial(&self, event: DenialEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DenialSink for NoopSink {
    fn record_request(&self, _identity: &RequestIdentity) {}

    fn record_denial(&self, _event: DenialEvent) {}
}
