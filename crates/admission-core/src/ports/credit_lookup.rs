use async_trait::async_trait;

use crate::domain::RequestIdentity;
use crate::error::LookupError;

/// Subscription-data collaborator that reports an identity's credit balance.
#[async_trait]
pub trait CreditLookup: Send + Sync {
    async fn credit_balance(&self, identity: &RequestIdentity) -> Result<i64, LookupError>;
}
