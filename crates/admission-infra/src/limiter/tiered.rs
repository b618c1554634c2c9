//! Tier-derived limiting: the ceiling follows the caller's subscription tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use admission_core::PolicyError;
use admission_core::domain::{Policy, RequestIdentity, Tier, TierTable, Verdict};
use admission_core::ports::CreditLookup;

use super::engine::RateLimiter;

/// Evaluates a per-tier copy of a base policy.
///
/// Per-tier policies are built once at construction. Anonymous callers are FREE
/// without a lookup; a failed or slow lookup also resolves to FREE.
pub struct TieredLimiter {
    table: TierTable,
    policies: HashMap<Tier, Policy>,
    fallback: Policy,
    lookup: Arc<dyn CreditLookup>,
    lookup_timeout: Duration,
}

impl TieredLimiter {
    pub fn new(
        base: &Policy,
        table: TierTable,
        lookup: Arc<dyn CreditLookup>,
    ) -> Result<Self, PolicyError> {
        let mut policies = HashMap::new();
        for rung in table.rungs() {
            policies.insert(rung.tier, base.with_ceiling(rung.ceiling)?);
        }
        let fallback = base.with_ceiling(table.ceiling_for(Tier::Free))?;

        Ok(Self {
            table,
            policies,
            fallback,
            lookup,
            lookup_timeout: Duration::from_millis(500),
        })
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    pub fn name(&self) -> &str {
        self.fallback.name()
    }

    /// Policy for a tier; tiers missing from the table get the FREE policy.
    pub fn policy_for(&self, tier: Tier) -> &Policy {
        self.policies.get(&tier).unwrap_or(&self.fallback)
    }

    /// Policy for a tier name reported by a collaborator. Unknown names fail closed.
    pub fn policy_for_name(&self, name: &str) -> &Policy {
        match name.parse::<Tier>() {
            Ok(tier) => self.policy_for(tier),
            Err(e) => {
                tracing::warn!(error = %e, "Unknown tier, applying FREE limits");
                &self.fallback
            }
        }
    }

    pub async fn resolve_tier(&self, identity: &RequestIdentity) -> Tier {
        if !identity.has_api_key() {
            return Tier::Free;
        }

        match tokio::time::timeout(self.lookup_timeout, self.lookup.credit_balance(identity)).await
        {
            Ok(Ok(balance)) => self.table.tier_for(balance),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, ip = %identity.address(), "Credit lookup failed, applying FREE limits");
                Tier::Free
            }
            Err(_) => {
                tracing::warn!(ip = %identity.address(), "Credit lookup timed out, applying FREE limits");
                Tier::Free
            }
        }
    }

    pub async fn evaluate(&self, limiter: &RateLimiter, identity: &RequestIdentity) -> Verdict {
        // Exempt requests skip the lookup as well as the store
        if self.fallback.is_exempt(identity) {
            return Verdict::exempt(&self.fallback);
        }

        let tier = self.resolve_tier(identity).await;
        limiter
            .evaluate(self.policy_for(tier), identity)
            .await
            .with_tier(tier)
    }
}
