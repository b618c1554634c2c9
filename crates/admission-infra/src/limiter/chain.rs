//! Ordered evaluation of several limiters for one request.

use std::sync::Arc;

use admission_core::domain::{Policy, RequestIdentity, Verdict};

use crate::config::StandardPolicies;

use super::engine::RateLimiter;
use super::tiered::TieredLimiter;

/// One link of a chain.
pub enum Stage {
    Fixed(Policy),
    Tiered(Arc<TieredLimiter>),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Fixed(policy) => policy.name(),
            Stage::Tiered(tiered) => tiered.name(),
        }
    }
}

/// Combined outcome of a chain.
#[derive(Debug, Clone)]
pub struct ChainVerdict {
    pub allowed: bool,
    /// Verdicts in evaluation order; ends at the first denial.
    pub verdicts: Vec<Verdict>,
}

impl ChainVerdict {
    /// The denying verdict, if any.
    pub fn denial(&self) -> Option<&Verdict> {
        self.verdicts.iter().find(|v| !v.allowed)
    }

    /// The verdict the HTTP layer should report: the denial, or else the
    /// counted verdict closest to its ceiling.
    pub fn headline(&self) -> Option<&Verdict> {
        self.denial().or_else(|| {
            self.verdicts
                .iter()
                .filter(|v| !v.exempt)
                .min_by_key(|v| v.remaining)
        })
    }
}

/// Limiters evaluated in a fixed order; the first denial wins and stops evaluation.
pub struct LimiterChain {
    limiter: Arc<RateLimiter>,
    stages: Vec<Stage>,
}

impl LimiterChain {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            stages: Vec::new(),
        }
    }

    /// Burst, general, IP-wide, tiered (when a credit lookup exists), then the
    /// route-scoped conversion policy.
    pub fn standard(
        limiter: Arc<RateLimiter>,
        policies: &StandardPolicies,
        tiered: Option<Arc<TieredLimiter>>,
    ) -> Self {
        let mut chain = Self::new(limiter)
            .then(policies.burst.clone())
            .then(policies.general.clone())
            .then(policies.ip.clone());
        if let Some(tiered) = tiered {
            chain = chain.then_tiered(tiered);
        }
        chain.then(policies.conversion.clone())
    }

    pub fn then(mut self, policy: Policy) -> Self {
        self.stages.push(Stage::Fixed(policy));
        self
    }

    pub fn then_tiered(mut self, tiered: Arc<TieredLimiter>) -> Self {
        self.stages.push(Stage::Tiered(tiered));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn evaluate(&self, identity: &RequestIdentity) -> ChainVerdict {
        let mut verdicts = Vec::with_capacity(self.stages.len());
        let mut counted = false;

        for stage in &self.stages {
            let verdict = match stage {
                Stage::Fixed(policy) => self.limiter.evaluate(policy, identity).await,
                Stage::Tiered(tiered) => tiered.evaluate(&self.limiter, identity).await,
            };

            if !verdict.exempt && !counted {
                self.limiter.sink().record_request(identity);
                counted = true;
            }

            let allowed = verdict.allowed;
            verdicts.push(verdict);
            if !allowed {
                return ChainVerdict {
                    allowed: false,
                    verdicts,
                };
            }
        }

        ChainVerdict {
            allowed: true,
            verdicts,
        }
    }
}
