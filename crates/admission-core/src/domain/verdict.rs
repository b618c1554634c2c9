use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::policy::Policy;
use crate::domain::tier::Tier;

/// Structured body attached to a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialPayload {
    pub code: String,
    pub message: String,
    pub retry_hint: String,
    pub retry_after_secs: u64,
}

impl DenialPayload {
    /// Render the policy's template for a denial that resets at `reset_at`.
    pub fn render(policy: &Policy, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let retry_after_secs = seconds_until(reset_at, now);
        let template = policy.denial();
        let fill = |text: &str| {
            text.replace("{limit}", &policy.ceiling().to_string())
                .replace("{window}", &describe_window(policy.window()))
                .replace("{retry_after}", &retry_after_secs.to_string())
        };

        Self {
            code: template.code.clone(),
            message: fill(&template.message),
            retry_hint: fill(&template.retry_hint),
            retry_after_secs,
        }
    }
}

/// Outcome of evaluating one policy for one request.
///
/// The HTTP layer maps this onto status codes and `RateLimit-*` headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub policy: String,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// End of the current window; `None` when the request was exempt.
    pub reset_at: Option<DateTime<Utc>>,
    pub exempt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialPayload>,
}

impl Verdict {
    pub fn exempt(policy: &Policy) -> Self {
        Self {
            policy: policy.name().to_string(),
            allowed: true,
            limit: policy.ceiling(),
            remaining: policy.ceiling(),
            reset_at: None,
            exempt: true,
            tier: None,
            denial: None,
        }
    }

    /// Verdict for the `count`-th request of a window.
    pub fn from_count(
        policy: &Policy,
        count: u64,
        reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let allowed = count <= policy.ceiling();
        let denial = (!allowed).then(|| DenialPayload::render(policy, reset_at, now));

        Self {
            policy: policy.name().to_string(),
            allowed,
            limit: policy.ceiling(),
            remaining: policy.ceiling().saturating_sub(count),
            reset_at: Some(reset_at),
            exempt: false,
            tier: None,
            denial,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Seconds until the window resets, for `Retry-After`.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        self.reset_at.map(|r| seconds_until(r, now)).unwrap_or(0)
    }
}

fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (n, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if n == 1 {
        unit.to_string()
    } else {
        format!("{} {}s", n, unit)
    }
}
