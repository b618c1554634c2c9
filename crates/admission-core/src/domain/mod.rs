//! Domain types for admission control.

mod event;
mod identity;
mod policy;
mod tier;
mod verdict;

pub use event::{AggregateStats, BucketCount, DenialEvent, RankedCount};
pub use identity::{RedactedIdentity, RequestIdentity, UNKNOWN_ADDRESS, hash_api_key};
pub use policy::{
    DenialTemplate, ExemptFn, Exemption, KeyFn, KeyStrategy, MAX_WINDOW, Policy, PolicyBuilder,
};
pub use tier::{Tier, TierRung, TierTable, UnknownTier};
pub use verdict::{DenialPayload, Verdict};
