//! Subscription tiers and the credit ladder that selects them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;

/// Quota class, ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Free,
    Starter,
    Growth,
    Scale,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Free,
        Tier::Starter,
        Tier::Growth,
        Tier::Scale,
        Tier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Starter => "STARTER",
            Tier::Growth => "GROWTH",
            Tier::Scale => "SCALE",
            Tier::Enterprise => "ENTERPRISE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTier(s.to_string()))
    }
}

/// One step of the ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRung {
    pub tier: Tier,
    /// Highest balance (inclusive) that still maps to this tier; `None` is unbounded.
    pub max_credits: Option<i64>,
    /// Requests allowed per tier-policy window.
    pub ceiling: u64,
    pub label: String,
    pub description: String,
}

impl TierRung {
    pub fn new(tier: Tier, max_credits: Option<i64>, ceiling: u64) -> Self {
        Self {
            tier,
            max_credits,
            ceiling,
            label: tier.as_str().to_string(),
            description: String::new(),
        }
    }

    pub fn with_display(mut self, label: impl Into<String>, description: impl Into<String>) -> Self {
        self.label = label.into();
        self.description = description.into();
        self
    }
}

/// Table-driven tier resolution.
#[derive(Debug, Clone)]
pub struct TierTable {
    rungs: Vec<TierRung>,
}

impl TierTable {
    /// Build a ladder. Thresholds must be strictly ascending, only the last rung may be
    /// unbounded, and the FREE tier must be present.
    pub fn new(rungs: Vec<TierRung>) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            key: "tiers".to_string(),
            reason: reason.to_string(),
        };

        if rungs.is_empty() {
            return Err(invalid("tier ladder is empty"));
        }
        if !rungs.iter().any(|r| r.tier == Tier::Free) {
            return Err(invalid("FREE tier is required"));
        }
        if rungs.iter().any(|r| r.ceiling == 0) {
            return Err(invalid("tier ceilings must be greater than zero"));
        }

        let mut previous: Option<i64> = None;
        for (i, rung) in rungs.iter().enumerate() {
            match rung.max_credits {
                Some(max) => {
                    if previous.is_some_and(|p| max <= p) {
                        return Err(invalid("thresholds must be strictly ascending"));
                    }
                    previous = Some(max);
                }
                None if i + 1 != rungs.len() => {
                    return Err(invalid("only the last tier may be unbounded"));
                }
                None => {}
            }
        }

        Ok(Self { rungs })
    }

    /// Parse a ladder such as `FREE:50:10,STARTER:500:30,ENTERPRISE:*:300`.
    ///
    /// Each entry is `TIER:MAX_CREDITS:CEILING`; `*` marks the unbounded top rung.
    /// Display metadata is taken from the default ladder.
    pub fn parse(ladder: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let invalid = |entry: &str, reason: &str| ConfigError::Invalid {
            key: "tiers".to_string(),
            reason: format!("{}: {}", entry, reason),
        };

        let mut rungs = Vec::new();
        for entry in ladder.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [name, max, ceiling] = parts.as_slice() else {
                return Err(invalid(entry, "expected TIER:MAX_CREDITS:CEILING"));
            };

            let tier: Tier = name
                .parse()
                .map_err(|e: UnknownTier| invalid(entry, &e.to_string()))?;
            let max_credits = match *max {
                "*" => None,
                max => Some(
                    max.parse::<i64>()
                        .map_err(|_| invalid(entry, "max credits must be an integer or *"))?,
                ),
            };
            let ceiling = ceiling
                .parse::<u64>()
                .map_err(|_| invalid(entry, "ceiling must be a positive integer"))?;

            let mut rung = TierRung::new(tier, max_credits, ceiling);
            if let Some(known) = defaults.rung(tier) {
                rung = rung.with_display(known.label.clone(), known.description.clone());
            }
            rungs.push(rung);
        }

        Self::new(rungs)
    }

    pub fn rungs(&self) -> &[TierRung] {
        &self.rungs
    }

    /// Tier for a credit balance. Balances above every bound land on the last rung.
    pub fn tier_for(&self, balance: i64) -> Tier {
        self.rungs
            .iter()
            .find(|r| r.max_credits.is_none_or(|max| balance <= max))
            .or_else(|| self.rungs.last())
            .map(|r| r.tier)
            .unwrap_or(Tier::Free)
    }

    /// Ceiling for a tier. A tier missing from the table gets the FREE ceiling.
    pub fn ceiling_for(&self, tier: Tier) -> u64 {
        self.rung(tier)
            .map(|r| r.ceiling)
            .unwrap_or_else(|| self.most_restrictive_ceiling())
    }

    /// Ceiling for a tier name. Unknown names fail closed to the FREE ceiling.
    pub fn ceiling_for_name(&self, name: &str) -> u64 {
        match name.parse::<Tier>() {
            Ok(tier) => self.ceiling_for(tier),
            Err(_) => self.most_restrictive_ceiling(),
        }
    }

    pub fn rung(&self, tier: Tier) -> Option<&TierRung> {
        self.rungs.iter().find(|r| r.tier == tier)
    }

    fn most_restrictive_ceiling(&self) -> u64 {
        self.rung(Tier::Free)
            .map(|r| r.ceiling)
            .or_else(|| self.rungs.iter().map(|r| r.ceiling).min())
            .unwrap_or(1)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            rungs: vec![
                TierRung::new(Tier::Free, Some(50), 10)
                    .with_display("Free", "Evaluation usage"),
                TierRung::new(Tier::Starter, Some(500), 30)
                    .with_display("Starter", "Small projects"),
                TierRung::new(Tier::Growth, Some(5_000), 60)
                    .with_display("Growth", "Production workloads"),
                TierRung::new(Tier::Scale, Some(50_000), 120)
                    .with_display("Scale", "High-volume workloads"),
                TierRung::new(Tier::Enterprise, None, 300)
                    .with_display("Enterprise", "Custom volume"),
            ],
        }
    }
}
