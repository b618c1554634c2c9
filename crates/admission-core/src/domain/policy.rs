//! Rate-limit policies.
//!
//! A [`Policy`] is built once at configuration time through [`PolicyBuilder`]
//! and is never mutated by request handling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::identity::RequestIdentity;
use crate::error::PolicyError;

/// Longest window a policy may use. Keeps `now + window` well inside chrono's range.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 3600);

/// Custom key derivation function.
pub type KeyFn = Arc<dyn Fn(&RequestIdentity) -> String + Send + Sync>;

/// Custom exemption predicate over `(method, path)`.
pub type ExemptFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// How a request identity maps to a counter key.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// `api_key:<raw>` when a credential is present, otherwise `ip:<address>`.
    #[default]
    ApiKeyOrIp,
    /// Always `ip:<address>`, ignoring credentials.
    Ip,
    Custom(KeyFn),
}

impl KeyStrategy {
    pub fn derive(&self, identity: &RequestIdentity) -> String {
        match self {
            KeyStrategy::ApiKeyOrIp => match identity.api_key.as_deref() {
                Some(key) => format!("api_key:{}", key),
                None => format!("ip:{}", identity.address()),
            },
            KeyStrategy::Ip => format!("ip:{}", identity.address()),
            KeyStrategy::Custom(f) => f(identity),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::ApiKeyOrIp => f.write_str("ApiKeyOrIp"),
            KeyStrategy::Ip => f.write_str("Ip"),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A rule that lets a request bypass counting entirely.
#[derive(Clone)]
pub enum Exemption {
    /// Exact path match.
    Path(String),
    /// Any path starting with the prefix.
    PathPrefix(String),
    /// Any path NOT starting with the prefix; scopes a policy to one route family.
    OutsidePrefix(String),
    /// HTTP method, case-insensitive.
    Method(String),
    Custom(ExemptFn),
}

impl Exemption {
    pub fn applies(&self, method: &str, path: &str) -> bool {
        match self {
            Exemption::Path(p) => path == p,
            Exemption::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
            Exemption::OutsidePrefix(prefix) => !path.starts_with(prefix.as_str()),
            Exemption::Method(m) => method.eq_ignore_ascii_case(m),
            Exemption::Custom(f) => f(method, path),
        }
    }
}

impl fmt::Debug for Exemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exemption::Path(p) => write!(f, "Path({:?})", p),
            Exemption::PathPrefix(p) => write!(f, "PathPrefix({:?})", p),
            Exemption::OutsidePrefix(p) => write!(f, "OutsidePrefix({:?})", p),
            Exemption::Method(m) => write!(f, "Method({:?})", m),
            Exemption::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Template for the payload returned with a denial.
///
/// `message` may contain `{limit}`, `{window}` and `{retry_after}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialTemplate {
    pub code: String,
    pub message: String,
    pub retry_hint: String,
}

impl Default for DenialTemplate {
    fn default() -> Self {
        Self {
            code: "RATE_LIMIT_EXCEEDED".to_string(),
            message: "Too many requests: limit of {limit} per {window} exceeded".to_string(),
            retry_hint: "Retry after {retry_after} seconds".to_string(),
        }
    }
}

/// Immutable rate-limit policy.
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    key_prefix: String,
    window: Duration,
    ceiling: u64,
    key_strategy: KeyStrategy,
    exemptions: Vec<Exemption>,
    denial: DenialTemplate,
}

impl Policy {
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    pub fn denial(&self) -> &DenialTemplate {
        &self.denial
    }

    pub fn is_exempt(&self, identity: &RequestIdentity) -> bool {
        self.exemptions
            .iter()
            .any(|e| e.applies(&identity.method, &identity.path))
    }

    /// Counter key for this policy, namespaced so chained policies never share counters.
    pub fn counter_key(&self, identity: &RequestIdentity) -> String {
        format!("{}:{}", self.key_prefix, self.key_strategy.derive(identity))
    }

    /// Same policy with a different ceiling. Used to derive per-tier policies.
    pub fn with_ceiling(&self, ceiling: u64) -> Result<Policy, PolicyError> {
        if ceiling == 0 {
            return Err(PolicyError::InvalidCeiling(self.name.clone()));
        }
        Ok(Policy {
            ceiling,
            ..self.clone()
        })
    }
}

/// Builder for [`Policy`]; validates on [`build`](PolicyBuilder::build).
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    name: String,
    key_prefix: Option<String>,
    window: Duration,
    ceiling: u64,
    key_strategy: KeyStrategy,
    exemptions: Vec<Exemption>,
    denial: DenialTemplate,
}

impl PolicyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: None,
            window: Duration::from_secs(60),
            ceiling: 100,
            key_strategy: KeyStrategy::default(),
            exemptions: Vec::new(),
            denial: DenialTemplate::default(),
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Counter namespace; defaults to the policy name.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn exempt(mut self, exemption: Exemption) -> Self {
        self.exemptions.push(exemption);
        self
    }

    pub fn denial(mut self, denial: DenialTemplate) -> Self {
        self.denial = denial;
        self
    }

    pub fn denial_message(mut self, message: impl Into<String>) -> Self {
        self.denial.message = message.into();
        self
    }

    pub fn build(self) -> Result<Policy, PolicyError> {
        if self.name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if self.ceiling == 0 {
            return Err(PolicyError::InvalidCeiling(self.name));
        }
        if self.window.is_zero() {
            return Err(PolicyError::InvalidWindow(self.name));
        }
        if self.window > MAX_WINDOW {
            return Err(PolicyError::WindowTooLong(self.name));
        }

        let key_prefix = self.key_prefix.unwrap_or_else(|| self.name.clone());

        Ok(Policy {
            name: self.name,
            key_prefix,
            window: self.window,
            ceiling: self.ceiling,
            key_strategy: self.key_strategy,
            exemptions: self.exemptions,
            denial: self.denial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_zero_ceiling_and_window() {
        let err = Policy::builder("general").ceiling(0).build().unwrap_err();
        assert_eq!(err, PolicyError::InvalidCeiling("general".to_string()));

        let err = Policy::builder("general")
            .window(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::InvalidWindow("general".to_string()));

        let err = Policy::builder("  ").build().unwrap_err();
        assert_eq!(err, PolicyError::EmptyName);
    }

    #[test]
    fn test_build_rejects_oversized_window() {
        let err = Policy::builder("general")
            .window(Duration::from_secs(10_000_000_000_000))
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::WindowTooLong("general".to_string()));

        assert!(Policy::builder("general").window(MAX_WINDOW).build().is_ok());
    }

    #[test]
    fn test_key_precedence() {
        let anonymous = RequestIdentity::new("GET", "/").with_remote_addr("192.0.2.1");
        let keyed = anonymous.clone().with_api_key("abc123");

        let strategy = KeyStrategy::ApiKeyOrIp;
        assert_eq!(strategy.derive(&keyed), "api_key:abc123");
        assert_eq!(strategy.derive(&anonymous), "ip:192.0.2.1");
        assert_eq!(
            strategy.derive(&RequestIdentity::new("GET", "/")),
            "ip:unknown"
        );

        assert_eq!(KeyStrategy::Ip.derive(&keyed), "ip:192.0.2.1");
    }

    #[test]
    fn test_counter_key_is_namespaced() {
        let policy = Policy::builder("burst").build().unwrap();
        let identity = RequestIdentity::new("GET", "/").with_api_key("k");
        assert_eq!(policy.counter_key(&identity), "burst:api_key:k");

        let policy = Policy::builder("burst").key_prefix("b").build().unwrap();
        assert_eq!(policy.counter_key(&identity), "b:api_key:k");
    }

    #[test]
    fn test_exemptions() {
        let policy = Policy::builder("conversion")
            .exempt(Exemption::OutsidePrefix("/v1/convert".to_string()))
            .exempt(Exemption::Method("OPTIONS".to_string()))
            .build()
            .unwrap();

        assert!(policy.is_exempt(&RequestIdentity::new("GET", "/health")));
        assert!(policy.is_exempt(&RequestIdentity::new("options", "/v1/convert")));
        assert!(!policy.is_exempt(&RequestIdentity::new("POST", "/v1/convert/html")));
    }

    #[test]
    fn test_with_ceiling_keeps_everything_else() {
        let policy = Policy::builder("tier")
            .window(Duration::from_secs(30))
            .build()
            .unwrap();
        let derived = policy.with_ceiling(7).unwrap();

        assert_eq!(derived.ceiling(), 7);
        assert_eq!(derived.window(), Duration::from_secs(30));
        assert_eq!(derived.name(), "tier");
        assert!(policy.with_ceiling(0).is_err());
    }
}
