use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel used when the caller's network address is not known.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Who is making a request, as seen by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    /// Raw API key or bearer credential, if one was presented.
    pub api_key: Option<String>,
    /// Caller's network address.
    pub remote_addr: Option<String>,
    pub method: String,
    pub path: String,
}

impl RequestIdentity {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            api_key: None,
            remote_addr: None,
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Network address, or the `"unknown"` sentinel.
    pub fn address(&self) -> &str {
        self.remote_addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(UNKNOWN_ADDRESS)
    }

    /// The identity as the monitor is allowed to see it.
    pub fn redacted(&self) -> RedactedIdentity {
        RedactedIdentity {
            ip: self.address().to_string(),
            api_key_present: self.has_api_key(),
            api_key_hash: self.api_key.as_deref().map(hash_api_key),
        }
    }
}

/// Identity with the credential replaced by a one-way hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedIdentity {
    pub ip: String,
    pub api_key_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_hash: Option<String>,
}

impl RedactedIdentity {
    /// True if `subject` names this identity, either by address or by key hash.
    pub fn matches(&self, subject: &str) -> bool {
        self.ip == subject || self.api_key_hash.as_deref() == Some(subject)
    }
}

/// SHA-256 of the key, hex encoded. Deterministic so usage aggregates per key.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
