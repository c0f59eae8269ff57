//! Protocol configuration

use serde::{Deserialize, Serialize};

use crate::crypto::errors::CryptoResult;
use crate::crypto::ratchet::SkipLimits;
use crate::wire::EXPECTED_FINGERPRINT;

/// Tunables shared by every participant of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// One-time prekeys provisioned per user (initially and per replenishment)
    pub one_time_prekey_count: usize,
    /// Largest tolerated gap of skipped messages in one receiving chain
    pub max_skipped_messages: u64,
    /// Gaps above this are logged as a degraded-security warning
    pub skipped_warning_threshold: u64,
    /// Pinned schema fingerprint; start-up fails if the registry differs
    pub expected_fingerprint: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            one_time_prekey_count: 3,
            max_skipped_messages: 10,
            skipped_warning_threshold: 8,
            expected_fingerprint: EXPECTED_FINGERPRINT.to_string(),
        }
    }
}

impl ProtocolConfig {
    /// Parse from JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn skip_limits(&self) -> SkipLimits {
        SkipLimits {
            max_skipped_messages: self.max_skipped_messages,
            warning_threshold: self.skipped_warning_threshold,
        }
    }
}
