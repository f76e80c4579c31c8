//! Engine configuration.

use serde::{Deserialize, Serialize};
use time::Duration;

/// Protocol engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// URL path the protocol is mounted at (e.g. "/files").
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Maximum upload size in bytes. `None` means unlimited.
    #[serde(default)]
    pub max_size: Option<u64>,
    /// Status code reported on checksum mismatch. Non-standard by design;
    /// only guaranteed to be distinct from 400.
    #[serde(default = "default_checksum_mismatch_status")]
    pub checksum_mismatch_status: u16,
    /// Upload expiration policy; `None` disables expiration even when the
    /// store supports it.
    #[serde(default)]
    pub expiration: Option<ExpirationConfig>,
    /// Delete partial uploads once a final concatenation consumed them.
    #[serde(default)]
    pub delete_partials_after_concat: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            max_size: None,
            checksum_mismatch_status: default_checksum_mismatch_status(),
            expiration: None,
            delete_partials_after_concat: false,
        }
    }
}

/// How upload expiration timestamps are assigned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpirationConfig {
    pub policy: ExpirationPolicy,
    /// Time to live in seconds.
    pub ttl_secs: u64,
}

impl ExpirationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationPolicy {
    /// The timestamp is fixed at creation.
    Absolute,
    /// The timestamp is refreshed after every successful append.
    Sliding,
}

fn default_base_path() -> String {
    "/files".to_string()
}

fn default_checksum_mismatch_status() -> u16 {
    460
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ProtocolConfig::default();
        assert_eq!(config.base_path, "/files");
        assert_eq!(config.checksum_mismatch_status, 460);
        assert!(config.max_size.is_none());
        assert!(config.expiration.is_none());
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: ProtocolConfig = serde_json::from_str(
            r#"{"max_size": 1024, "expiration": {"policy": "sliding", "ttl_secs": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.max_size, Some(1024));
        let exp = config.expiration.unwrap();
        assert_eq!(exp.policy, ExpirationPolicy::Sliding);
        assert_eq!(exp.ttl(), Duration::seconds(60));
    }
}
