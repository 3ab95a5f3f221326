//! Resolver configuration, loadable from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use switchboard_core::{BIND_PERMISSION_MARKER, BackoffPolicy, ProviderId, ResolverError, ResolverResult};

/// Capability-query tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// How long a feature report may take before the query counts as failed.
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed delay before retrying a failed or timed-out query.
    #[serde(default = "default_query_retry_ms")]
    pub retry_delay_ms: u64,
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_query_retry_ms() -> u64 {
    5_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_query_timeout_ms(),
            retry_delay_ms: default_query_retry_ms(),
        }
    }
}

impl QueryConfig {
    /// The query timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The retry delay as a [`Duration`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration for the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Number of hardware slots, indexed from zero.
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,
    /// The device default provider, covering slots and features no carrier
    /// override claims.
    #[serde(default)]
    pub device_default: Option<ProviderId>,
    /// The permission marker candidates must be guarded by.
    #[serde(default = "default_marker")]
    pub expected_permission_marker: String,
    /// Test-only: admit candidates whose marker does not match.
    #[serde(default)]
    pub allow_unverified_candidates: bool,
    /// Reconnection backoff.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Capability-query tuning.
    #[serde(default)]
    pub query: QueryConfig,
}

fn default_slot_count() -> u32 {
    1
}

fn default_marker() -> String {
    BIND_PERMISSION_MARKER.to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            device_default: None,
            expected_permission_marker: default_marker(),
            allow_unverified_candidates: false,
            backoff: BackoffPolicy::default(),
            query: QueryConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ResolverResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| ResolverError::Config(format!("invalid config: {e}")))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save(&self, path: impl AsRef<Path>) -> ResolverResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ResolverError::Config(format!("serialization failed: {e}")))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Config`] naming the first violated rule.
    pub fn validate(&self) -> ResolverResult<()> {
        if self.slot_count == 0 {
            return Err(ResolverError::Config(
                "slot_count must be at least 1".to_string(),
            ));
        }
        if self.backoff.initial_ms == 0 {
            return Err(ResolverError::Config(
                "backoff.initial_ms must be non-zero".to_string(),
            ));
        }
        if self.backoff.multiplier == 0 {
            return Err(ResolverError::Config(
                "backoff.multiplier must be at least 1".to_string(),
            ));
        }
        if self.backoff.ceiling_ms < self.backoff.initial_ms {
            return Err(ResolverError::Config(
                "backoff.ceiling_ms must not be below backoff.initial_ms".to_string(),
            ));
        }
        if self.query.timeout_ms == 0 {
            return Err(ResolverError::Config(
                "query.timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.slot_count, 1);
        assert_eq!(config.expected_permission_marker, BIND_PERMISSION_MARKER);
        assert!(!config.allow_unverified_candidates);
        assert_eq!(config.backoff.initial_ms, 2_000);
        assert_eq!(config.backoff.ceiling_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_with_partial_fields() {
        let toml = r#"
slot_count = 2
device_default = "com.default/ProviderService"

[backoff]
initial_ms = 1000
"#;
        let config: ResolverConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.slot_count, 2);
        assert_eq!(
            config.device_default,
            Some(ProviderId::new("com.default/ProviderService"))
        );
        assert_eq!(config.backoff.initial_ms, 1_000);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.backoff.multiplier, 2);
        assert_eq!(config.query.timeout_ms, 5_000);
    }

    #[test]
    fn test_validate_rejects_zero_slots() {
        let config = ResolverConfig {
            slot_count: 0,
            ..ResolverConfig::default()
        };
        assert!(matches!(config.validate(), Err(ResolverError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = ResolverConfig::default();
        config.backoff.ceiling_ms = config.backoff.initial_ms.saturating_sub(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.toml");

        let mut config = ResolverConfig::default();
        config.slot_count = 2;
        config.device_default = Some(ProviderId::new("com.default/Svc"));
        config.save(&path).unwrap();

        let loaded = ResolverConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = ResolverConfig::load("/nonexistent/resolver.toml");
        assert!(matches!(result, Err(ResolverError::Io(_))));
    }
}
