//! Configuration for the tiering layer.
//!
//! Every section deserializes with defaults so a partial document is
//! enough; durations are written as integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{retry::RetryConfig, strategy::ErrorStrategy};

/// Default age after which records become archival candidates (180 days).
pub const DEFAULT_ARCHIVE_AFTER: Duration = Duration::from_secs(180 * 24 * 60 * 60);

/// Default page size used while scanning tables for archival.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Invalid setup detected at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level tiering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TieringConfig {
    /// Blob storage location.
    pub blob: BlobConfig,
    /// Background archival settings.
    pub archival: ArchivalConfig,
    /// Read-path failure policy.
    pub error_strategy: ErrorStrategy,
    /// Retry policy for blob fetches.
    pub retry: RetryConfig,
    /// Hydration worker pool sizing.
    pub hydration: HydrationConfig,
}

impl TieringConfig {
    /// Configuration targeting `bucket_name` with every other field defaulted.
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            blob: BlobConfig {
                bucket_name: bucket_name.into(),
                ..BlobConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| ConfigError::invalid("config", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blob.bucket_name.trim().is_empty() {
            return Err(ConfigError::invalid("blob.bucket_name", "must not be empty"));
        }
        validate_retry(&self.retry)?;
        if self.archival.batch_size == 0 {
            return Err(ConfigError::invalid("archival.batch_size", "must be positive"));
        }
        if self.hydration.parallelism == Some(0) {
            return Err(ConfigError::invalid(
                "hydration.parallelism",
                "must be positive when set",
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
    }
    if retry.initial_delay > retry.max_delay {
        return Err(ConfigError::invalid(
            "retry.initial_delay_ms",
            format!(
                "{}ms exceeds max_delay_ms {}ms",
                retry.initial_delay.as_millis(),
                retry.max_delay.as_millis()
            ),
        ));
    }
    Ok(())
}

/// Where archived payloads live.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Bucket holding archived payloads.
    pub bucket_name: String,
    /// Prefix joined in front of every generated key.
    pub key_prefix: Option<String>,
    /// Region of the bucket, passed through to the blob client.
    pub region: Option<String>,
}

impl BlobConfig {
    /// Join the configured prefix and `key` with a single `/`.
    pub fn prefixed_key(&self, key: &str) -> String {
        match self
            .key_prefix
            .as_deref()
            .map(|prefix| prefix.trim_matches('/'))
            .filter(|prefix| !prefix.is_empty())
        {
            Some(prefix) => format!("{prefix}/{}", key.trim_start_matches('/')),
            None => key.to_string(),
        }
    }
}

/// Background archival job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    /// Whether `archive` does anything at all.
    pub enabled: bool,
    /// Records older than this become candidates.
    #[serde(rename = "archive_after_ms", with = "duration_ms")]
    pub archive_after: Duration,
    /// Scan page size.
    pub batch_size: usize,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            archive_after: DEFAULT_ARCHIVE_AFTER,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Hydration pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Concurrent hydrations per call; `None` hydrates sequentially.
    pub parallelism: Option<usize>,
}

/// Serde adapter writing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn as_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(as_millis(*duration))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobErrorKind;

    #[test]
    fn partial_document_fills_defaults() {
        let config = TieringConfig::from_json(
            r#"{
                "blob": {"bucket_name": "archive", "key_prefix": "cold/"},
                "archival": {"enabled": true, "archive_after_ms": 60000},
                "error_strategy": "FAIL_FAST",
                "retry": {"max_attempts": 5, "retryable_error_kinds": ["timeout"]}
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.blob.bucket_name, "archive");
        assert!(config.archival.enabled);
        assert_eq!(config.archival.archive_after, Duration::from_secs(60));
        assert_eq!(config.archival.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.error_strategy, ErrorStrategy::FailFast);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert!(config.retry.retryable_error_kinds.contains(&BlobErrorKind::Timeout));
        assert_eq!(config.retry.retryable_error_kinds.len(), 1);
        assert_eq!(config.hydration.parallelism, None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = TieringConfig::new("archive");
        assert!(!config.archival.enabled);
        assert_eq!(config.archival.archive_after, DEFAULT_ARCHIVE_AFTER);
        assert_eq!(config.error_strategy, ErrorStrategy::ReturnPointer);
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_settings() {
        assert!(matches!(
            TieringConfig::default().validate(),
            Err(ConfigError::Invalid { field: "blob.bucket_name", .. })
        ));

        let mut config = TieringConfig::new("archive");
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TieringConfig::new("archive");
        config.retry.initial_delay = Duration::from_secs(5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "retry.initial_delay_ms", .. })
        ));

        let mut config = TieringConfig::new("archive");
        config.archival.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TieringConfig::new("archive");
        config.hydration.parallelism = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn prefix_is_joined_once() {
        let mut blob = BlobConfig {
            bucket_name: "archive".into(),
            ..BlobConfig::default()
        };
        assert_eq!(blob.prefixed_key("users/1.json.gz"), "users/1.json.gz");
        blob.key_prefix = Some("/cold/".into());
        assert_eq!(blob.prefixed_key("users/1.json.gz"), "cold/users/1.json.gz");
    }

    #[test]
    fn durations_serialize_as_millis() {
        let json = serde_json::to_value(ArchivalConfig::default()).expect("serialize");
        assert_eq!(json["archive_after_ms"], 180 * 24 * 60 * 60 * 1000u64);
    }
}
