//! Blob-store boundary consumed by hydration and archival.

mod fs;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use fs::FusioBlobStore;
pub use memory::{MemoryBlobStore, StoredBlob};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of blob failures used by retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobErrorKind {
    /// Object does not exist (404-class).
    NotFound,
    /// Caller lacks permission (403-class).
    AccessDenied,
    /// Request timed out.
    Timeout,
    /// Store asked the caller to slow down.
    Throttled,
    /// Connection or protocol failure.
    Transport,
    /// Local I/O failure.
    Io,
}

impl BlobErrorKind {
    /// Permanent kinds are never retried, whatever the configuration says.
    pub fn is_permanent(self) -> bool {
        matches!(self, BlobErrorKind::NotFound | BlobErrorKind::AccessDenied)
    }
}

/// Errors surfaced by a [`BlobStore`].
#[derive(Debug, Error)]
pub enum BlobError {
    /// Object does not exist.
    #[error("blob `{bucket}/{key}` not found")]
    NotFound {
        /// Bucket queried.
        bucket: String,
        /// Key queried.
        key: String,
    },
    /// Access to the object was refused.
    #[error("access denied to blob `{bucket}/{key}`")]
    AccessDenied {
        /// Bucket queried.
        bucket: String,
        /// Key queried.
        key: String,
    },
    /// Request timed out.
    #[error("blob request timed out: {0}")]
    Timeout(String),
    /// Request was throttled.
    #[error("blob store throttled the request: {0}")]
    Throttled(String),
    /// Connection or protocol failure.
    #[error("blob transport error: {0}")]
    Transport(String),
    /// Local I/O failure.
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure reported by a fusio backend.
    #[error("blob fusio error: {0}")]
    Fusio(#[from] fusio::Error),
}

impl BlobError {
    /// Kind used for retry decisions.
    pub fn kind(&self) -> BlobErrorKind {
        match self {
            BlobError::NotFound { .. } => BlobErrorKind::NotFound,
            BlobError::AccessDenied { .. } => BlobErrorKind::AccessDenied,
            BlobError::Timeout(_) => BlobErrorKind::Timeout,
            BlobError::Throttled(_) => BlobErrorKind::Throttled,
            BlobError::Transport(_) | BlobError::Fusio(_) => BlobErrorKind::Transport,
            BlobError::Io(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                BlobErrorKind::Timeout
            }
            BlobError::Io(_) => BlobErrorKind::Io,
        }
    }

    /// Returns `true` for 404/403-class failures.
    pub fn is_permanent(&self) -> bool {
        self.kind().is_permanent()
    }
}

/// Object metadata written alongside a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Content encoding of the body, e.g. `gzip`.
    pub content_encoding: Option<String>,
    /// Free-form user metadata.
    pub user_metadata: BTreeMap<String, String>,
}

impl PutOptions {
    /// Options for a gzip-compressed JSON document.
    pub fn gzip_json() -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            content_encoding: Some("gzip".to_string()),
            user_metadata: BTreeMap::new(),
        }
    }

    /// Attach a user metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }
}

/// Object storage holding archived payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full body of `bucket/key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Write `body` to `bucket/key`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<(), BlobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_kinds_are_classified() {
        let missing = BlobError::NotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert!(missing.is_permanent());
        assert!(!BlobError::Timeout("slow".into()).is_permanent());
        assert_eq!(
            BlobError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t")).kind(),
            BlobErrorKind::Timeout
        );
    }

    #[test]
    fn kinds_deserialize_from_snake_case() {
        let kinds: Vec<BlobErrorKind> =
            serde_json::from_str(r#"["timeout", "access_denied"]"#).expect("kinds");
        assert_eq!(kinds, vec![BlobErrorKind::Timeout, BlobErrorKind::AccessDenied]);
    }
}
