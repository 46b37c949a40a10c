//! Pointer records and blob locators.
//!
//! A pointer record keeps only its primary key (plus retained timestamps)
//! and a sentinel attribute whose value locates the archived payload.

use std::fmt;

use crate::record::{project, AttributeValue, Record};

/// Sentinel attribute carrying the blob locator.
pub const POINTER_ATTRIBUTE: &str = "_s3_pointer";

/// Scheme prefix every blob locator starts with.
pub const LOCATOR_SCHEME: &str = "s3://";

/// Returns `true` iff `record` carries a scheme-prefixed sentinel attribute.
///
/// Records without the sentinel, or whose sentinel is not a string starting
/// with [`LOCATOR_SCHEME`], are full records.
pub fn is_pointer(record: &Record) -> bool {
    record
        .get(POINTER_ATTRIBUTE)
        .and_then(AttributeValue::as_s)
        .is_some_and(|value| value.starts_with(LOCATOR_SCHEME))
}

/// Location of an archived payload, as stored in a pointer record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocator {
    path: String,
}

impl BlobLocator {
    /// Parse a `s3://<path>` locator string.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.strip_prefix(LOCATOR_SCHEME)
            .filter(|path| !path.is_empty())
            .map(|path| Self {
                path: path.to_string(),
            })
    }

    /// Locator for a blob key relative to the configured bucket.
    pub fn for_key(key: impl Into<String>) -> Self {
        Self { path: key.into() }
    }

    /// Fully qualified locator naming both bucket and key.
    pub fn qualified(bucket: &str, key: &str) -> Self {
        Self {
            path: format!("{bucket}/{key}"),
        }
    }

    /// Read the locator out of a pointer record.
    pub fn of(record: &Record) -> Option<Self> {
        record
            .get(POINTER_ATTRIBUTE)
            .and_then(AttributeValue::as_s)
            .and_then(Self::parse)
    }

    /// Path portion after the scheme.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve to `(bucket, key)`.
    ///
    /// A path whose first segment is `default_bucket` is fully qualified;
    /// any other path is a key inside `default_bucket`.
    pub fn resolve<'a>(&'a self, default_bucket: &'a str) -> (&'a str, &'a str) {
        match self.path.split_once('/') {
            Some((bucket, key)) if bucket == default_bucket && !key.is_empty() => (bucket, key),
            _ => (default_bucket, self.path.as_str()),
        }
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LOCATOR_SCHEME}{}", self.path)
    }
}

/// Build a pointer record keeping only `retained` attributes of `full`.
pub fn pointer_record<'a>(
    full: &Record,
    retained: impl IntoIterator<Item = &'a str>,
    locator: &BlobLocator,
) -> Record {
    let mut pointer = project(full, retained);
    pointer.insert(
        POINTER_ATTRIBUTE.to_string(),
        AttributeValue::S(locator.to_string()),
    );
    pointer
}
