//! Deterministic blob keys derived from a record's primary key.
//!
//! A blob key must be recreatable from key attributes alone, so templates
//! only ever see the table name and the partition/sort key values.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{project, AttributeValue, Record};

/// Suffix appended to keys that do not already name a JSON payload.
pub const PAYLOAD_SUFFIX: &str = ".json.gz";

/// Template used when a tiering policy does not provide one.
pub const DEFAULT_KEY_TEMPLATE: &str = "{tableName}/{partitionKey}/{sortKey}";

const RECOGNIZED_EXTENSIONS: [&str; 2] = [".json.gz", ".json"];
const PARTITION_CANDIDATES: [&str; 5] = ["pk", "partition_key", "PK", "hash_key", "id"];
const SORT_CANDIDATES: [&str; 4] = ["sk", "sort_key", "SK", "range_key"];

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(tableName|partitionKey|sortKey|table|pk|sk)\}").expect("placeholder pattern")
});
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"|?*\\]"#).expect("unsafe character pattern"));
static REPEATED_UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_+").expect("underscore pattern"));
static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/+").expect("slash pattern"));

/// Errors raised while resolving key values.
#[derive(Debug, Error)]
pub enum KeyError {
    /// No partition key attribute could be resolved from the record.
    #[error("no partition key could be resolved: {0}")]
    MissingPartitionKey(String),
    /// A key attribute holds a value kind that cannot appear in a blob key.
    #[error("key attribute `{name}` has unsupported kind {kind}")]
    UnsupportedKind {
        /// Attribute name.
        name: String,
        /// Attribute kind tag.
        kind: &'static str,
    },
}

/// Primary-key roles declared by the owning table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    /// Partition (hash) key attribute name.
    pub partition_key: String,
    /// Optional sort (range) key attribute name.
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// Schema with only a partition key.
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    /// Add a sort key attribute.
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Key attribute names, partition key first.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }

    /// Project the key attributes out of a full record.
    pub fn key_of(&self, record: &Record) -> Record {
        project(record, self.attribute_names())
    }

    /// Returns `true` when `name` is one of the key attributes.
    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.attribute_names().any(|key| key == name)
    }
}

/// Derives blob keys from records.
///
/// With a [`KeySchema`] the key roles come from schema metadata; without one
/// the generator falls back to conventional attribute names.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    schema: Option<KeySchema>,
}

impl KeyGenerator {
    /// Generator resolving key roles through `schema`.
    pub fn new(schema: KeySchema) -> Self {
        Self {
            schema: Some(schema),
        }
    }

    /// Generator using the name-based fallback only.
    pub fn heuristic() -> Self {
        Self { schema: None }
    }

    /// Resolve `(partition, sort)` key values as text.
    pub fn extract_keys(&self, record: &Record) -> Result<(String, Option<String>), KeyError> {
        match &self.schema {
            Some(schema) => {
                let value = record.get(&schema.partition_key).ok_or_else(|| {
                    KeyError::MissingPartitionKey(format!(
                        "attribute `{}` is absent",
                        schema.partition_key
                    ))
                })?;
                let partition = key_text(&schema.partition_key, value)?;
                let sort = match schema
                    .sort_key
                    .as_ref()
                    .and_then(|name| record.get(name).map(|value| (name, value)))
                {
                    Some((name, value)) => Some(key_text(name, value)?),
                    None => None,
                };
                Ok((partition, sort))
            }
            None => self.extract_by_name(record),
        }
    }

    /// Expand `template` for `record` into a sanitized, suffixed blob key.
    ///
    /// Recognized placeholders are `{tableName}`, `{partitionKey}` and
    /// `{sortKey}` plus the legacy aliases `{table}`, `{pk}` and `{sk}`.
    pub fn generate_key(
        &self,
        record: &Record,
        template: &str,
        table_name: &str,
    ) -> Result<String, KeyError> {
        let (partition, sort) = self.extract_keys(record)?;
        let partition = sanitize(&partition);
        let sort = sort.map(|value| sanitize(&value)).unwrap_or_default();

        let expanded = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            match &caps[1] {
                "tableName" | "table" => table_name.to_string(),
                "partitionKey" | "pk" => partition.clone(),
                _ => sort.clone(),
            }
        });
        let collapsed = REPEATED_SLASHES.replace_all(&expanded, "/");
        let key = collapsed.trim_end_matches('/');

        if RECOGNIZED_EXTENSIONS.iter().any(|ext| key.ends_with(ext)) {
            Ok(key.to_string())
        } else {
            Ok(format!("{key}{PAYLOAD_SUFFIX}"))
        }
    }

    fn extract_by_name(&self, record: &Record) -> Result<(String, Option<String>), KeyError> {
        let partition = match PARTITION_CANDIDATES
            .iter()
            .find_map(|name| record.get(*name).map(|value| (*name, value)))
        {
            Some((name, value)) => key_text(name, value)?,
            None => {
                let mut scalars = record
                    .iter()
                    .filter(|(_, value)| is_scalar(value));
                match (scalars.next(), scalars.next()) {
                    (Some((name, value)), None) => key_text(name, value)?,
                    _ => {
                        return Err(KeyError::MissingPartitionKey(
                            "no key schema and no conventional key attribute".to_string(),
                        ))
                    }
                }
            }
        };
        let sort = match SORT_CANDIDATES
            .iter()
            .find_map(|name| record.get(*name).map(|value| (*name, value)))
        {
            Some((name, value)) => Some(key_text(name, value)?),
            None => None,
        };
        Ok((partition, sort))
    }
}

/// Replace characters that are unsafe in blob keys with `_`.
pub fn sanitize(value: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(value, "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

fn is_scalar(value: &AttributeValue) -> bool {
    matches!(
        value,
        AttributeValue::S(_) | AttributeValue::N(_) | AttributeValue::B(_)
    )
}

fn key_text(name: &str, value: &AttributeValue) -> Result<String, KeyError> {
    match value {
        AttributeValue::S(s) | AttributeValue::N(s) => Ok(s.clone()),
        AttributeValue::B(bytes) => Ok(URL_SAFE_NO_PAD.encode(bytes)),
        AttributeValue::Bool(b) => Ok(b.to_string()),
        other => Err(KeyError::UnsupportedKind {
            name: name.to_string(),
            kind: other.kind(),
        }),
    }
}
