//! Table descriptors supplied by the typed-store layer.
//!
//! Key roles, timestamp attributes and tiering eligibility are declared
//! here once, ahead of time. Nothing on the read or archival path inspects
//! records to guess them.

use std::{collections::BTreeMap, time::Duration};

use crate::key::{KeyGenerator, KeySchema, DEFAULT_KEY_TEMPLATE};

/// Per-table tiering settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieringPolicy {
    /// Attribute holding the record's age (RFC 3339 string or epoch seconds).
    pub age_attribute: Option<String>,
    /// Overrides the configured archive threshold for this table.
    pub archive_after: Option<Duration>,
    /// Blob key template for archived payloads.
    pub key_template: String,
}

impl Default for TieringPolicy {
    fn default() -> Self {
        Self {
            age_attribute: None,
            archive_after: None,
            key_template: DEFAULT_KEY_TEMPLATE.to_string(),
        }
    }
}

impl TieringPolicy {
    /// Policy aging records by `age_attribute`.
    pub fn new(age_attribute: impl Into<String>) -> Self {
        Self {
            age_attribute: Some(age_attribute.into()),
            ..Self::default()
        }
    }

    /// Override the archive threshold.
    #[must_use]
    pub fn archive_after(mut self, age: Duration) -> Self {
        self.archive_after = Some(age);
        self
    }

    /// Override the blob key template.
    #[must_use]
    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.key_template = template.into();
        self
    }
}

/// Descriptor of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table_name: String,
    /// Primary-key roles.
    pub key: KeySchema,
    /// Timestamp attributes kept on pointer records.
    pub timestamp_attributes: Vec<String>,
    /// Present when the table takes part in tiering.
    pub tiering: Option<TieringPolicy>,
}

impl TableSchema {
    /// Non-tiered table with the given key.
    pub fn new(table_name: impl Into<String>, key: KeySchema) -> Self {
        Self {
            table_name: table_name.into(),
            key,
            timestamp_attributes: Vec::new(),
            tiering: None,
        }
    }

    /// Declare a timestamp attribute.
    #[must_use]
    pub fn timestamp_attribute(mut self, name: impl Into<String>) -> Self {
        self.timestamp_attributes.push(name.into());
        self
    }

    /// Mark the table as tiering-eligible.
    #[must_use]
    pub fn tiering(mut self, policy: TieringPolicy) -> Self {
        self.tiering = Some(policy);
        self
    }

    /// Key generator resolving roles from this schema.
    pub fn key_generator(&self) -> KeyGenerator {
        KeyGenerator::new(self.key.clone())
    }

    /// Attributes a pointer record keeps: key, timestamps and the age attribute.
    pub fn retained_attributes(&self) -> Vec<&str> {
        let mut retained = self.key.attribute_names().collect::<Vec<_>>();
        retained.extend(self.timestamp_attributes.iter().map(String::as_str));
        if let Some(age) = self
            .tiering
            .as_ref()
            .and_then(|policy| policy.age_attribute.as_deref())
        {
            retained.push(age);
        }
        retained.sort_unstable();
        retained.dedup();
        retained
    }
}

/// Every table the tiering layer knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any descriptor with the same name.
    #[must_use]
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.insert(schema);
        self
    }

    /// Add a table, replacing any descriptor with the same name.
    pub fn insert(&mut self, schema: TableSchema) {
        self.tables.insert(schema.table_name.clone(), schema);
    }

    /// Descriptor of `table_name`.
    pub fn get(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.get(table_name)
    }

    /// All tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Tables tagged for tiering, with their policies.
    pub fn tiered(&self) -> impl Iterator<Item = (&TableSchema, &TieringPolicy)> {
        self.tables
            .values()
            .filter_map(|schema| schema.tiering.as_ref().map(|policy| (schema, policy)))
    }
}
