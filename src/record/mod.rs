//! Raw records as they cross the primary-store boundary.

use std::{collections::BTreeMap, fmt};

/// A record is an ordered mapping from attribute name to typed value.
pub type Record = BTreeMap<String, AttributeValue>;

/// A typed attribute value in a [`Record`].
///
/// Numbers keep their textual form so no precision is lost between the
/// primary store and a blob document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// UTF-8 string.
    S(String),
    /// Number in its decimal text form.
    N(String),
    /// Raw bytes.
    B(Vec<u8>),
    /// Boolean.
    Bool(bool),
    /// Explicit null.
    Null,
    /// Heterogeneous list.
    L(Vec<AttributeValue>),
    /// Nested map.
    M(BTreeMap<String, AttributeValue>),
    /// String set.
    Ss(Vec<String>),
    /// Number set.
    Ns(Vec<String>),
    /// Binary set.
    Bs(Vec<Vec<u8>>),
}

impl AttributeValue {
    /// Build a string value.
    pub fn s(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    /// Build a number value from anything with a decimal `Display`.
    pub fn n(value: impl fmt::Display) -> Self {
        AttributeValue::N(value.to_string())
    }

    /// The string payload, if this is an `S` value.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(value) => Some(value),
            _ => None,
        }
    }

    /// The numeric text, if this is an `N` value.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(value) => Some(value),
            _ => None,
        }
    }

    /// The nested map, if this is an `M` value.
    pub fn as_m(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(value) => Some(value),
            _ => None,
        }
    }

    /// Short type tag matching the attribute JSON descriptor.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Copy the named attributes out of `record`, skipping any that are absent.
pub fn project<'a>(record: &Record, names: impl IntoIterator<Item = &'a str>) -> Record {
    names
        .into_iter()
        .filter_map(|name| {
            record
                .get(name)
                .map(|value| (name.to_string(), value.clone()))
        })
        .collect()
}
