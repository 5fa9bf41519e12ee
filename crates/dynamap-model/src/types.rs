//! Key schema and table layout types.

use serde::{Deserialize, Serialize};

use crate::attribute_value::{AttributeValue, Item};

/// Role of an attribute within a key schema.
///
/// `Hash` denotes the partition key; `Range` denotes the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Partition key.
    #[serde(rename = "HASH")]
    Hash,
    /// Sort key.
    #[serde(rename = "RANGE")]
    Range,
}

impl KeyType {
    /// Returns the store's spelling of this key type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "HASH",
            Self::Range => "RANGE",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar types allowed for key attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    /// String.
    S,
    /// Number.
    N,
    /// Binary.
    B,
}

impl ScalarAttributeType {
    /// Returns the store's type tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::B => "B",
        }
    }

    /// Returns `true` if `value` is of this scalar type.
    #[must_use]
    pub fn matches(self, value: &AttributeValue) -> bool {
        value.scalar_type() == Some(self)
    }
}

impl std::fmt::Display for ScalarAttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key attribute: stored name plus scalar type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAttribute {
    /// Stored attribute name.
    pub name: String,
    /// Scalar type of the attribute.
    pub attr_type: ScalarAttributeType,
}

impl KeyAttribute {
    /// Creates a key attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, attr_type: ScalarAttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }
}

/// Hash key plus optional range key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySchema {
    /// Partition key.
    pub hash_key: KeyAttribute,
    /// Sort key, if any.
    pub range_key: Option<KeyAttribute>,
}

impl KeySchema {
    /// Names of the key attributes, hash first.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash_key.name.as_str())
            .chain(self.range_key.as_ref().map(|k| k.name.as_str()))
    }

    /// Projects the key attributes out of a full item.
    ///
    /// Returns `None` when the item lacks one of them.
    #[must_use]
    pub fn extract_key(&self, item: &Item) -> Option<Item> {
        self.attribute_names()
            .map(|name| item.get(name).map(|v| (name.to_owned(), v.clone())))
            .collect()
    }
}

/// Kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Shares the table's hash key, alternate range key.
    Local,
    /// Independent hash key and optional range key.
    Global,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Global => "global",
        })
    }
}

/// A secondary index as provisioned in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryIndex {
    /// Index name.
    pub name: String,
    /// Local or global.
    pub kind: IndexKind,
    /// Key schema of the index.
    pub key_schema: KeySchema,
}

/// Store-level description of a table and its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Table name, including any namespace prefix.
    pub name: String,
    /// Primary key schema.
    pub key_schema: KeySchema,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<SecondaryIndex>,
}

impl TableDefinition {
    /// Looks up a secondary index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}
