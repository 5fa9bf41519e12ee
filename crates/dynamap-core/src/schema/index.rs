//! Primary key and secondary index catalog of a model.

use std::fmt;

use dynamap_model::IndexKind;

/// Where a query reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessPath {
    /// The base table, keyed by the model's primary key.
    Table,
    /// A named secondary index.
    Index(String),
}

impl AccessPath {
    /// Index name, `None` for the table.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        match self {
            Self::Table => None,
            Self::Index(name) => Some(name),
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Index(name) => f.write_str(name),
        }
    }
}

/// A declared secondary index. Key names refer to model fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    name: String,
    kind: IndexKind,
    hash_key: Option<String>,
    range_key: Option<String>,
}

impl IndexDefinition {
    /// Local index on the table hash key with `range_key` as alternate sort key.
    #[must_use]
    pub fn local(name: impl Into<String>, range_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Local,
            hash_key: None,
            range_key: Some(range_key.into()),
        }
    }

    /// Global index with its own hash key and optional range key.
    #[must_use]
    pub fn global(
        name: impl Into<String>,
        hash_key: impl Into<String>,
        range_key: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Global,
            hash_key: Some(hash_key.into()),
            range_key: range_key.map(str::to_owned),
        }
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local or global.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Hash key field. Empty only before a local index is bound to its model.
    #[must_use]
    pub fn hash_key(&self) -> &str {
        self.hash_key.as_deref().unwrap_or_default()
    }

    /// Range key field, if any.
    #[must_use]
    pub fn range_key(&self) -> Option<&str> {
        self.range_key.as_deref()
    }

    pub(crate) fn bind_table_hash(&mut self, table_hash: &str) {
        if self.kind == IndexKind::Local {
            self.hash_key = Some(table_hash.to_owned());
        }
    }
}

/// Key slots of one access path.
#[derive(Debug, Clone, Copy)]
pub struct KeySlots<'a> {
    /// `None` for the table.
    pub kind: Option<IndexKind>,
    /// Name of the access path.
    pub name: &'a str,
    /// Hash key field.
    pub hash_key: &'a str,
    /// Range key field.
    pub range_key: Option<&'a str>,
}

impl KeySlots<'_> {
    /// The access path these slots describe.
    #[must_use]
    pub fn path(&self) -> AccessPath {
        match self.kind {
            None => AccessPath::Table,
            Some(_) => AccessPath::Index(self.name.to_owned()),
        }
    }
}

/// Primary key plus every secondary index of a model.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    hash_key: String,
    range_key: Option<String>,
    indexes: Vec<IndexDefinition>,
}

/// Display name of the table access path in candidate lists.
pub const TABLE_PATH_NAME: &str = "<table>";

impl IndexCatalog {
    pub(crate) fn new(
        hash_key: String,
        range_key: Option<String>,
        mut indexes: Vec<IndexDefinition>,
    ) -> Self {
        for index in &mut indexes {
            index.bind_table_hash(&hash_key);
        }
        Self {
            hash_key,
            range_key,
            indexes,
        }
    }

    /// Table hash key field.
    #[must_use]
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    /// Table range key field.
    #[must_use]
    pub fn range_key(&self) -> Option<&str> {
        self.range_key.as_deref()
    }

    /// Secondary indexes in declaration order.
    #[must_use]
    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Looks up a secondary index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// Key slots of the table.
    #[must_use]
    pub fn table_slots(&self) -> KeySlots<'_> {
        KeySlots {
            kind: None,
            name: TABLE_PATH_NAME,
            hash_key: &self.hash_key,
            range_key: self.range_key.as_deref(),
        }
    }

    /// Key slots of an index.
    #[must_use]
    pub fn index_slots<'a>(&'a self, index: &'a IndexDefinition) -> KeySlots<'a> {
        KeySlots {
            kind: Some(index.kind),
            name: &index.name,
            hash_key: index.hash_key(),
            range_key: index.range_key(),
        }
    }

    /// The table followed by every index, in declaration order.
    pub fn all_slots(&self) -> impl Iterator<Item = KeySlots<'_>> {
        std::iter::once(self.table_slots())
            .chain(self.indexes.iter().map(|idx| self.index_slots(idx)))
    }

    /// Whether `field` is the table hash or range key.
    #[must_use]
    pub fn is_primary_key(&self, field: &str) -> bool {
        self.hash_key == field || self.range_key.as_deref() == Some(field)
    }

    /// Whether `field` is a key of the table or of any index.
    #[must_use]
    pub fn is_key(&self, field: &str) -> bool {
        self.all_slots()
            .any(|s| s.hash_key == field || s.range_key == Some(field))
    }
}
