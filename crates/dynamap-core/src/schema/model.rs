//! Model schemas and their builder.

use std::collections::HashMap;
use std::sync::Arc;

use dynamap_model::{
    AttributeValue, IndexKind, KeyAttribute, KeySchema, ScalarAttributeType, SecondaryIndex,
    TableDefinition,
};

use crate::error::{MapperError, MapperResult};
use crate::schema::composite::Composite;
use crate::schema::field::{DataType, Field, encode_extra};
use crate::schema::index::{IndexCatalog, IndexDefinition};
use crate::value::Value;

/// A declared field: plain or composite.
#[derive(Debug, Clone)]
pub enum FieldDef {
    /// Directly assigned field.
    Plain(Field),
    /// Field merged from sources.
    Composite(Composite),
}

impl FieldDef {
    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(f) => f.name(),
            Self::Composite(c) => c.name(),
        }
    }

    /// Stored data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Plain(f) => f.data_type(),
            Self::Composite(c) => c.data_type(),
        }
    }
}

/// Immutable description of an entity type.
#[derive(Debug)]
pub struct ModelSchema {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    positions: HashMap<String, usize>,
    catalog: IndexCatalog,
    key_schema: KeySchema,
    secondary: Vec<SecondaryIndex>,
}

impl ModelSchema {
    /// Starts declaring a model.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name without namespace.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared fields in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    /// Looks up a plain field.
    #[must_use]
    pub fn plain(&self, name: &str) -> Option<&Field> {
        match self.field(name) {
            Some(FieldDef::Plain(f)) => Some(f),
            _ => None,
        }
    }

    /// Looks up a composite field.
    #[must_use]
    pub fn composite(&self, name: &str) -> Option<&Composite> {
        match self.field(name) {
            Some(FieldDef::Composite(c)) => Some(c),
            _ => None,
        }
    }

    /// Composite fields in declaration order.
    pub fn composites(&self) -> impl Iterator<Item = &Composite> {
        self.fields.iter().filter_map(|f| match f {
            FieldDef::Composite(c) => Some(c),
            FieldDef::Plain(_) => None,
        })
    }

    /// Key and index catalog.
    #[must_use]
    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    /// Store-level key schema of the table.
    #[must_use]
    pub fn key_schema(&self) -> &KeySchema {
        &self.key_schema
    }

    /// A concatenation composite over plain sources can be split back.
    #[must_use]
    pub fn is_decomposable(&self, composite: &Composite) -> bool {
        composite.is_concat() && composite.sources().iter().all(|s| self.plain(s).is_some())
    }

    /// Derives a composite's value, resolving nested composites first.
    pub fn derive(
        &self,
        composite: &Composite,
        lookup: &dyn Fn(&str) -> Option<Value>,
    ) -> MapperResult<Value> {
        composite.resolve(|source| match self.composite(source) {
            Some(inner) => self.derive(inner, lookup).ok(),
            None => lookup(source),
        })
    }

    /// Splits a decomposable composite value into plain source values.
    pub fn decompose(
        &self,
        composite: &Composite,
        stored: &Value,
    ) -> MapperResult<Vec<(String, Value)>> {
        composite.decompose(stored, |source| self.plain(source).map(Field::data_type))
    }

    /// Store encoding of a declared or extra attribute.
    pub fn encode_attribute(
        &self,
        name: &str,
        value: &Value,
    ) -> MapperResult<Option<AttributeValue>> {
        match self.field(name) {
            Some(FieldDef::Plain(f)) => f.encode(value),
            Some(FieldDef::Composite(c)) => c.data_type().encode(name, value),
            None => Ok(encode_extra(value)),
        }
    }

    /// Normalizes a predicate operand to the field's type.
    ///
    /// Operands on undeclared attributes pass through unchanged.
    pub fn coerce_operand(&self, name: &str, value: Value) -> MapperResult<Value> {
        match self.field(name) {
            Some(FieldDef::Plain(f)) => f.accept_operand(value),
            Some(FieldDef::Composite(c)) => c.data_type().coerce(name, value, true),
            None => Ok(value),
        }
    }

    /// Store-level table description with `namespace` prefixed to the name.
    #[must_use]
    pub fn table_definition(&self, namespace: &str) -> TableDefinition {
        TableDefinition {
            name: format!("{namespace}{}", self.table),
            key_schema: self.key_schema.clone(),
            indexes: self.secondary.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects a model declaration and validates it on [`ModelBuilder::build`].
#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    hash_key: Option<String>,
    range_key: Option<String>,
    indexes: Vec<IndexDefinition>,
}

impl ModelBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            hash_key: None,
            range_key: None,
            indexes: Vec::new(),
        }
    }

    /// Table name. Defaults to the model name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declares a plain field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(FieldDef::Plain(field));
        self
    }

    /// Declares a composite field. Its sources must already be declared.
    #[must_use]
    pub fn composite(mut self, composite: Composite) -> Self {
        self.fields.push(FieldDef::Composite(composite));
        self
    }

    /// Table hash key.
    #[must_use]
    pub fn hash_key(mut self, field: impl Into<String>) -> Self {
        self.hash_key = Some(field.into());
        self
    }

    /// Table range key.
    #[must_use]
    pub fn range_key(mut self, field: impl Into<String>) -> Self {
        self.range_key = Some(field.into());
        self
    }

    /// Local secondary index with `range_key` as alternate sort key.
    #[must_use]
    pub fn local_index(mut self, name: impl Into<String>, range_key: impl Into<String>) -> Self {
        self.indexes.push(IndexDefinition::local(name, range_key));
        self
    }

    /// Global secondary index.
    #[must_use]
    pub fn global_index(
        mut self,
        name: impl Into<String>,
        hash_key: impl Into<String>,
        range_key: Option<&str>,
    ) -> Self {
        self.indexes
            .push(IndexDefinition::global(name, hash_key, range_key));
        self
    }

    /// Validates the declaration and freezes it.
    pub fn build(self) -> MapperResult<Arc<ModelSchema>> {
        let model = self.name.clone();
        let invalid = |message: String| MapperError::InvalidSchema {
            model: model.clone(),
            message,
        };

        let mut positions = HashMap::with_capacity(self.fields.len());
        for (i, def) in self.fields.iter().enumerate() {
            if let FieldDef::Composite(c) = def {
                if c.sources().len() < 2 {
                    return Err(invalid(format!(
                        "composite {} needs at least two sources",
                        c.name()
                    )));
                }
                if let Some(missing) = c.sources().iter().find(|s| !positions.contains_key(*s)) {
                    return Err(invalid(format!(
                        "composite {} references undeclared source {missing}",
                        c.name()
                    )));
                }
            }
            if positions.insert(def.name().to_owned(), i).is_some() {
                return Err(invalid(format!("duplicate field {}", def.name())));
            }
        }

        let key_attr = |field: &str, role: &str| -> MapperResult<KeyAttribute> {
            let def = positions
                .get(field)
                .map(|&i| &self.fields[i])
                .ok_or_else(|| invalid(format!("{role} {field} is not a declared field")))?;
            let attr_type: ScalarAttributeType = def.data_type().scalar_type().ok_or_else(|| {
                invalid(format!(
                    "{role} {field} has type {}, which cannot be a key",
                    def.data_type()
                ))
            })?;
            Ok(KeyAttribute::new(field, attr_type))
        };

        let hash_key = self
            .hash_key
            .clone()
            .ok_or_else(|| invalid("no hash key declared".to_owned()))?;
        if self.range_key.as_deref() == Some(hash_key.as_str()) {
            return Err(invalid(format!("{hash_key} cannot be both hash and range key")));
        }
        let key_schema = KeySchema {
            hash_key: key_attr(&hash_key, "hash key")?,
            range_key: self
                .range_key
                .as_deref()
                .map(|r| key_attr(r, "range key"))
                .transpose()?,
        };

        let catalog = IndexCatalog::new(hash_key, self.range_key.clone(), self.indexes.clone());
        let mut secondary = Vec::with_capacity(catalog.indexes().len());
        for index in catalog.indexes() {
            if secondary
                .iter()
                .any(|s: &SecondaryIndex| s.name == index.name())
            {
                return Err(invalid(format!("duplicate index {}", index.name())));
            }
            if index.kind() == IndexKind::Local {
                if catalog.range_key().is_none() {
                    return Err(invalid(format!(
                        "local index {} requires a table range key",
                        index.name()
                    )));
                }
                if index.range_key() == catalog.range_key() {
                    return Err(invalid(format!(
                        "local index {} repeats the table range key",
                        index.name()
                    )));
                }
            }
            let role = format!("key of index {}", index.name());
            secondary.push(SecondaryIndex {
                name: index.name().to_owned(),
                kind: index.kind(),
                key_schema: KeySchema {
                    hash_key: key_attr(index.hash_key(), role.as_str())?,
                    range_key: index
                        .range_key()
                        .map(|r| key_attr(r, role.as_str()))
                        .transpose()?,
                },
            });
        }

        Ok(Arc::new(ModelSchema {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            fields: self.fields,
            positions,
            catalog,
            key_schema,
            secondary,
        }))
    }
}
