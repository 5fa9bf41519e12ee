//! Entity instances: typed field values plus the synced snapshot.
//!
//! An [`Entity`] holds the current value of every plain field, a
//! [`TrackedSet`] per set field, and a side map of extra (undeclared)
//! attributes. Composite values are never stored on the entity; they are
//! derived from their sources whenever the entity is encoded.
//!
//! The snapshot records the decoded attributes last known to be in the
//! store. [`Entity::diff`] compares against it to produce per-attribute
//! [`Delta`]s for a partial update.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use dynamap_model::Item;

use crate::backend::AttributeUpdate;
use crate::error::{MapperError, MapperResult};
use crate::schema::field::decode_extra;
use crate::schema::{DataType, FieldDef, ModelSchema};
use crate::tracker::{Delta, TrackedSet, replace_delta};
use crate::value::{SetElement, Value, ValueSet};

/// One instance of a model.
#[derive(Clone)]
pub struct Entity {
    schema: Arc<ModelSchema>,
    values: BTreeMap<String, Value>,
    sets: BTreeMap<String, TrackedSet>,
    extras: BTreeMap<String, Value>,
    snapshot: BTreeMap<String, Value>,
    persisted_key: Option<Item>,
}

impl Entity {
    /// A new, unsaved entity with every field at its default.
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        let mut values = BTreeMap::new();
        let mut sets = BTreeMap::new();
        for def in schema.fields() {
            let FieldDef::Plain(field) = def else {
                continue;
            };
            match field.data_type().set_kind() {
                Some(kind) => {
                    let initial = match field.default() {
                        Some(Value::Set(set)) => set.clone(),
                        _ => ValueSet::new(kind),
                    };
                    sets.insert(field.name().to_owned(), TrackedSet::new(initial));
                }
                None => {
                    if let Some(default) = field.default() {
                        values.insert(field.name().to_owned(), default.clone());
                    }
                }
            }
        }
        Self {
            schema,
            values,
            sets,
            extras: BTreeMap::new(),
            snapshot: BTreeMap::new(),
            persisted_key: None,
        }
    }

    /// Decodes a stored item into a persisted entity.
    pub fn from_item(schema: Arc<ModelSchema>, item: &Item) -> MapperResult<Self> {
        let mut entity = Self::new(schema);
        entity.load(item)?;
        Ok(entity)
    }

    /// Model schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Model name.
    #[must_use]
    pub fn model(&self) -> &str {
        self.schema.name()
    }

    /// Whether the entity was loaded from or written to the store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted_key.is_some()
    }

    /// Primary key the entity was last synced under.
    #[must_use]
    pub fn persisted_key(&self) -> Option<&Item> {
        self.persisted_key.as_ref()
    }

    // -----------------------------------------------------------------------
    // Field access
    // -----------------------------------------------------------------------

    /// Assigns a field.
    ///
    /// Set fields are replaced whole. Assigning a concatenation composite
    /// writes through to its sources; other composites are read-only.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> MapperResult<()> {
        let schema = Arc::clone(&self.schema);
        match schema.field(name) {
            Some(FieldDef::Plain(field)) => {
                let value = field.accept(value.into())?;
                match (self.sets.get_mut(name), value) {
                    (Some(tracked), Value::Set(set)) => tracked.replace(set),
                    (_, value) => {
                        self.values.insert(name.to_owned(), value);
                    }
                }
                Ok(())
            }
            Some(FieldDef::Composite(composite)) => {
                if !schema.is_decomposable(composite) {
                    return Err(MapperError::ReadOnlyComposite {
                        field: name.to_owned(),
                    });
                }
                let stored = composite.data_type().coerce(name, value.into(), true)?;
                for (source, part) in schema.decompose(composite, &stored)? {
                    self.set(&source, part)?;
                }
                Ok(())
            }
            None => Err(self.unknown(name)),
        }
    }

    /// Builder-style [`Entity::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> MapperResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Clears a plain field. A cleared set becomes empty.
    pub fn unset(&mut self, name: &str) -> MapperResult<()> {
        match self.schema.field(name) {
            Some(FieldDef::Plain(field)) => {
                match (self.sets.get_mut(name), field.data_type().set_kind()) {
                    (Some(tracked), Some(kind)) => tracked.replace(ValueSet::new(kind)),
                    _ => {
                        self.values.remove(name);
                    }
                }
                Ok(())
            }
            Some(FieldDef::Composite(_)) => Err(MapperError::ReadOnlyComposite {
                field: name.to_owned(),
            }),
            None => Err(self.unknown(name)),
        }
    }

    /// Current value of a field, composite or extra attribute.
    ///
    /// Composites whose sources are incomplete read as `None`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.schema.field(name) {
            Some(FieldDef::Plain(_)) => self.plain_value(name),
            Some(FieldDef::Composite(composite)) => self
                .schema
                .derive(composite, &|source| self.plain_value(source))
                .ok(),
            None => self.extras.get(name).cloned(),
        }
    }

    fn plain_value(&self, name: &str) -> Option<Value> {
        match self.sets.get(name) {
            Some(tracked) => Some(Value::Set(tracked.value().clone())),
            None => self.values.get(name).cloned(),
        }
    }

    /// Adds a member to a set field. Returns `false` if it was present.
    pub fn add_to_set(&mut self, name: &str, element: impl Into<SetElement>) -> MapperResult<bool> {
        let data_type = self.set_type(name)?;
        let element = element.into();
        let tracked = self.tracked_mut(name)?;
        tracked.insert(element).map_err(|rejected| MapperError::TypeMismatch {
            field: name.to_owned(),
            expected: data_type.name(),
            found: format!("member {rejected}"),
        })
    }

    /// Removes a member from a set field. Returns `false` if it was absent.
    pub fn remove_from_set(
        &mut self,
        name: &str,
        element: impl Into<SetElement>,
    ) -> MapperResult<bool> {
        self.set_type(name)?;
        let element = element.into();
        Ok(self.tracked_mut(name)?.remove(&element))
    }

    fn set_type(&self, name: &str) -> MapperResult<DataType> {
        match self.schema.field(name) {
            Some(def) if def.data_type().set_kind().is_some() => Ok(def.data_type()),
            Some(def) => Err(MapperError::TypeMismatch {
                field: name.to_owned(),
                expected: "a set type",
                found: def.data_type().to_string(),
            }),
            None => Err(self.unknown(name)),
        }
    }

    fn tracked_mut(&mut self, name: &str) -> MapperResult<&mut TrackedSet> {
        let model = self.schema.name().to_owned();
        self.sets
            .get_mut(name)
            .ok_or_else(|| MapperError::UnknownField {
                model,
                field: name.to_owned(),
            })
    }

    /// Mutable access to a structured field's document, created as `{}`
    /// when unset. Changes are picked up by the next diff.
    pub fn structured_mut(&mut self, name: &str) -> MapperResult<&mut serde_json::Value> {
        match self.schema.field(name).map(FieldDef::data_type) {
            Some(DataType::Structured) => {}
            Some(other) => {
                return Err(MapperError::TypeMismatch {
                    field: name.to_owned(),
                    expected: "structured",
                    found: other.to_string(),
                });
            }
            None => return Err(self.unknown(name)),
        }
        let slot = self
            .values
            .entry(name.to_owned())
            .or_insert_with(|| Value::Structured(serde_json::json!({})));
        if !matches!(slot, Value::Structured(_)) {
            *slot = Value::Structured(slot.to_json());
        }
        match slot {
            Value::Structured(doc) => Ok(doc),
            other => Err(MapperError::TypeMismatch {
                field: name.to_owned(),
                expected: "structured",
                found: other.kind_name().to_owned(),
            }),
        }
    }

    /// Sets an undeclared attribute. Declared names are assigned as fields.
    pub fn set_extra(&mut self, name: &str, value: impl Into<Value>) -> MapperResult<()> {
        if self.schema.field(name).is_some() {
            return self.set(name, value);
        }
        self.extras.insert(name.to_owned(), value.into());
        Ok(())
    }

    /// Value of an undeclared attribute.
    #[must_use]
    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extras.get(name)
    }

    /// Removes an undeclared attribute, returning its value.
    pub fn remove_extra(&mut self, name: &str) -> Option<Value> {
        self.extras.remove(name)
    }

    /// Every undeclared attribute.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.extras.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn unknown(&self, name: &str) -> MapperError {
        MapperError::UnknownField {
            model: self.schema.name().to_owned(),
            field: name.to_owned(),
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encoded primary key.
    ///
    /// Fails with `MissingKey` for an unset key field and with
    /// `IncompleteComposite` for an underivable composite key.
    pub fn key(&self) -> MapperResult<Item> {
        let schema = &self.schema;
        let mut key = Item::new();
        for name in schema.key_schema().attribute_names() {
            let missing = || MapperError::MissingKey {
                model: schema.name().to_owned(),
                field: name.to_owned(),
            };
            let value = match schema.field(name) {
                Some(FieldDef::Composite(composite)) => {
                    schema.derive(composite, &|source| self.plain_value(source))?
                }
                _ => self.values.get(name).cloned().ok_or_else(missing)?,
            };
            let encoded = schema.encode_attribute(name, &value)?.ok_or_else(missing)?;
            key.insert(name.to_owned(), encoded);
        }
        Ok(key)
    }

    /// Non-set attributes as they would be stored: plain values, derivable
    /// composites and extras.
    fn stored_values(&self) -> MapperResult<BTreeMap<String, Value>> {
        let schema = &self.schema;
        let mut stored = self.values.clone();
        for composite in schema.composites() {
            match schema.derive(composite, &|source| self.plain_value(source)) {
                Ok(value) => {
                    stored.insert(composite.name().to_owned(), value);
                }
                Err(MapperError::IncompleteComposite { .. })
                    if !schema.catalog().is_primary_key(composite.name()) => {}
                Err(err) => return Err(err),
            }
        }
        stored.extend(self.extras.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(stored)
    }

    /// Full item for a put. Unset fields and empty sets are left out.
    pub fn to_item(&self) -> MapperResult<Item> {
        let mut item = self.key()?;
        for (name, value) in self.stored_values()? {
            if let Some(encoded) = self.schema.encode_attribute(&name, &value)? {
                item.insert(name, encoded);
            }
        }
        for (name, tracked) in &self.sets {
            let value = Value::Set(tracked.value().clone());
            if let Some(encoded) = self.schema.encode_attribute(name, &value)? {
                item.insert(name.clone(), encoded);
            }
        }
        Ok(item)
    }

    /// Replaces every value with the decoded contents of `item` and takes it
    /// as the synced state.
    pub(crate) fn load(&mut self, item: &Item) -> MapperResult<()> {
        let schema = Arc::clone(&self.schema);
        let mut values = BTreeMap::new();
        let mut sets = BTreeMap::new();
        let mut extras = BTreeMap::new();
        let mut snapshot = BTreeMap::new();

        for (name, attr) in item {
            match schema.field(name) {
                Some(FieldDef::Plain(field)) => match field.decode(attr)? {
                    Value::Set(set) => {
                        sets.insert(name.clone(), TrackedSet::new(set));
                    }
                    value => {
                        snapshot.insert(name.clone(), value.clone());
                        values.insert(name.clone(), value);
                    }
                },
                Some(FieldDef::Composite(composite)) => {
                    let value = composite.data_type().decode(name, attr)?;
                    snapshot.insert(name.clone(), value);
                }
                None => {
                    let value = decode_extra(name, attr)?;
                    snapshot.insert(name.clone(), value.clone());
                    extras.insert(name.clone(), value);
                }
            }
        }

        // Sources missing from the item are recovered from their composite.
        for composite in schema.composites() {
            let Some(stored) = snapshot.get(composite.name()) else {
                continue;
            };
            let incomplete = composite
                .sources()
                .iter()
                .any(|s| !values.contains_key(s) && !sets.contains_key(s));
            if incomplete && schema.is_decomposable(composite) {
                for (source, value) in schema.decompose(composite, stored)? {
                    match value {
                        Value::Set(set) => {
                            sets.entry(source).or_insert_with(|| TrackedSet::new(set));
                        }
                        value => {
                            values.entry(source).or_insert(value);
                        }
                    }
                }
            }
        }

        for def in schema.fields() {
            if let (FieldDef::Plain(field), Some(kind)) = (def, def.data_type().set_kind()) {
                sets.entry(field.name().to_owned())
                    .or_insert_with(|| TrackedSet::new(ValueSet::new(kind)));
            }
        }

        self.values = values;
        self.sets = sets;
        self.extras = extras;
        self.snapshot = snapshot;
        self.persisted_key = Some(schema.key_schema().extract_key(item).ok_or_else(|| {
            MapperError::MissingKey {
                model: schema.name().to_owned(),
                field: schema.key_schema().hash_key.name.clone(),
            }
        })?);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Change tracking
    // -----------------------------------------------------------------------

    /// Net change of every non-key attribute since the last sync.
    ///
    /// Unchanged attributes are left out.
    pub fn diff(&self) -> MapperResult<BTreeMap<String, Delta>> {
        let catalog = self.schema.catalog();
        let current = self.stored_values()?;
        let names: BTreeSet<&String> = self.snapshot.keys().chain(current.keys()).collect();

        let mut deltas = BTreeMap::new();
        for name in names {
            if catalog.is_primary_key(name) {
                continue;
            }
            let delta = replace_delta(self.snapshot.get(name), current.get(name));
            if !delta.is_unchanged() {
                deltas.insert(name.clone(), delta);
            }
        }
        for (name, tracked) in &self.sets {
            let delta = tracked.delta();
            if !delta.is_unchanged() {
                deltas.insert(name.clone(), delta);
            }
        }
        Ok(deltas)
    }

    /// Lowers [`Entity::diff`] to backend update actions.
    pub(crate) fn updates(&self) -> MapperResult<Vec<AttributeUpdate>> {
        let mut updates = Vec::new();
        for (name, delta) in self.diff()? {
            match delta {
                Delta::Unchanged => {}
                Delta::Replace(Some(value)) => {
                    match self.schema.encode_attribute(&name, &value)? {
                        Some(value) => updates.push(AttributeUpdate::Put {
                            attribute: name,
                            value,
                        }),
                        None => updates.push(AttributeUpdate::Remove { attribute: name }),
                    }
                }
                Delta::Replace(None) => updates.push(AttributeUpdate::Remove { attribute: name }),
                Delta::Incremental { add, remove } => {
                    if let Some(add) = add {
                        if let Some(value) = self.schema.encode_attribute(&name, &Value::Set(add))? {
                            updates.push(AttributeUpdate::Add {
                                attribute: name.clone(),
                                value,
                            });
                        }
                    }
                    if let Some(remove) = remove {
                        if let Some(value) =
                            self.schema.encode_attribute(&name, &Value::Set(remove))?
                        {
                            updates.push(AttributeUpdate::Delete {
                                attribute: name,
                                value,
                            });
                        }
                    }
                }
            }
        }
        Ok(updates)
    }

    /// Accepts the current state as synced.
    pub fn commit(&mut self) -> MapperResult<()> {
        let key = self.key()?;
        self.snapshot = self.stored_values()?;
        for tracked in self.sets.values_mut() {
            tracked.commit();
        }
        self.persisted_key = Some(key);
        Ok(())
    }

    /// Marks the entity unsaved after its item was deleted.
    pub(crate) fn forget(&mut self) {
        self.snapshot.clear();
        self.persisted_key = None;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.values == other.values
            && self.extras == other.extras
            && self.sets.len() == other.sets.len()
            && self
                .sets
                .iter()
                .zip(&other.sets)
                .all(|((a, x), (b, y))| a == b && x.value() == y.value())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.schema.name());
        for (name, value) in &self.values {
            out.field(name, value);
        }
        for (name, tracked) in &self.sets {
            out.field(name, tracked.value());
        }
        for (name, value) in &self.extras {
            out.field(name, value);
        }
        out.finish()
    }
}
