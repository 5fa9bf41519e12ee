//! The mapper engine: entity persistence and query entry points.

use std::sync::Arc;

use dynamap_model::{Item, TableDefinition};
use tracing::{debug, info};

use crate::backend::{Condition, StorageBackend};
use crate::config::MapperConfig;
use crate::entity::Entity;
use crate::error::{MapperError, MapperResult, OperationContext};
use crate::planner::PlanMode;
use crate::query::Query;
use crate::schema::{ModelSchema, Registry};
use crate::value::Value;

/// Persists entities of registered models through a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct Engine {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<Registry>,
    config: MapperConfig,
}

impl Engine {
    /// Creates an engine over `backend` for the models in `registry`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<Registry>,
        config: MapperConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    /// Creates an engine over the process-wide registry, if one was installed.
    #[must_use]
    pub fn from_global(backend: Arc<dyn StorageBackend>, config: MapperConfig) -> Option<Self> {
        Registry::global().map(|registry| Self::new(backend, registry, config))
    }

    /// Storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Model registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Looks up a registered model.
    pub fn model(&self, name: &str) -> MapperResult<Arc<ModelSchema>> {
        self.registry.model(name)
    }

    /// Full table name of a model, with the namespace applied.
    #[must_use]
    pub fn table_name(&self, schema: &ModelSchema) -> String {
        self.config.table_name(schema.table())
    }

    /// Store-level definitions of every registered model's table, sorted by
    /// table name.
    #[must_use]
    pub fn table_definitions(&self) -> Vec<TableDefinition> {
        let mut definitions: Vec<TableDefinition> = self
            .registry
            .models()
            .map(|schema| schema.table_definition(&self.config.namespace))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions.dedup_by(|a, b| a.name == b.name);
        definitions
    }

    /// A new, unsaved entity of `model` with its field defaults applied.
    pub fn create(&self, model: &str) -> MapperResult<Entity> {
        Ok(Entity::new(self.model(model)?))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Writes the full entity, overwriting according to
    /// [`MapperConfig::default_overwrite`].
    pub fn save(&self, entity: &mut Entity) -> MapperResult<()> {
        self.save_with(entity, self.config.default_overwrite)
    }

    /// Writes the full entity.
    ///
    /// Without `overwrite` the put is conditional on no item existing under
    /// the same key, and an existing item fails with `ConditionFailed`.
    pub fn save_with(&self, entity: &mut Entity, overwrite: bool) -> MapperResult<()> {
        let schema = Arc::clone(entity.schema());
        let item = entity.to_item()?;
        let table = self.table_name(&schema);
        let condition = if overwrite {
            Vec::new()
        } else {
            vec![Condition::not_exists(&schema.key_schema().hash_key.name)]
        };
        let context = self.context("save", &table, &item, &schema);
        self.backend
            .put(&table, item, &condition)
            .map_err(|e| context.wrap(e))?;
        entity.commit()?;
        info!(model = schema.name(), table = %table, overwrite, "saved entity");
        Ok(())
    }

    /// Saves every entity in order, stopping at the first failure.
    pub fn save_all(&self, entities: &mut [Entity]) -> MapperResult<()> {
        for entity in entities.iter_mut() {
            self.save(entity)?;
        }
        Ok(())
    }

    /// Writes the entity's changes since the last sync.
    ///
    /// An unsaved entity is created with a conditional put. A persisted
    /// entity is updated in place with only the changed attributes, on the
    /// condition that the item still exists, and then reloaded from the
    /// stored result.
    pub fn sync(&self, entity: &mut Entity) -> MapperResult<()> {
        if !entity.is_persisted() {
            return self.save_with(entity, false);
        }
        let schema = Arc::clone(entity.schema());
        let key = entity.key()?;
        if entity.persisted_key() != Some(&key) {
            return Err(MapperError::KeyChanged {
                model: schema.name().to_owned(),
            });
        }

        let updates = entity.updates()?;
        if updates.is_empty() {
            debug!(model = schema.name(), "nothing to sync");
            return Ok(());
        }

        let table = self.table_name(&schema);
        let context = self.context("sync", &table, &key, &schema);
        let condition = [Condition::exists(&schema.key_schema().hash_key.name)];
        let stored = self
            .backend
            .update(&table, &key, &updates, &condition)
            .map_err(|e| context.wrap(e))?;
        entity.load(&stored)?;
        info!(
            model = schema.name(),
            table = %table,
            attributes = updates.len(),
            "synced entity"
        );
        Ok(())
    }

    /// Reloads a persisted entity from the store, discarding local changes.
    ///
    /// Fails with `NoResult` if the item no longer exists.
    pub fn refresh(&self, entity: &mut Entity) -> MapperResult<()> {
        let schema = Arc::clone(entity.schema());
        let key = match entity.persisted_key() {
            Some(key) => key.clone(),
            None => entity.key()?,
        };
        let table = self.table_name(&schema);
        let context = self.context("refresh", &table, &key, &schema);
        let item = self
            .backend
            .get(&table, &key)
            .map_err(|e| context.wrap(e))?
            .ok_or_else(|| MapperError::NoResult {
                model: schema.name().to_owned(),
            })?;
        entity.load(&item)
    }

    /// Deletes the entity's item. The entity becomes unsaved.
    pub fn delete(&self, entity: &mut Entity) -> MapperResult<()> {
        let schema = Arc::clone(entity.schema());
        let key = match entity.persisted_key() {
            Some(key) => key.clone(),
            None => entity.key()?,
        };
        let table = self.table_name(&schema);
        let context = self.context("delete", &table, &key, &schema);
        self.backend
            .delete(&table, &key, &[])
            .map_err(|e| context.wrap(e))?;
        entity.forget();
        info!(model = schema.name(), table = %table, "deleted entity");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Reads one entity by its key fields.
    ///
    /// Key fields may be given directly or, for a concatenation composite
    /// key, as the composite value or its sources.
    pub fn get(&self, model: &str, key: &[(&str, Value)]) -> MapperResult<Option<Entity>> {
        let schema = self.model(model)?;
        let key = self.key_of(&schema, key)?;
        let table = self.table_name(&schema);
        let context = self.context("get", &table, &key, &schema);
        self.backend
            .get(&table, &key)
            .map_err(|e| context.wrap(e))?
            .map(|item| Entity::from_item(Arc::clone(&schema), &item))
            .transpose()
    }

    /// Reads several entities by key. Missing items are skipped.
    pub fn batch_get(
        &self,
        model: &str,
        keys: &[Vec<(&str, Value)>],
    ) -> MapperResult<Vec<Entity>> {
        let schema = self.model(model)?;
        let keys = keys
            .iter()
            .map(|fields| self.key_of(&schema, fields))
            .collect::<MapperResult<Vec<_>>>()?;
        let table = self.table_name(&schema);
        let items = self
            .backend
            .batch_get(&table, &keys)
            .map_err(|e| OperationContext::new("batch_get", &table).wrap(e))?;
        debug!(
            model = schema.name(),
            requested = keys.len(),
            items = items.len(),
            "batch get"
        );
        items
            .iter()
            .map(|item| Entity::from_item(Arc::clone(&schema), item))
            .collect()
    }

    /// Starts a query over `model`.
    pub fn query(&self, model: &str) -> MapperResult<Query<'_>> {
        Ok(Query::new(self, self.model(model)?, PlanMode::Query))
    }

    /// Starts a full-table scan over `model`.
    pub fn scan(&self, model: &str) -> MapperResult<Query<'_>> {
        Ok(Query::new(self, self.model(model)?, PlanMode::Scan))
    }

    fn key_of(&self, schema: &Arc<ModelSchema>, fields: &[(&str, Value)]) -> MapperResult<Item> {
        let mut entity = Entity::new(Arc::clone(schema));
        for (name, value) in fields {
            entity.set(name, value.clone())?;
        }
        entity.key()
    }

    pub(crate) fn context(
        &self,
        operation: &'static str,
        table: &str,
        key: &Item,
        schema: &ModelSchema,
    ) -> OperationContext {
        let rendered = schema
            .key_schema()
            .attribute_names()
            .filter_map(|name| key.get(name).map(|value| format!("{name}={value}")))
            .collect::<Vec<_>>()
            .join(", ");
        OperationContext::new(operation, table).with_key(rendered)
    }
}
