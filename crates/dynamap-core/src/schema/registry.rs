//! Registry of model schemas.
//!
//! A [`Registry`] is assembled once and never mutated. One registry may be
//! installed process-wide with [`Registry::install`]; later reads go through
//! [`Registry::global`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::error::{MapperError, MapperResult};
use crate::schema::model::ModelSchema;

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Immutable name-to-schema map.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<String, Arc<ModelSchema>>,
}

impl Registry {
    /// Builds a registry. Fails on two models with the same name.
    pub fn new(models: impl IntoIterator<Item = Arc<ModelSchema>>) -> MapperResult<Self> {
        let mut map = HashMap::new();
        for model in models {
            let name = model.name().to_owned();
            if map.insert(name.clone(), model).is_some() {
                return Err(MapperError::InvalidSchema {
                    model: name,
                    message: "model registered twice".to_owned(),
                });
            }
        }
        Ok(Self { models: map })
    }

    /// Looks up a model by name.
    pub fn model(&self, name: &str) -> MapperResult<Arc<ModelSchema>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::UnknownModel {
                model: name.to_owned(),
            })
    }

    /// Registered model names, sorted.
    #[must_use]
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every registered schema.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.values()
    }

    /// Publishes `registry` as the process-wide registry.
    ///
    /// Succeeds once per process; later calls fail with `RegistryInitialized`.
    pub fn install(registry: Self) -> MapperResult<Arc<Self>> {
        let registry = Arc::new(registry);
        GLOBAL
            .set(Arc::clone(&registry))
            .map_err(|_| MapperError::RegistryInitialized)?;
        info!(models = registry.models.len(), "installed model registry");
        Ok(registry)
    }

    /// The process-wide registry, if one was installed.
    #[must_use]
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }
}
