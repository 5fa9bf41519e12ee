//! Mapper configuration.
//!
//! Provides [`MapperConfig`], loaded from environment variables or assembled
//! with the typed builder.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Runtime settings of an [`Engine`](crate::engine::Engine).
///
/// # Examples
///
/// ```
/// use dynamap_core::config::MapperConfig;
///
/// let config = MapperConfig::default();
/// assert_eq!(config.page_size, 100);
/// assert!(config.namespace.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct MapperConfig {
    /// Prefix prepended to every model's table name.
    #[builder(default, setter(into))]
    pub namespace: String,

    /// Number of items requested from the backend per page.
    #[builder(default = 100)]
    pub page_size: usize,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"), setter(into))]
    pub log_level: String,

    /// Whether `Engine::save` replaces an existing item with the same key.
    #[builder(default = true)]
    pub default_overwrite: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            page_size: 100,
            log_level: String::from("info"),
            default_overwrite: true,
        }
    }
}

impl MapperConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DYNAMAP_NAMESPACE` | empty |
    /// | `DYNAMAP_PAGE_SIZE` | `100` |
    /// | `LOG_LEVEL` | `info` |
    /// | `DYNAMAP_DEFAULT_OVERWRITE` | `true` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DYNAMAP_NAMESPACE") {
            config.namespace = v;
        }
        if let Ok(v) = std::env::var("DYNAMAP_PAGE_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    config.page_size = n;
                }
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("DYNAMAP_DEFAULT_OVERWRITE") {
            config.default_overwrite = parse_bool(&v);
        }

        config
    }

    /// Full table name for a model table, with the namespace applied.
    #[must_use]
    pub fn table_name(&self, table: &str) -> String {
        format!("{}{table}", self.namespace)
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
