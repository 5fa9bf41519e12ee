//! Scenario tests for dynamap over the in-memory backend.
//!
//! Every test builds its own [`MemoryBackend`] and [`Engine`], so tests are
//! independent and run in parallel. Set `RUST_LOG=debug` (or `LOG_LEVEL`) to
//! see planner and backend logs.

use std::sync::{Arc, Once};

use dynamap_core::schema::Composite;
use tracing_subscriber::EnvFilter;
use dynamap_core::{
    DataType, Engine, Entity, Field, MapperConfig, MemoryBackend, ModelSchema, Registry, Value,
};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        let rust_log = std::env::var("RUST_LOG").ok();
        tracing_subscriber::fmt()
            .with_env_filter(log_filter(
                rust_log.as_deref(),
                &MapperConfig::from_env().log_level,
            ))
            .with_test_writer()
            .init();
    });
}

/// `RUST_LOG` wins when set, otherwise the configured `log_level`.
/// An unparsable filter falls back to `warn`.
fn log_filter(rust_log: Option<&str>, log_level: &str) -> EnvFilter {
    rust_log
        .map_or_else(|| EnvFilter::try_new(log_level), EnvFilter::try_new)
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// `User{id: hash, name: range, score}` with a local index on `score` and a
/// global index on `email`.
#[must_use]
pub fn user_model() -> Arc<ModelSchema> {
    ModelSchema::builder("User")
        .field(Field::string("id"))
        .field(Field::string("name"))
        .field(Field::number("score"))
        .field(Field::string("email"))
        .field(Field::string_set("tags"))
        .hash_key("id")
        .range_key("name")
        .local_index("score-index", "score")
        .global_index("email-index", "email", None)
        .build()
        .unwrap_or_else(|e| panic!("invalid User model: {e}"))
}

/// `Account` with two global indexes sharing the `email` hash key.
#[must_use]
pub fn account_model() -> Arc<ModelSchema> {
    ModelSchema::builder("Account")
        .field(Field::string("id"))
        .field(Field::string("email"))
        .field(Field::number("created"))
        .hash_key("id")
        .global_index("email-index", "email", None)
        .global_index("email-created-index", "email", Some("created"))
        .build()
        .unwrap_or_else(|e| panic!("invalid Account model: {e}"))
}

/// `Post` keyed by `uid = type:id`, ranged by a custom `score` merge of
/// `ts` and `upvotes`, with a sparse index keyed by `username`.
#[must_use]
pub fn post_model() -> Arc<ModelSchema> {
    ModelSchema::builder("Post")
        .field(Field::string("type"))
        .field(Field::string("id"))
        .field(Field::number("ts"))
        .field(Field::number("upvotes"))
        .field(Field::string("username"))
        .composite(Composite::concat("uid", ["type", "id"]))
        .composite(Composite::custom(
            "score",
            ["ts", "upvotes"],
            DataType::Number,
            |values| {
                let ts = values[0].as_i64().unwrap_or_default();
                let upvotes = values[1].as_i64().unwrap_or_default();
                Ok(Value::from(ts + 1000 * upvotes))
            },
        ))
        .hash_key("uid")
        .range_key("score")
        .global_index("user-index", "username", Some("ts"))
        .build()
        .unwrap_or_else(|e| panic!("invalid Post model: {e}"))
}

/// `Pair` with a global index on `ab = a:b`.
#[must_use]
pub fn pair_model() -> Arc<ModelSchema> {
    ModelSchema::builder("Pair")
        .field(Field::string("id"))
        .field(Field::string("a"))
        .field(Field::string("b"))
        .composite(Composite::concat("ab", ["a", "b"]))
        .hash_key("id")
        .global_index("ab-index", "ab", None)
        .build()
        .unwrap_or_else(|e| panic!("invalid Pair model: {e}"))
}

/// `Counter` keyed by a number.
#[must_use]
pub fn counter_model() -> Arc<ModelSchema> {
    ModelSchema::builder("Counter")
        .field(Field::number("id"))
        .field(Field::number("n"))
        .hash_key("id")
        .build()
        .unwrap_or_else(|e| panic!("invalid Counter model: {e}"))
}

/// `Widget` exercising every field type.
#[must_use]
pub fn widget_model() -> Arc<ModelSchema> {
    ModelSchema::builder("Widget")
        .field(Field::string("id"))
        .field(
            Field::number("count")
                .coerce()
                .check(|v| v.as_i64().is_some_and(|n| n >= 0)),
        )
        .field(Field::boolean("enabled"))
        .field(Field::structured("meta"))
        .field(Field::datetime("created"))
        .field(Field::binary("blob"))
        .field(Field::string_set("labels"))
        .field(Field::number_set("sizes"))
        .hash_key("id")
        .build()
        .unwrap_or_else(|e| panic!("invalid Widget model: {e}"))
}

/// An engine over a fresh in-memory backend with every test model's table
/// provisioned.
#[must_use]
pub fn engine_with(config: MapperConfig) -> (Engine, Arc<MemoryBackend>) {
    init_tracing();
    let registry = Registry::new([
        user_model(),
        account_model(),
        post_model(),
        pair_model(),
        counter_model(),
        widget_model(),
    ])
        .unwrap_or_else(|e| panic!("invalid registry: {e}"));
    let backend = Arc::new(MemoryBackend::new());
    let engine = Engine::new(backend.clone(), Arc::new(registry), config);
    for definition in engine.table_definitions() {
        backend.create_table(definition);
    }
    tracing::debug!(tables = ?backend.table_names(), "provisioned test tables");
    (engine, backend)
}

/// [`engine_with`] using the default configuration.
#[must_use]
pub fn engine() -> (Engine, Arc<MemoryBackend>) {
    engine_with(MapperConfig::default())
}

/// Creates and saves a `User`.
pub fn save_user(engine: &Engine, id: &str, name: &str, score: i64) -> Entity {
    let mut user = engine
        .create("User")
        .and_then(|u| u.with("id", id))
        .and_then(|u| u.with("name", name))
        .and_then(|u| u.with("score", score))
        .unwrap_or_else(|e| panic!("failed to build user {id}/{name}: {e}"));
    engine
        .save(&mut user)
        .unwrap_or_else(|e| panic!("failed to save user {id}/{name}: {e}"));
    user
}

/// Field value as a string, for compact assertions.
#[must_use]
pub fn text(entity: &Entity, field: &str) -> Option<String> {
    entity.get(field).and_then(|v| v.as_str().map(str::to_owned))
}

mod test_composite;
mod test_fields;
mod test_queries;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_prefer_rust_log_over_configured_level() {
        assert_eq!(log_filter(None, "debug").to_string(), "debug");
        assert_eq!(
            log_filter(Some("dynamap_core=trace"), "debug").to_string(),
            "dynamap_core=trace"
        );
        let level = MapperConfig::builder().log_level("error").build().log_level;
        assert_eq!(log_filter(None, &level).to_string(), "error");
    }
}
