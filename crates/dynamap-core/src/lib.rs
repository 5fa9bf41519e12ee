//! Typed object mapper for hash/range key-value stores.
//!
//! Models are declared with [`ModelSchema::builder`], collected in a
//! [`Registry`] and persisted through an [`Engine`] over any
//! [`StorageBackend`]. The mapper derives composite key values, tracks set
//! mutations so syncs write only the net change, and picks the table or
//! secondary index that can answer a filter set.
//!
//! ```
//! use std::sync::Arc;
//!
//! use dynamap_core::{
//!     Engine, Field, MapperConfig, MemoryBackend, ModelSchema, Predicate, Registry,
//! };
//!
//! let user = ModelSchema::builder("User")
//!     .field(Field::string("id"))
//!     .field(Field::string("name"))
//!     .field(Field::number("score"))
//!     .hash_key("id")
//!     .range_key("name")
//!     .local_index("score-index", "score")
//!     .build()
//!     .unwrap();
//! let backend = Arc::new(MemoryBackend::new());
//! let engine = Engine::new(
//!     backend.clone(),
//!     Arc::new(Registry::new([user]).unwrap()),
//!     MapperConfig::default(),
//! );
//! for definition in engine.table_definitions() {
//!     backend.create_table(definition);
//! }
//!
//! let mut adam = engine.create("User").unwrap()
//!     .with("id", "a").unwrap()
//!     .with("name", "Adam").unwrap()
//!     .with("score", 50).unwrap();
//! engine.save(&mut adam).unwrap();
//!
//! let plan = engine.query("User").unwrap()
//!     .filter(Predicate::eq("id", "a"))
//!     .filter(Predicate::gt("score", 10))
//!     .explain()
//!     .unwrap();
//! assert_eq!(plan.index_name(), Some("score-index"));
//! ```

pub mod backend;
pub mod condition;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod planner;
pub mod query;
pub mod schema;
pub mod tracker;
pub mod value;

pub use backend::{BackendError, MemoryBackend, StorageBackend};
pub use condition::{Operator, Predicate};
pub use config::MapperConfig;
pub use engine::Engine;
pub use entity::Entity;
pub use error::{MapperError, MapperResult};
pub use planner::{Plan, PlanMode};
pub use query::{Projection, Query, Results};
pub use schema::{Composite, DataType, Field, ModelSchema, Registry};
pub use tracker::Delta;
pub use value::{Number, SetElement, Value, ValueSet};
