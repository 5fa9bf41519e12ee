//! Model declarations: fields, composites, indexes and the model registry.

pub mod composite;
pub mod field;
pub mod index;
pub mod model;
pub mod registry;

pub use composite::{Composite, DEFAULT_SEPARATOR, Merge};
pub use field::{DataType, Field, FieldCheck};
pub use index::{AccessPath, IndexCatalog, IndexDefinition};
pub use model::{FieldDef, ModelBuilder, ModelSchema};
pub use registry::Registry;
