//! Store-facing types for dynamap.
//!
//! Everything in this crate describes data exactly as the wide-column store
//! sees it: tagged attribute values, raw attribute maps, and the key schema
//! of a table and its secondary indexes. The typed mapping layer lives in
//! `dynamap-core`.
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod types;

pub use attribute_value::{AttributeValue, Item};
pub use types::{
    IndexKind, KeyAttribute, KeySchema, KeyType, ScalarAttributeType, SecondaryIndex,
    TableDefinition,
};
