//! Storage backend contract.
//!
//! The mapper never talks to the store directly. Every read and write goes
//! through a [`StorageBackend`], which operates on raw attribute maps
//! ([`Item`]) and structured conditions. Transports, retries and
//! consistency are the backend's business.

pub mod expression;
pub mod memory;

use std::fmt;

use dynamap_model::{AttributeValue, Item};

pub use expression::{RenderedExpression, render_conditions, render_key_condition};
pub use memory::{BackendCall, MemoryBackend};

/// Comparison applied to one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOp {
    /// Equal to.
    Eq(AttributeValue),
    /// Less than.
    Lt(AttributeValue),
    /// Less than or equal.
    Le(AttributeValue),
    /// Greater than.
    Gt(AttributeValue),
    /// Greater than or equal.
    Ge(AttributeValue),
    /// Inclusive range.
    Between(AttributeValue, AttributeValue),
    /// String or binary prefix.
    BeginsWith(AttributeValue),
    /// Attribute present.
    Exists,
    /// Attribute absent.
    NotExists,
}

/// A condition on one attribute, used for key, filter and write conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Stored attribute name.
    pub attribute: String,
    /// Comparison.
    pub op: ConditionOp,
}

impl Condition {
    /// Builds a condition.
    #[must_use]
    pub fn new(attribute: impl Into<String>, op: ConditionOp) -> Self {
        Self {
            attribute: attribute.into(),
            op,
        }
    }

    /// Attribute must be present.
    #[must_use]
    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::new(attribute, ConditionOp::Exists)
    }

    /// Attribute must be absent.
    #[must_use]
    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self::new(attribute, ConditionOp::NotExists)
    }
}

/// Partition equality plus optional range condition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    /// Hash key attribute.
    pub hash_attribute: String,
    /// Required hash key value.
    pub hash_value: AttributeValue,
    /// Condition on the range key of the access path.
    pub range: Option<Condition>,
}

/// A query against the table or one of its indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Table name.
    pub table: String,
    /// Index name, `None` for the table.
    pub index: Option<String>,
    /// Key condition.
    pub key_condition: KeyCondition,
    /// Conditions every returned item must satisfy, joined with AND.
    pub filter: Vec<Condition>,
    /// Maximum number of matching items in the page.
    pub limit: Option<usize>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Item>,
    /// Ascending range key order when `true`.
    pub scan_forward: bool,
    /// Strongly consistent read when `true`.
    pub consistent_read: bool,
    /// Attributes to return; `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

/// A full-table scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Table name.
    pub table: String,
    /// Conditions every returned item must satisfy, joined with AND.
    pub filter: Vec<Condition>,
    /// Maximum number of matching items in the page.
    pub limit: Option<usize>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Item>,
    /// Attributes to return; `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Matching items.
    pub items: Vec<Item>,
    /// Resume key; `None` once the sequence is exhausted.
    pub last_evaluated_key: Option<Item>,
}

/// One action of a partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeUpdate {
    /// Overwrite the attribute.
    Put {
        /// Attribute name.
        attribute: String,
        /// New value.
        value: AttributeValue,
    },
    /// Delete the attribute.
    Remove {
        /// Attribute name.
        attribute: String,
    },
    /// Union the set members in (creating the attribute if absent).
    Add {
        /// Attribute name.
        attribute: String,
        /// Set of members to add.
        value: AttributeValue,
    },
    /// Remove set members; an emptied set is removed.
    Delete {
        /// Attribute name.
        attribute: String,
        /// Set of members to remove.
        value: AttributeValue,
    },
}

impl AttributeUpdate {
    /// Attribute the action targets.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Put { attribute, .. }
            | Self::Remove { attribute }
            | Self::Add { attribute, .. }
            | Self::Delete { attribute, .. } => attribute,
        }
    }
}

/// Errors reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A write condition did not hold.
    #[error("the conditional request failed")]
    ConditionFailed,

    /// The table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Table name.
        table: String,
    },

    /// The index does not exist on the table.
    #[error("index {index} not found on table {table}")]
    IndexNotFound {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },

    /// The request is malformed for this table.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transport or any other backend-specific failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Operations the mapper needs from a store.
///
/// Conditions passed to writes are joined with AND and evaluated against
/// the current item (an empty map if none exists). A failing condition is
/// reported as [`BackendError::ConditionFailed`] and nothing is written.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Writes a full item.
    fn put(&self, table: &str, item: Item, condition: &[Condition]) -> Result<(), BackendError>;

    /// Reads one item by primary key.
    fn get(&self, table: &str, key: &Item) -> Result<Option<Item>, BackendError>;

    /// Deletes one item by primary key.
    fn delete(&self, table: &str, key: &Item, condition: &[Condition])
    -> Result<(), BackendError>;

    /// Reads one page of a key-condition query.
    fn query(&self, request: &QueryRequest) -> Result<Page, BackendError>;

    /// Reads one page of a scan.
    fn scan(&self, request: &ScanRequest) -> Result<Page, BackendError>;

    /// Applies a partial update and returns the full updated item.
    ///
    /// An `Add` and a `Delete` on the same attribute may be sent together;
    /// stores that reject overlapping paths must split them.
    fn update(
        &self,
        table: &str,
        key: &Item,
        updates: &[AttributeUpdate],
        condition: &[Condition],
    ) -> Result<Item, BackendError>;

    /// Reads several items by primary key. Missing keys are skipped.
    fn batch_get(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, BackendError> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.get(table, key)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}
