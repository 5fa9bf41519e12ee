//! Mapper error types.

use std::fmt;

use crate::backend::BackendError;

/// Where a backend call originated: operation, table, index and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Engine or executor operation (`"save"`, `"query"`, ...).
    pub operation: &'static str,
    /// Fully-qualified table name.
    pub table: String,
    /// Index name for index reads.
    pub index: Option<String>,
    /// Rendered primary key for single-item operations.
    pub key: Option<String>,
}

impl OperationContext {
    /// Context for an operation against a table.
    #[must_use]
    pub fn new(operation: &'static str, table: impl Into<String>) -> Self {
        Self {
            operation,
            table: table.into(),
            index: None,
            key: None,
        }
    }

    /// Attaches the index used by the operation.
    #[must_use]
    pub fn with_index(mut self, index: Option<&str>) -> Self {
        self.index = index.map(str::to_owned);
        self
    }

    /// Attaches the rendered key the operation targeted.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Converts a backend failure, keeping conditional-check failures distinct.
    #[must_use]
    pub fn wrap(self, err: BackendError) -> MapperError {
        match err {
            BackendError::ConditionFailed => MapperError::ConditionFailed { context: self },
            source => MapperError::Backend {
                context: self,
                source,
            },
        }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.operation, self.table)?;
        if let Some(index) = &self.index {
            write!(f, " via {index}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " for key {key}")?;
        }
        Ok(())
    }
}

/// Errors raised by the mapper.
///
/// Planning failures (`NoMatchingIndex`, `AmbiguousIndex`,
/// `MultipleRangeCondition`, `MissingHashKey`, `UnsupportedOperator`,
/// `ScanWithIndex`, `UnsupportedScanOption`) are produced before any
/// backend call is made.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// A model declaration is inconsistent.
    #[error("invalid schema for model {model}: {message}")]
    InvalidSchema {
        /// Model name.
        model: String,
        /// What is wrong.
        message: String,
    },

    /// No model with this name is registered.
    #[error("unknown model: {model}")]
    UnknownModel {
        /// Requested model name.
        model: String,
    },

    /// The model declares no field with this name.
    #[error("model {model} has no field named {field}")]
    UnknownField {
        /// Model name.
        model: String,
        /// Requested field.
        field: String,
    },

    /// The model declares no index with this name.
    #[error("model {model} has no index named {index}")]
    UnknownIndex {
        /// Model name.
        model: String,
        /// Requested index.
        index: String,
    },

    /// A value does not fit the field type and cannot be coerced.
    #[error("field {field} expects {expected}, got {found}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared data type.
        expected: &'static str,
        /// Description of the offending value.
        found: String,
    },

    /// An assigned value failed the field's validity check.
    #[error("value {value} rejected by the check on field {field}")]
    CheckFailed {
        /// Field name.
        field: String,
        /// The rejected value.
        value: String,
    },

    /// Assignment to a composite whose merge cannot be inverted.
    #[error("composite field {field} is read-only; assign its sources instead")]
    ReadOnlyComposite {
        /// Composite field name.
        field: String,
    },

    /// A composite was needed before all of its sources were set.
    #[error("composite field {field} is missing sources: {}", .missing.join(", "))]
    IncompleteComposite {
        /// Composite field name.
        field: String,
        /// Unset source fields.
        missing: Vec<String>,
    },

    /// A key attribute has no value.
    #[error("model {model} is missing a value for key field {field}")]
    MissingKey {
        /// Model name.
        model: String,
        /// Key field name.
        field: String,
    },

    /// A persisted entity's key fields were reassigned.
    #[error("key of a persisted {model} entity was modified")]
    KeyChanged {
        /// Model name.
        model: String,
    },

    /// A stored attribute could not be decoded into its field type.
    #[error("cannot decode field {field}: {message}")]
    Decode {
        /// Field name.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// No index can answer the filter set.
    #[error("no index of {model} can answer a query on: {}", .fields.join(", "))]
    NoMatchingIndex {
        /// Model name.
        model: String,
        /// Fields carrying equality predicates.
        fields: Vec<String>,
    },

    /// More than one index is an equally good fit.
    #[error("ambiguous index for {model}, candidates: {}", .candidates.join(", "))]
    AmbiguousIndex {
        /// Model name.
        model: String,
        /// Names of the tied access paths.
        candidates: Vec<String>,
    },

    /// More than one range predicate targets the chosen range key.
    #[error("multiple range conditions on {field} of {model}")]
    MultipleRangeCondition {
        /// Model name.
        model: String,
        /// Range key field.
        field: String,
    },

    /// A query needs an equality predicate on a hash key.
    #[error("query on {model} needs an equality condition on hash key {field}")]
    MissingHashKey {
        /// Model name.
        model: String,
        /// Hash key field.
        field: String,
    },

    /// The operator is not allowed in queries or scans.
    #[error("operator {operator} is not supported on field {field}")]
    UnsupportedOperator {
        /// Field name.
        field: String,
        /// Operator spelling.
        operator: String,
    },

    /// A scan was asked to read from a secondary index.
    #[error("scan on {model} cannot use index {index}")]
    ScanWithIndex {
        /// Model name.
        model: String,
        /// Requested index.
        index: String,
    },

    /// A scan was given a read option only queries support.
    #[error("scan on {model} does not support {option}")]
    UnsupportedScanOption {
        /// Model name.
        model: String,
        /// The rejected option.
        option: &'static str,
    },

    /// `one()` found no rows.
    #[error("expected one {model}, found none")]
    NoResult {
        /// Model name.
        model: String,
    },

    /// `one()` found more than one row.
    #[error("expected one {model}, found several")]
    MultipleResults {
        /// Model name.
        model: String,
    },

    /// The backend rejected a conditional write.
    #[error("condition failed: {context}")]
    ConditionFailed {
        /// Originating operation.
        context: OperationContext,
    },

    /// Any other backend failure.
    #[error("backend error during {context}: {source}")]
    Backend {
        /// Originating operation.
        context: OperationContext,
        /// Backend-reported cause.
        #[source]
        source: BackendError,
    },

    /// The process-wide registry was already installed.
    #[error("model registry is already initialized")]
    RegistryInitialized,
}

impl MapperError {
    /// Returns `true` for errors raised by the query planner.
    #[must_use]
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingIndex { .. }
                | Self::AmbiguousIndex { .. }
                | Self::MultipleRangeCondition { .. }
                | Self::MissingHashKey { .. }
                | Self::UnsupportedOperator { .. }
                | Self::ScanWithIndex { .. }
                | Self::UnsupportedScanOption { .. }
                | Self::UnknownIndex { .. }
        )
    }
}

/// Convenience result type for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;
