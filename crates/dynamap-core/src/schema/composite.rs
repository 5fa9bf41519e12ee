//! Composite fields derived from several source fields.

use std::fmt;
use std::sync::Arc;

use crate::error::{MapperError, MapperResult};
use crate::schema::field::DataType;
use crate::value::Value;

/// Separator used by concatenation composites unless overridden.
pub const DEFAULT_SEPARATOR: &str = ":";

/// User-supplied merge function. Receives source values in declared order.
pub type MergeFn = Arc<dyn Fn(&[Value]) -> MapperResult<Value> + Send + Sync>;

/// How a composite combines its sources.
#[derive(Clone)]
pub enum Merge {
    /// Text forms joined with a separator. Invertible.
    Concat {
        /// Join separator.
        separator: String,
    },
    /// Arbitrary function. Not invertible.
    Custom(MergeFn),
}

impl fmt::Debug for Merge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concat { separator } => f
                .debug_struct("Concat")
                .field("separator", separator)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A field whose stored value is merged from source fields.
#[derive(Debug, Clone)]
pub struct Composite {
    name: String,
    sources: Vec<String>,
    merge: Merge,
    data_type: DataType,
}

impl Composite {
    /// Concatenation composite: `source1:source2:...`, stored as a string.
    #[must_use]
    pub fn concat<S: Into<String>>(
        name: impl Into<String>,
        sources: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            merge: Merge::Concat {
                separator: DEFAULT_SEPARATOR.to_owned(),
            },
            data_type: DataType::String,
        }
    }

    /// Composite computed by `merge`, stored as `data_type`.
    #[must_use]
    pub fn custom<S, F>(
        name: impl Into<String>,
        sources: impl IntoIterator<Item = S>,
        data_type: DataType,
        merge: F,
    ) -> Self
    where
        S: Into<String>,
        F: Fn(&[Value]) -> MapperResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            merge: Merge::Custom(Arc::new(merge)),
            data_type,
        }
    }

    /// Overrides the join separator of a concatenation composite.
    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        if let Merge::Concat { separator: sep } = &mut self.merge {
            *sep = separator.into();
        }
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source field names in merge order.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Stored data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Merge strategy.
    #[must_use]
    pub fn merge(&self) -> &Merge {
        &self.merge
    }

    /// Whether the merge is the invertible concatenation.
    #[must_use]
    pub fn is_concat(&self) -> bool {
        matches!(self.merge, Merge::Concat { .. })
    }

    /// Whether the concatenation of `values` splits back into exactly these
    /// values, i.e. no component but the last contains the separator.
    ///
    /// Always `false` for custom merges.
    #[must_use]
    pub fn splits_back(&self, values: &[&Value]) -> bool {
        let Merge::Concat { separator } = &self.merge else {
            return false;
        };
        let leading = values.len().saturating_sub(1);
        values[..leading]
            .iter()
            .all(|v| v.to_text().is_some_and(|t| !t.contains(separator.as_str())))
    }

    /// Computes the stored value from source values looked up by name.
    ///
    /// Fails with `IncompleteComposite` listing every unset source.
    pub fn resolve(&self, lookup: impl Fn(&str) -> Option<Value>) -> MapperResult<Value> {
        let mut values = Vec::with_capacity(self.sources.len());
        let mut missing = Vec::new();
        for source in &self.sources {
            match lookup(source) {
                Some(v) => values.push(v),
                None => missing.push(source.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(MapperError::IncompleteComposite {
                field: self.name.clone(),
                missing,
            });
        }

        let merged = match &self.merge {
            Merge::Concat { separator } => {
                let parts = values
                    .iter()
                    .zip(&self.sources)
                    .map(|(v, source)| {
                        v.to_text().ok_or_else(|| MapperError::TypeMismatch {
                            field: source.clone(),
                            expected: "a value with a text form",
                            found: v.kind_name().to_owned(),
                        })
                    })
                    .collect::<MapperResult<Vec<_>>>()?;
                Value::Str(parts.join(separator))
            }
            Merge::Custom(merge) => merge(&values)?,
        };
        self.data_type.coerce(&self.name, merged, true)
    }

    /// Splits a stored concatenation back into its sources.
    ///
    /// `source_type` gives the data type of each plain source field; each
    /// component is coerced to it. The last source keeps any further
    /// separators. Custom merges and composite sources cannot be split.
    pub fn decompose(
        &self,
        stored: &Value,
        source_type: impl Fn(&str) -> Option<DataType>,
    ) -> MapperResult<Vec<(String, Value)>> {
        let Merge::Concat { separator } = &self.merge else {
            return Err(MapperError::ReadOnlyComposite {
                field: self.name.clone(),
            });
        };
        let text = stored.to_text().ok_or_else(|| MapperError::TypeMismatch {
            field: self.name.clone(),
            expected: "string",
            found: stored.kind_name().to_owned(),
        })?;

        let parts: Vec<&str> = text.splitn(self.sources.len(), separator.as_str()).collect();
        if parts.len() != self.sources.len() {
            return Err(MapperError::Decode {
                field: self.name.clone(),
                message: format!(
                    "expected {} components separated by {separator:?}, got {}",
                    self.sources.len(),
                    parts.len()
                ),
            });
        }

        self.sources
            .iter()
            .zip(parts)
            .map(|(source, part)| {
                let data_type = source_type(source).ok_or_else(|| {
                    MapperError::ReadOnlyComposite {
                        field: self.name.clone(),
                    }
                })?;
                let value = data_type.coerce(source, Value::from(part), true)?;
                Ok((source.clone(), value))
            })
            .collect()
    }
}
