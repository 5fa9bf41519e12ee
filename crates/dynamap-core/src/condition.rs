//! Filter predicates.
//!
//! A [`Predicate`] is an immutable `(field, operator, operand)` triple built
//! through one constructor per operator. Constructors never fail; operators
//! the store cannot serve (`ne`, `in`, `contains`, comparisons against null)
//! are rejected when a query is planned.

use std::fmt;

use crate::error::{MapperError, MapperResult};
use crate::value::Value;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equality.
    Eq,
    /// Inequality. Rejected by the planner.
    Ne,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// String or binary prefix.
    BeginsWith,
    /// Inclusive range.
    Between,
    /// Membership in a list. Rejected by the planner.
    In,
    /// Set or substring containment. Rejected by the planner.
    Contains,
}

impl Operator {
    /// Lower-case operator name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::BeginsWith => "beginswith",
            Self::Between => "between",
            Self::In => "in",
            Self::Contains => "contains",
        }
    }

    /// Operators other than `eq` that a range key condition accepts.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Lte | Self::Gt | Self::Gte | Self::BeginsWith | Self::Between
        )
    }

    /// Operators the planner accepts at all.
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Ne | Self::In | Self::Contains)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Comparison against an absent value.
    Null,
    /// Single value.
    One(Value),
    /// Lower and upper bound of `between`.
    Two(Value, Value),
    /// Candidate list of `in`.
    Many(Vec<Value>),
}

/// An immutable filter predicate on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    field: String,
    op: Operator,
    operand: Operand,
}

impl Predicate {
    fn single(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            operand: Operand::One(value.into()),
        }
    }

    /// `field == value`.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Eq, value)
    }

    /// `field != value`.
    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Ne, value)
    }

    /// `field < value`.
    #[must_use]
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Lt, value)
    }

    /// `field <= value`.
    #[must_use]
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Lte, value)
    }

    /// `field > value`.
    #[must_use]
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Gt, value)
    }

    /// `field >= value`.
    #[must_use]
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Gte, value)
    }

    /// `field` starts with `prefix`.
    #[must_use]
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<Value>) -> Self {
        Self::single(field, Operator::BeginsWith, prefix)
    }

    /// `low <= field <= high`.
    #[must_use]
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            op: Operator::Between,
            operand: Operand::Two(low.into(), high.into()),
        }
    }

    /// `field` is one of `values`.
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            field: field.into(),
            op: Operator::In,
            operand: Operand::Many(values.into_iter().map(Into::into).collect()),
        }
    }

    /// `field` contains `value`.
    #[must_use]
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(field, Operator::Contains, value)
    }

    /// `field` is absent.
    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: Operator::Eq,
            operand: Operand::Null,
        }
    }

    /// `field` is present.
    #[must_use]
    pub fn not_null(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: Operator::Ne,
            operand: Operand::Null,
        }
    }

    /// Target field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Operator.
    #[must_use]
    pub fn operator(&self) -> Operator {
        self.op
    }

    /// Operand.
    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// The single operand value of an `eq`/`lt`/... predicate.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match &self.operand {
            Operand::One(v) => Some(v),
            _ => None,
        }
    }

    /// Fails with `UnsupportedOperator` for operators the store cannot serve.
    pub fn ensure_supported(&self) -> MapperResult<()> {
        let operator = match (&self.operand, self.op) {
            (Operand::Null, op) => format!("{op} null"),
            (_, op) if !op.is_supported() => op.to_string(),
            _ => return Ok(()),
        };
        Err(MapperError::UnsupportedOperator {
            field: self.field.clone(),
            operator,
        })
    }

    /// Returns a copy with every operand value passed through `f`.
    pub(crate) fn try_map_values(
        &self,
        mut f: impl FnMut(Value) -> MapperResult<Value>,
    ) -> MapperResult<Self> {
        let operand = match &self.operand {
            Operand::Null => Operand::Null,
            Operand::One(v) => Operand::One(f(v.clone())?),
            Operand::Two(lo, hi) => Operand::Two(f(lo.clone())?, f(hi.clone())?),
            Operand::Many(vs) => Operand::Many(
                vs.iter()
                    .cloned()
                    .map(&mut f)
                    .collect::<MapperResult<Vec<_>>>()?,
            ),
        };
        Ok(Self {
            field: self.field.clone(),
            op: self.op,
            operand,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = &self.field;
        match (&self.operand, self.op) {
            (Operand::Null, Operator::Eq) => write!(f, "{field} IS NULL"),
            (Operand::Null, _) => write!(f, "{field} IS NOT NULL"),
            (Operand::Two(lo, hi), _) => write!(f, "{field} BETWEEN {lo} AND {hi}"),
            (Operand::Many(values), _) => {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{field} IN ({})", rendered.join(", "))
            }
            (Operand::One(v), Operator::BeginsWith) => write!(f, "begins_with({field}, {v})"),
            (Operand::One(v), Operator::Contains) => write!(f, "contains({field}, {v})"),
            (Operand::One(v), op) => {
                let symbol = match op {
                    Operator::Ne => "<>",
                    Operator::Lt => "<",
                    Operator::Lte => "<=",
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    _ => "=",
                };
                write!(f, "{field} {symbol} {v}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_accept_key_compatible_operators() {
        for p in [
            Predicate::eq("name", "Adam"),
            Predicate::lt("score", 5),
            Predicate::lte("score", 5),
            Predicate::gt("score", 5),
            Predicate::gte("score", 5),
            Predicate::begins_with("name", "A"),
            Predicate::between("score", 1, 9),
        ] {
            assert!(p.ensure_supported().is_ok(), "{p}");
        }
    }

    #[test]
    fn test_should_reject_unsupported_operators() {
        for p in [
            Predicate::ne("score", 10),
            Predicate::is_in("score", [1, 2]),
            Predicate::contains("tags", "a"),
            Predicate::is_null("name"),
            Predicate::not_null("name"),
        ] {
            let err = p.ensure_supported().unwrap_err();
            assert!(matches!(err, MapperError::UnsupportedOperator { .. }), "{p}");
        }
    }

    #[test]
    fn test_should_render_predicates() {
        assert_eq!(Predicate::gt("score", 75).to_string(), "score > 75");
        assert_eq!(
            Predicate::begins_with("name", "A").to_string(),
            r#"begins_with(name, "A")"#
        );
        assert_eq!(
            Predicate::between("score", 1, 2).to_string(),
            "score BETWEEN 1 AND 2"
        );
        assert_eq!(Predicate::is_null("name").to_string(), "name IS NULL");
    }

    #[test]
    fn test_should_map_operand_values() {
        let p = Predicate::between("score", "1", "2");
        let mapped = p
            .try_map_values(|v| {
                Ok(Value::from(v.as_str().unwrap().parse::<i64>().unwrap()))
            })
            .unwrap();
        assert_eq!(mapped.operand(), &Operand::Two(Value::from(1), Value::from(2)));
        assert_eq!(p.value(), None);
    }
}
