//! Tagged attribute values as stored by the backend.
//!
//! An `AttributeValue` holds exactly one variant. Numbers are carried as
//! decimal text and binary payloads as owned bytes.

use std::collections::HashMap;
use std::fmt;

use crate::types::ScalarAttributeType;

/// A raw attribute map: one stored item, or the key of one.
pub type Item = HashMap<String, AttributeValue>;

/// A single stored attribute value.
///
/// Numbers are kept as decimal text so no precision is lost between the
/// mapper and the store.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value.
    S(String),
    /// Number value as decimal text.
    N(String),
    /// Binary value.
    B(bytes::Bytes),
    /// String set.
    Ss(Vec<String>),
    /// Number set, each member as decimal text.
    Ns(Vec<String>),
    /// Binary set.
    Bs(Vec<bytes::Bytes>),
    /// Native boolean.
    Bool(bool),
    /// Null marker.
    Null(bool),
    /// Ordered list.
    L(Vec<AttributeValue>),
    /// Nested map.
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Shorthand for an `S` value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    /// Shorthand for an `N` value.
    #[must_use]
    pub fn number(value: impl fmt::Display) -> Self {
        Self::N(value.to_string())
    }

    /// Returns the string if this is an `S` value.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the decimal text if this is an `N` value.
    #[must_use]
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the bytes if this is a `B` value.
    #[must_use]
    pub fn as_b(&self) -> Option<&bytes::Bytes> {
        match self {
            Self::B(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `Bool` value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` for the three set variants.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Ss(_) | Self::Ns(_) | Self::Bs(_))
    }

    /// Number of members when this is a set, `None` otherwise.
    #[must_use]
    pub fn set_len(&self) -> Option<usize> {
        match self {
            Self::Ss(v) | Self::Ns(v) => Some(v.len()),
            Self::Bs(v) => Some(v.len()),
            _ => None,
        }
    }

    /// The key-eligible scalar type of this value, if it has one.
    #[must_use]
    pub fn scalar_type(&self) -> Option<ScalarAttributeType> {
        match self {
            Self::S(_) => Some(ScalarAttributeType::S),
            Self::N(_) => Some(ScalarAttributeType::N),
            Self::B(_) => Some(ScalarAttributeType::B),
            _ => None,
        }
    }

    /// The store's type tag for this value (`"S"`, `"NS"`, `"BOOL"`, ...).
    #[must_use]
    pub fn type_descriptor(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Ss(_) => "SS",
            Self::Ns(_) => "NS",
            Self::Bs(_) => "BS",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::L(_) => "L",
            Self::M(_) => "M",
        }
    }
}

impl Eq for AttributeValue {}

impl std::hash::Hash for AttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::S(s) | Self::N(s) => s.hash(state),
            Self::B(b) => b.hash(state),
            Self::Bool(b) | Self::Null(b) => b.hash(state),
            Self::Ss(v) | Self::Ns(v) => v.hash(state),
            Self::Bs(v) => v.iter().for_each(|b| b.hash(state)),
            Self::L(v) => v.hash(state),
            Self::M(m) => {
                // Map iteration order is unstable; hash in key order.
                let mut entries: Vec<_> = m.iter().collect();
                entries.sort_unstable_by_key(|(k, _)| *k);
                for (k, v) in entries {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{s:?}"),
            Self::N(n) => f.write_str(n),
            Self::B(b) => write!(f, "<{} bytes>", b.len()),
            Self::Ss(v) => write!(f, "SS{v:?}"),
            Self::Ns(v) => write!(f, "NS[{}]", v.join(", ")),
            Self::Bs(v) => write!(f, "BS<{} members>", v.len()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null(_) => f.write_str("null"),
            Self::L(v) => write!(f, "L<{} elements>", v.len()),
            Self::M(m) => write!(f, "M<{} keys>", m.len()),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::S(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_owned())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
