//! Typed field values.
//!
//! [`Value`] is what entities hold and what predicates compare against. It
//! is independent of the store encoding; [`crate::schema::field`] maps it to
//! and from [`AttributeValue`](dynamap_model::AttributeValue).

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

// ---------------------------------------------------------------------------
// Number
// ---------------------------------------------------------------------------

/// An exact decimal number.
///
/// Parsing never goes through a float: `5`, `5.0` and `"5.00"` all produce
/// the same `Number`, and integers keep every digit. Equality, hashing and
/// ordering are numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Number(Decimal);

impl Number {
    /// Parses decimal text, with or without an exponent.
    ///
    /// Returns `None` for non-numeric input and for values that do not fit
    /// a 96-bit mantissa without rounding.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Decimal::from_str_exact(text)
            .or_else(|_| Decimal::from_scientific(text))
            .ok()
            .map(Self::from_decimal)
    }

    /// Number closest to a float. `None` for non-finite or out-of-range input.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        Decimal::from_f64(value).map(Self::from_decimal)
    }

    /// Wraps a decimal, dropping trailing zeros.
    #[must_use]
    pub fn from_decimal(value: Decimal) -> Self {
        Self(value.normalize())
    }

    /// The exact decimal value.
    #[must_use]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Numeric value as a float. Large values lose precision.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    /// Numeric value as an integer when it has no fractional part and fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        if self.0.fract().is_zero() {
            self.0.to_i64()
        } else {
            None
        }
    }

    /// Returns `true` for zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Sum of two numbers, `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self::from_decimal)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<u32> for Number {
    fn from(value: u32) -> Self {
        Self(Decimal::from(value))
    }
}

impl TryFrom<f64> for Number {
    type Error = f64;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_f64(value).ok_or(value)
    }
}

// ---------------------------------------------------------------------------
// Sets
// ---------------------------------------------------------------------------

/// Element type of a homogeneous set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    /// Set of strings.
    Str,
    /// Set of numbers.
    Num,
    /// Set of binary blobs.
    Bin,
}

/// One member of a [`ValueSet`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetElement {
    /// String member.
    Str(String),
    /// Number member.
    Num(Number),
    /// Binary member.
    Bin(Bytes),
}

impl SetElement {
    /// The set kind this element belongs to.
    #[must_use]
    pub fn kind(&self) -> SetKind {
        match self {
            Self::Str(_) => SetKind::Str,
            Self::Num(_) => SetKind::Num,
            Self::Bin(_) => SetKind::Bin,
        }
    }
}

impl fmt::Display for SetElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Bin(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for SetElement {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for SetElement {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for SetElement {
    fn from(value: i64) -> Self {
        Self::Num(value.into())
    }
}

impl From<i32> for SetElement {
    fn from(value: i32) -> Self {
        Self::Num(value.into())
    }
}

impl From<Number> for SetElement {
    fn from(value: Number) -> Self {
        Self::Num(value)
    }
}

impl From<Bytes> for SetElement {
    fn from(value: Bytes) -> Self {
        Self::Bin(value)
    }
}

/// A homogeneous, ordered set of scalar members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueSet {
    kind: SetKind,
    items: BTreeSet<SetElement>,
}

impl ValueSet {
    /// Empty set of the given kind.
    #[must_use]
    pub fn new(kind: SetKind) -> Self {
        Self {
            kind,
            items: BTreeSet::new(),
        }
    }

    /// Builds a set from elements that must all be of `kind`.
    ///
    /// Returns the first element of a different kind as the error.
    pub fn from_elements(
        kind: SetKind,
        elements: impl IntoIterator<Item = SetElement>,
    ) -> Result<Self, SetElement> {
        let mut set = Self::new(kind);
        for element in elements {
            set.insert(element)?;
        }
        Ok(set)
    }

    pub(crate) fn from_parts(kind: SetKind, items: BTreeSet<SetElement>) -> Self {
        debug_assert!(items.iter().all(|e| e.kind() == kind));
        Self { kind, items }
    }

    /// Set of strings.
    #[must_use]
    pub fn strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind: SetKind::Str,
            items: items.into_iter().map(|s| SetElement::Str(s.into())).collect(),
        }
    }

    /// Set of numbers.
    #[must_use]
    pub fn numbers<N: Into<Number>>(items: impl IntoIterator<Item = N>) -> Self {
        Self {
            kind: SetKind::Num,
            items: items.into_iter().map(|n| SetElement::Num(n.into())).collect(),
        }
    }

    /// Element kind.
    #[must_use]
    pub fn kind(&self) -> SetKind {
        self.kind
    }

    /// Inserts an element. `Ok(true)` if it was not present yet.
    pub fn insert(&mut self, element: SetElement) -> Result<bool, SetElement> {
        if element.kind() != self.kind {
            return Err(element);
        }
        Ok(self.items.insert(element))
    }

    /// Removes an element, returning whether it was present.
    pub fn remove(&mut self, element: &SetElement) -> bool {
        self.items.remove(element)
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, element: &SetElement) -> bool {
        self.items.contains(element)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &SetElement> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a ValueSet {
    type Item = &'a SetElement;
    type IntoIter = std::collections::btree_set::Iter<'a, SetElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A typed value held by an entity field or used in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Text.
    Str(String),
    /// Decimal number.
    Num(Number),
    /// Binary blob.
    Bin(Bytes),
    /// Boolean.
    Bool(bool),
    /// Homogeneous set.
    Set(ValueSet),
    /// Arbitrary JSON document.
    Structured(serde_json::Value),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Short name of the value's variant, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Num(_) => "number",
            Self::Bin(_) => "binary",
            Self::Bool(_) => "boolean",
            Self::Set(set) => match set.kind() {
                SetKind::Str => "string set",
                SetKind::Num => "number set",
                SetKind::Bin => "binary set",
            },
            Self::Structured(_) => "structured",
            Self::DateTime(_) => "datetime",
        }
    }

    /// Returns the text if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Self::Num(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the numeric value as an integer if this is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    /// Returns the numeric value as a float if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    /// Returns the boolean if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the set if this is a set.
    #[must_use]
    pub fn as_set(&self) -> Option<&ValueSet> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the document if this is a structured value.
    #[must_use]
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the timestamp if this is a date-time.
    #[must_use]
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Plain-text rendering used when concatenating composite sources.
    ///
    /// Sets, binary and structured values have no text form.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Num(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::Bin(_) | Self::Set(_) | Self::Structured(_) => None,
        }
    }

    /// JSON rendering used for textual attribute encodings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use base64::Engine as _;

        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Num(n) => serde_json::from_str(&n.to_string())
                .unwrap_or_else(|_| serde_json::Value::String(n.to_string())),
            Self::Bin(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Set(set) => set
                .iter()
                .map(|e| match e {
                    SetElement::Str(s) => serde_json::Value::String(s.clone()),
                    SetElement::Num(n) => Self::Num(*n).to_json(),
                    SetElement::Bin(b) => Self::Bin(b.clone()).to_json(),
                })
                .collect(),
            Self::Structured(v) => v.clone(),
            Self::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }

    /// Maps a JSON document back to the closest typed value.
    ///
    /// Strings, numbers and booleans become scalars; arrays and objects stay
    /// structured.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match Number::parse(&n.to_string()) {
                Some(num) => Self::Num(num),
                None => Self::Structured(serde_json::Value::Number(n)),
            },
            other => Self::Structured(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Bin(b) => write!(f, "<{} bytes>", b.len()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Set(set) => {
                f.write_str("{")?;
                for (i, e) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("}")
            }
            Self::Structured(v) => write!(f, "{v}"),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Num(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Num(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Num(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Num(value.into())
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Self::Num(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Bin(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bin(Bytes::from(value))
    }
}

impl From<ValueSet> for Value {
    fn from(value: ValueSet) -> Self {
        Self::Set(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_canonicalize_numbers() {
        assert_eq!(Number::parse("5.00").unwrap(), Number::from(5));
        assert_eq!(Number::parse(" 1.5 ").unwrap().to_string(), "1.5");
        assert_eq!(Number::parse("1.5e3").unwrap(), Number::from(1500));
        assert_eq!(Number::try_from(-3.0).unwrap().to_string(), "-3");
        assert!(Number::parse("abc").is_none());
        assert!(Number::parse("inf").is_none());
        assert!(Number::try_from(f64::NAN).is_err());
    }

    #[test]
    fn test_should_keep_every_digit_of_large_integers() {
        let big = Number::parse("9007199254740993").unwrap();
        assert_eq!(big.to_string(), "9007199254740993");
        assert_eq!(big.as_i64(), Some(9_007_199_254_740_993));
        assert_ne!(big, Number::parse("9007199254740992").unwrap());
        assert!(big > Number::parse("9007199254740992").unwrap());

        let mut set = ValueSet::new(SetKind::Num);
        set.insert(SetElement::Num(big)).unwrap();
        set.insert(SetElement::Num(Number::parse("9007199254740992").unwrap()))
            .unwrap();
        assert_eq!(set.len(), 2);
        assert!(Number::parse("123456789012345678901234567890123").is_none());
    }

    #[test]
    fn test_should_order_numbers_numerically() {
        let mut nums = vec![
            Number::from(10),
            Number::from(9),
            Number::parse("-1.5").unwrap(),
        ];
        nums.sort();
        let rendered: Vec<_> = nums.iter().map(Number::to_string).collect();
        assert_eq!(rendered, vec!["-1.5", "9", "10"]);
    }

    #[test]
    fn test_should_reject_foreign_set_member() {
        let mut set = ValueSet::strings(["a"]);
        assert_eq!(set.insert("b".into()), Ok(true));
        assert_eq!(set.insert("a".into()), Ok(false));
        let rejected = set.insert(SetElement::from(7)).unwrap_err();
        assert_eq!(rejected, SetElement::from(7));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_should_render_text_for_concatenation() {
        assert_eq!(Value::from("tweet").to_text().as_deref(), Some("tweet"));
        assert_eq!(Value::from(12).to_text().as_deref(), Some("12"));
        assert_eq!(Value::from(ValueSet::strings(["a"])).to_text(), None);
    }

    #[test]
    fn test_should_map_json_to_closest_value() {
        assert_eq!(Value::from_json(serde_json::json!("x")), Value::from("x"));
        assert_eq!(Value::from_json(serde_json::json!(4)), Value::from(4));
        assert_eq!(Value::from_json(serde_json::json!(true)), Value::from(true));
        assert_eq!(
            Value::from_json(serde_json::json!({"a": 1})),
            Value::Structured(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_should_render_sets_as_json_arrays() {
        let json = Value::from(ValueSet::numbers([2, 1])).to_json();
        assert_eq!(json, serde_json::json!([1, 2]));
    }
}
