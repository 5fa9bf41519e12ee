//! Field declarations, data types, coercion and attribute encoding.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dynamap_model::{AttributeValue, ScalarAttributeType};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::condition::Operator;
use crate::error::{MapperError, MapperResult};
use crate::value::{Number, SetElement, SetKind, Value, ValueSet};

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Text, stored as `S`.
    String,
    /// Decimal number, stored as `N`.
    Number,
    /// Binary blob, stored as `B`.
    Binary,
    /// Boolean, stored as JSON text in `S`.
    Boolean,
    /// Set of strings, stored as `SS`.
    StringSet,
    /// Set of numbers, stored as `NS`.
    NumberSet,
    /// Set of binary blobs, stored as `BS`.
    BinarySet,
    /// Arbitrary JSON document, stored as JSON text in `S`.
    Structured,
    /// UTC timestamp, stored as epoch seconds in `N`.
    DateTime,
}

impl DataType {
    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Binary => "binary",
            Self::Boolean => "boolean",
            Self::StringSet => "string set",
            Self::NumberSet => "number set",
            Self::BinarySet => "binary set",
            Self::Structured => "structured",
            Self::DateTime => "datetime",
        }
    }

    /// Element kind for set types.
    #[must_use]
    pub fn set_kind(self) -> Option<SetKind> {
        match self {
            Self::StringSet => Some(SetKind::Str),
            Self::NumberSet => Some(SetKind::Num),
            Self::BinarySet => Some(SetKind::Bin),
            _ => None,
        }
    }

    /// Store scalar type when this type may be used as a key attribute.
    #[must_use]
    pub fn scalar_type(self) -> Option<ScalarAttributeType> {
        match self {
            Self::String => Some(ScalarAttributeType::S),
            Self::Number | Self::DateTime => Some(ScalarAttributeType::N),
            Self::Binary => Some(ScalarAttributeType::B),
            _ => None,
        }
    }

    /// Implicit default for fields that declare none.
    #[must_use]
    pub fn implicit_default(self) -> Option<Value> {
        match self {
            Self::Number => Some(Value::from(0)),
            Self::Boolean => Some(Value::Bool(false)),
            Self::Structured => Some(Value::Structured(serde_json::json!({}))),
            Self::StringSet | Self::NumberSet | Self::BinarySet => {
                self.set_kind().map(|kind| Value::Set(ValueSet::new(kind)))
            }
            Self::String | Self::Binary | Self::DateTime => None,
        }
    }

    /// Whether predicates with `op` may target a field of this type.
    #[must_use]
    pub fn allows(self, op: Operator) -> bool {
        match op {
            Operator::Eq => true,
            Operator::BeginsWith => matches!(self, Self::String | Self::Binary),
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte | Operator::Between => {
                matches!(
                    self,
                    Self::String | Self::Number | Self::Binary | Self::DateTime
                )
            }
            Operator::Ne | Operator::In | Operator::Contains => false,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::Str(_))
            | (Self::Number, Value::Num(_))
            | (Self::Binary, Value::Bin(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Structured, Value::Structured(_))
            | (Self::DateTime, Value::DateTime(_)) => true,
            (_, Value::Set(set)) => self.set_kind() == Some(set.kind()),
            _ => false,
        }
    }

    /// Normalizes `value` into this type.
    ///
    /// A value already of this type passes through. Otherwise conversion is
    /// attempted only when `coerce` is set.
    pub fn coerce(self, field: &str, value: Value, coerce: bool) -> MapperResult<Value> {
        if self.matches(&value) {
            return Ok(value);
        }
        let mismatch = |value: &Value| MapperError::TypeMismatch {
            field: field.to_owned(),
            expected: self.name(),
            found: format!("{} {value}", value.kind_name()),
        };
        if !coerce {
            return Err(mismatch(&value));
        }
        let converted = match (self, &value) {
            (Self::String, other) => other.to_text().map(Value::Str),
            (Self::Number, Value::Str(s)) => Number::parse(s).map(Value::Num),
            (Self::Number, Value::Bool(b)) => Some(Value::from(i32::from(*b))),
            (Self::Number, Value::DateTime(dt)) => Some(Value::Num(epoch_seconds(dt))),
            (Self::Binary, Value::Str(s)) => Some(Value::Bin(Bytes::from(s.clone().into_bytes()))),
            (Self::Boolean, Value::Str(s)) => parse_bool_text(s).map(Value::Bool),
            (Self::Boolean, Value::Num(n)) => Some(Value::Bool(!n.is_zero())),
            (Self::Structured, other) => Some(Value::Structured(other.to_json())),
            (Self::DateTime, Value::Str(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
            (Self::DateTime, Value::Num(n)) => from_epoch_seconds(n).map(Value::DateTime),
            (Self::StringSet | Self::NumberSet | Self::BinarySet, other) => {
                self.set_kind().and_then(|kind| coerce_set(kind, other))
            }
            _ => None,
        };
        converted.ok_or_else(|| mismatch(&value))
    }

    /// Store encoding of a value of this type.
    ///
    /// Empty sets have no encoding and yield `None`; the attribute is then
    /// left out of the item.
    pub fn encode(self, field: &str, value: &Value) -> MapperResult<Option<AttributeValue>> {
        let encoded = match (self, value) {
            (Self::String, Value::Str(s)) => AttributeValue::S(s.clone()),
            (Self::Number, Value::Num(n)) => AttributeValue::N(n.to_string()),
            (Self::Binary, Value::Bin(b)) => AttributeValue::B(b.clone()),
            (Self::Boolean, Value::Bool(b)) => AttributeValue::S(b.to_string()),
            (Self::Structured, Value::Structured(doc)) => AttributeValue::S(doc.to_string()),
            (Self::DateTime, Value::DateTime(dt)) => AttributeValue::N(epoch_seconds(dt).to_string()),
            (_, Value::Set(set)) if self.set_kind() == Some(set.kind()) => {
                return Ok(encode_set(set));
            }
            _ => {
                return Err(MapperError::TypeMismatch {
                    field: field.to_owned(),
                    expected: self.name(),
                    found: value.kind_name().to_owned(),
                });
            }
        };
        Ok(Some(encoded))
    }

    /// Decodes a stored attribute into a value of this type.
    pub fn decode(self, field: &str, attr: &AttributeValue) -> MapperResult<Value> {
        let decode_err = |message: String| MapperError::Decode {
            field: field.to_owned(),
            message,
        };
        let unexpected = || {
            decode_err(format!(
                "expected {} but found {}",
                self.name(),
                attr.type_descriptor()
            ))
        };
        match (self, attr) {
            (Self::String, AttributeValue::S(s)) => Ok(Value::Str(s.clone())),
            (Self::Number, AttributeValue::N(n)) => Number::parse(n)
                .map(Value::Num)
                .ok_or_else(|| decode_err(format!("invalid number {n}"))),
            (Self::Binary, AttributeValue::B(b)) => Ok(Value::Bin(b.clone())),
            (Self::Boolean, AttributeValue::S(s)) => parse_bool_text(s)
                .map(Value::Bool)
                .ok_or_else(|| decode_err(format!("invalid boolean {s}"))),
            (Self::Boolean, AttributeValue::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Structured, AttributeValue::S(s)) => serde_json::from_str(s)
                .map(Value::Structured)
                .map_err(|e| decode_err(e.to_string())),
            (Self::DateTime, AttributeValue::N(n)) => Number::parse(n)
                .as_ref()
                .and_then(from_epoch_seconds)
                .map(Value::DateTime)
                .ok_or_else(|| decode_err(format!("invalid timestamp {n}"))),
            (Self::StringSet | Self::NumberSet | Self::BinarySet, attr) if attr.is_set() => {
                decode_set(attr)
                    .filter(|set| Some(set.kind()) == self.set_kind())
                    .map(Value::Set)
                    .ok_or_else(unexpected)
            }
            _ => Err(unexpected()),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Validity predicate run on every value assigned to a field.
pub type FieldCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A declared, typed attribute of a model.
#[derive(Clone)]
pub struct Field {
    name: String,
    data_type: DataType,
    coerce: bool,
    default: Option<Value>,
    check: Option<FieldCheck>,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("coerce", &self.coerce)
            .field("default", &self.default)
            .field("check", &self.check.is_some())
            .finish()
    }
}

impl Field {
    /// Declares a field of the given type with the type's implicit default.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            coerce: false,
            default: data_type.implicit_default(),
            check: None,
        }
    }

    /// String field.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, DataType::String)
    }

    /// Number field.
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Number)
    }

    /// Binary field.
    #[must_use]
    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Binary)
    }

    /// Boolean field.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Boolean)
    }

    /// String-set field.
    #[must_use]
    pub fn string_set(name: impl Into<String>) -> Self {
        Self::new(name, DataType::StringSet)
    }

    /// Number-set field.
    #[must_use]
    pub fn number_set(name: impl Into<String>) -> Self {
        Self::new(name, DataType::NumberSet)
    }

    /// Binary-set field.
    #[must_use]
    pub fn binary_set(name: impl Into<String>) -> Self {
        Self::new(name, DataType::BinarySet)
    }

    /// Structured (JSON document) field.
    #[must_use]
    pub fn structured(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Structured)
    }

    /// Date-time field.
    #[must_use]
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, DataType::DateTime)
    }

    /// Accept foreign representations on assignment and normalize them.
    #[must_use]
    pub fn coerce(mut self) -> Self {
        self.coerce = true;
        self
    }

    /// Reject assigned values for which `check` returns false.
    ///
    /// The check sees the value after coercion. Clearing a field is never
    /// checked.
    #[must_use]
    pub fn check(mut self, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Explicit default for new entities.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Leave the field unset on new entities.
    #[must_use]
    pub fn no_default(mut self) -> Self {
        self.default = None;
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether assignment coerces foreign values.
    #[must_use]
    pub fn is_coerced(&self) -> bool {
        self.coerce
    }

    /// Default value for new entities.
    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Validates an assigned value, coercing it when the field allows.
    pub fn accept(&self, value: Value) -> MapperResult<Value> {
        let value = self.data_type.coerce(&self.name, value, self.coerce)?;
        match &self.check {
            Some(check) if !check(&value) => Err(MapperError::CheckFailed {
                field: self.name.clone(),
                value: value.to_string(),
            }),
            _ => Ok(value),
        }
    }

    /// Normalizes a predicate operand. Query values are always coerced.
    pub fn accept_operand(&self, value: Value) -> MapperResult<Value> {
        self.data_type.coerce(&self.name, value, true)
    }

    /// Store encoding of `value`.
    pub fn encode(&self, value: &Value) -> MapperResult<Option<AttributeValue>> {
        self.data_type.encode(&self.name, value)
    }

    /// Decodes a stored attribute.
    pub fn decode(&self, attr: &AttributeValue) -> MapperResult<Value> {
        self.data_type.decode(&self.name, attr)
    }
}

// ---------------------------------------------------------------------------
// Extra attributes
// ---------------------------------------------------------------------------

/// Encodes an undeclared attribute.
///
/// Numbers and sets are stored natively; everything else is stored as JSON
/// text. Empty sets yield `None`.
#[must_use]
pub fn encode_extra(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Num(n) => Some(AttributeValue::N(n.to_string())),
        Value::Set(set) => encode_set(set),
        other => Some(AttributeValue::S(other.to_json().to_string())),
    }
}

/// Decodes an undeclared attribute. Strings that are not JSON stay plain text.
pub fn decode_extra(name: &str, attr: &AttributeValue) -> MapperResult<Value> {
    match attr {
        AttributeValue::N(n) => Number::parse(n).map(Value::Num).ok_or_else(|| {
            MapperError::Decode {
                field: name.to_owned(),
                message: format!("invalid number {n}"),
            }
        }),
        AttributeValue::S(s) => Ok(serde_json::from_str(s)
            .map_or_else(|_| Value::Str(s.clone()), Value::from_json)),
        AttributeValue::B(b) => Ok(Value::Bin(b.clone())),
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        set if set.is_set() => decode_set(set).map(Value::Set).ok_or_else(|| {
            MapperError::Decode {
                field: name.to_owned(),
                message: "malformed set".to_owned(),
            }
        }),
        other => Err(MapperError::Decode {
            field: name.to_owned(),
            message: format!("unsupported attribute type {}", other.type_descriptor()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode_set(set: &ValueSet) -> Option<AttributeValue> {
    if set.is_empty() {
        return None;
    }
    let encoded = match set.kind() {
        SetKind::Str => AttributeValue::Ss(
            set.iter()
                .filter_map(|e| match e {
                    SetElement::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        ),
        SetKind::Num => AttributeValue::Ns(
            set.iter()
                .filter_map(|e| match e {
                    SetElement::Num(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        SetKind::Bin => AttributeValue::Bs(
            set.iter()
                .filter_map(|e| match e {
                    SetElement::Bin(b) => Some(b.clone()),
                    _ => None,
                })
                .collect(),
        ),
    };
    Some(encoded)
}

fn decode_set(attr: &AttributeValue) -> Option<ValueSet> {
    match attr {
        AttributeValue::Ss(v) => Some(ValueSet::strings(v.iter().cloned())),
        AttributeValue::Ns(v) => {
            let members = v
                .iter()
                .map(|n| Number::parse(n).map(SetElement::Num))
                .collect::<Option<Vec<_>>>()?;
            ValueSet::from_elements(SetKind::Num, members).ok()
        }
        AttributeValue::Bs(v) => {
            ValueSet::from_elements(SetKind::Bin, v.iter().cloned().map(SetElement::Bin)).ok()
        }
        _ => None,
    }
}

fn coerce_element(kind: SetKind, element: &SetElement) -> Option<SetElement> {
    match (kind, element) {
        (SetKind::Str, SetElement::Num(n)) => Some(SetElement::Str(n.to_string())),
        (SetKind::Num, SetElement::Str(s)) => Number::parse(s).map(SetElement::Num),
        (SetKind::Bin, SetElement::Str(s)) => {
            Some(SetElement::Bin(Bytes::from(s.clone().into_bytes())))
        }
        (kind, e) if e.kind() == kind => Some(e.clone()),
        _ => None,
    }
}

fn coerce_set(kind: SetKind, value: &Value) -> Option<Value> {
    let elements: Vec<SetElement> = match value {
        Value::Set(set) => set.iter().cloned().collect(),
        Value::Str(s) => vec![SetElement::Str(s.clone())],
        Value::Num(n) => vec![SetElement::Num(*n)],
        Value::Bin(b) => vec![SetElement::Bin(b.clone())],
        _ => return None,
    };
    let converted = elements
        .iter()
        .map(|e| coerce_element(kind, e))
        .collect::<Option<Vec<_>>>()?;
    ValueSet::from_elements(kind, converted).ok().map(Value::Set)
}

fn parse_bool_text(text: &str) -> Option<bool> {
    match text.trim() {
        t if t.eq_ignore_ascii_case("true") || t == "1" => Some(true),
        t if t.eq_ignore_ascii_case("false") || t == "0" => Some(false),
        _ => None,
    }
}

fn epoch_seconds(dt: &DateTime<Utc>) -> Number {
    Number::from_decimal(Decimal::new(dt.timestamp_micros(), 6))
}

fn from_epoch_seconds(n: &Number) -> Option<DateTime<Utc>> {
    let micros = n
        .as_decimal()
        .checked_mul(Decimal::from(1_000_000))?
        .round()
        .to_i64()?;
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_should_apply_implicit_defaults() {
        assert_eq!(Field::number("num").default(), Some(&Value::from(0)));
        assert_eq!(Field::boolean("b").default(), Some(&Value::Bool(false)));
        assert_eq!(
            Field::string_set("tags").default(),
            Some(&Value::Set(ValueSet::new(SetKind::Str)))
        );
        assert_eq!(
            Field::structured("data").default(),
            Some(&Value::Structured(serde_json::json!({})))
        );
        assert_eq!(Field::string("name").default(), None);
        assert_eq!(Field::number("n").no_default().default(), None);
    }

    #[test]
    fn test_should_reject_mismatch_without_coercion() {
        let err = Field::number("score").accept(Value::from("10")).unwrap_err();
        assert!(matches!(err, MapperError::TypeMismatch { expected: "number", .. }));
    }

    #[test]
    fn test_should_coerce_when_enabled() {
        let field = Field::number("score").coerce();
        assert_eq!(field.accept(Value::from("10")).unwrap(), Value::from(10));

        let tags = Field::string_set("tags").coerce();
        assert_eq!(
            tags.accept(Value::from("a")).unwrap(),
            Value::Set(ValueSet::strings(["a"]))
        );
    }

    #[test]
    fn test_should_run_check_after_coercion() {
        let field = Field::number("age")
            .coerce()
            .check(|v| v.as_i64().is_some_and(|n| (0..150).contains(&n)));
        assert_eq!(field.accept(Value::from("42")).unwrap(), Value::from(42));

        let err = field.accept(Value::from("-3")).unwrap_err();
        assert!(matches!(err, MapperError::CheckFailed { ref field, .. } if field == "age"));
        assert!(field.accept(Value::from(200)).is_err());
        assert!(format!("{field:?}").contains("check: true"));

        // Operands are not assignments.
        assert!(field.accept_operand(Value::from(200)).is_ok());
    }

    #[test]
    fn test_should_always_coerce_operands() {
        let field = Field::string("name");
        assert_eq!(field.accept_operand(Value::from(5)).unwrap(), Value::from("5"));
    }

    #[test]
    fn test_should_encode_booleans_and_documents_as_text() {
        let flag = Field::boolean("wobbles");
        assert_eq!(
            flag.encode(&Value::Bool(true)).unwrap(),
            Some(AttributeValue::string("true"))
        );
        let doc = Field::structured("data");
        let encoded = doc
            .encode(&Value::Structured(serde_json::json!({"a": [1, 2]})))
            .unwrap()
            .unwrap();
        assert_eq!(encoded, AttributeValue::string(r#"{"a":[1,2]}"#));
        assert_eq!(
            doc.decode(&encoded).unwrap(),
            Value::Structured(serde_json::json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn test_should_omit_empty_sets() {
        let tags = Field::string_set("tags");
        assert_eq!(tags.encode(&Value::Set(ValueSet::new(SetKind::Str))).unwrap(), None);
        let encoded = tags
            .encode(&Value::Set(ValueSet::strings(["b", "a"])))
            .unwrap()
            .unwrap();
        assert_eq!(encoded, AttributeValue::Ss(vec!["a".to_owned(), "b".to_owned()]));
    }

    #[test]
    fn test_should_store_datetime_as_epoch_seconds() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let field = Field::datetime("created");
        let encoded = field.encode(&Value::DateTime(dt)).unwrap().unwrap();
        assert_eq!(encoded, AttributeValue::N("1704164645".to_owned()));
        assert_eq!(field.decode(&encoded).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_should_round_trip_numbers_exactly() {
        let field = Field::number("n");
        let stored = AttributeValue::N("9007199254740993".to_owned());
        let value = field.decode(&stored).unwrap();
        assert_eq!(field.encode(&value).unwrap(), Some(stored));

        let created = Field::datetime("created");
        let dt = Utc.timestamp_opt(1_704_164_645, 123_456_000).unwrap();
        let encoded = created.encode(&Value::DateTime(dt)).unwrap().unwrap();
        assert_eq!(encoded, AttributeValue::N("1704164645.123456".to_owned()));
        assert_eq!(created.decode(&encoded).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_should_report_decode_errors() {
        let err = Field::number("score")
            .decode(&AttributeValue::string("x"))
            .unwrap_err();
        assert!(matches!(err, MapperError::Decode { .. }));
    }

    #[test]
    fn test_should_encode_extras_by_kind() {
        assert_eq!(
            encode_extra(&Value::from(3)),
            Some(AttributeValue::N("3".to_owned()))
        );
        assert_eq!(
            encode_extra(&Value::from("hi")),
            Some(AttributeValue::string("\"hi\""))
        );
        assert_eq!(
            encode_extra(&Value::Set(ValueSet::strings(["x"]))),
            Some(AttributeValue::Ss(vec!["x".to_owned()]))
        );
        let doc = Value::Structured(serde_json::json!({"k": "v"}));
        let encoded = encode_extra(&doc).unwrap();
        assert_eq!(decode_extra("misc", &encoded).unwrap(), doc);
    }

    #[test]
    fn test_should_decode_plain_text_extras() {
        let value = decode_extra("note", &AttributeValue::string("not json")).unwrap();
        assert_eq!(value, Value::from("not json"));
    }

    #[test]
    fn test_should_restrict_operators_by_type() {
        assert!(DataType::String.allows(Operator::BeginsWith));
        assert!(!DataType::Number.allows(Operator::BeginsWith));
        assert!(!DataType::StringSet.allows(Operator::Lt));
        assert!(DataType::StringSet.allows(Operator::Eq));
        assert!(!DataType::String.allows(Operator::Ne));
    }
}
