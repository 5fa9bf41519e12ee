//! Rendering of structured conditions as store expressions.
//!
//! Backends that speak the store's expression syntax use these helpers to
//! turn a [`KeyCondition`] or a list of [`Condition`]s into an expression
//! string plus name and value placeholder maps (`#n0`, `:v0`, ...).

use std::collections::BTreeMap;

use dynamap_model::AttributeValue;

use super::{Condition, ConditionOp, KeyCondition};

/// Expression text with its placeholder bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedExpression {
    /// Expression text; empty when there were no conditions.
    pub expression: String,
    /// `#name` placeholder to attribute name.
    pub names: BTreeMap<String, String>,
    /// `:value` placeholder to attribute value.
    pub values: BTreeMap<String, AttributeValue>,
}

#[derive(Default)]
struct Writer {
    out: RenderedExpression,
    attrs: BTreeMap<String, String>,
}

impl Writer {
    fn name(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.attrs.get(attribute) {
            return existing.clone();
        }
        let placeholder = format!("#n{}", self.out.names.len());
        self.out
            .names
            .insert(placeholder.clone(), attribute.to_owned());
        self.attrs.insert(attribute.to_owned(), placeholder.clone());
        placeholder
    }

    fn value(&mut self, value: &AttributeValue) -> String {
        let placeholder = format!(":v{}", self.out.values.len());
        self.out.values.insert(placeholder.clone(), value.clone());
        placeholder
    }

    fn fragment(&mut self, condition: &Condition) -> String {
        let name = self.name(&condition.attribute);
        match &condition.op {
            ConditionOp::Eq(v) => format!("{name} = {}", self.value(v)),
            ConditionOp::Lt(v) => format!("{name} < {}", self.value(v)),
            ConditionOp::Le(v) => format!("{name} <= {}", self.value(v)),
            ConditionOp::Gt(v) => format!("{name} > {}", self.value(v)),
            ConditionOp::Ge(v) => format!("{name} >= {}", self.value(v)),
            ConditionOp::Between(lo, hi) => {
                let lo = self.value(lo);
                let hi = self.value(hi);
                format!("{name} BETWEEN {lo} AND {hi}")
            }
            ConditionOp::BeginsWith(v) => format!("begins_with({name}, {})", self.value(v)),
            ConditionOp::Exists => format!("attribute_exists({name})"),
            ConditionOp::NotExists => format!("attribute_not_exists({name})"),
        }
    }
}

/// Renders conditions joined with AND, in the given order.
#[must_use]
pub fn render_conditions(conditions: &[Condition]) -> RenderedExpression {
    let mut writer = Writer::default();
    let parts: Vec<String> = conditions.iter().map(|c| writer.fragment(c)).collect();
    writer.out.expression = parts.join(" AND ");
    writer.out
}

/// Renders a key condition: hash equality first, then the range condition.
#[must_use]
pub fn render_key_condition(key: &KeyCondition) -> RenderedExpression {
    let hash = Condition::new(
        key.hash_attribute.clone(),
        ConditionOp::Eq(key.hash_value.clone()),
    );
    let mut conditions = vec![hash];
    conditions.extend(key.range.iter().cloned());
    render_conditions(&conditions)
}
