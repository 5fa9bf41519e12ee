//! Condition evaluation and update application for the in-memory backend.
//!
//! Comparison rules follow the store: values of different types never
//! compare, numbers compare numerically, strings and binary compare
//! byte-wise.

use std::cmp::Ordering;

use dynamap_model::{AttributeValue, Item};

use crate::backend::{AttributeUpdate, BackendError, Condition, ConditionOp};
use crate::value::Number;

/// Evaluates every condition against `item`, joined with AND.
pub(crate) fn matches_all(item: &Item, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| matches(item, c))
}

/// Evaluates one condition against `item`.
pub(crate) fn matches(item: &Item, condition: &Condition) -> bool {
    let actual = item.get(&condition.attribute);
    match (&condition.op, actual) {
        (ConditionOp::Exists, found) => found.is_some(),
        (ConditionOp::NotExists, found) => found.is_none(),
        (_, None) => false,
        (ConditionOp::Eq(expected), Some(actual)) => values_equal(actual, expected),
        (ConditionOp::Lt(bound), Some(actual)) => compare(actual, bound) == Some(Ordering::Less),
        (ConditionOp::Le(bound), Some(actual)) => matches!(
            compare(actual, bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        (ConditionOp::Gt(bound), Some(actual)) => {
            compare(actual, bound) == Some(Ordering::Greater)
        }
        (ConditionOp::Ge(bound), Some(actual)) => matches!(
            compare(actual, bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        (ConditionOp::Between(lo, hi), Some(actual)) => {
            matches!(
                compare(actual, lo),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(compare(actual, hi), Some(Ordering::Less | Ordering::Equal))
        }
        (ConditionOp::BeginsWith(prefix), Some(actual)) => match (actual, prefix) {
            (AttributeValue::S(s), AttributeValue::S(p)) => s.starts_with(p.as_str()),
            (AttributeValue::B(b), AttributeValue::B(p)) => b.starts_with(p),
            _ => false,
        },
    }
}

/// Ordering of two scalar values of the same type, `None` otherwise.
pub(crate) fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (AttributeValue::N(a), AttributeValue::N(b)) => compare_numbers(a, b),
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => None,
    }
}

fn values_equal(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    match (actual, expected) {
        (AttributeValue::Ss(a), AttributeValue::Ss(b)) | (AttributeValue::Ns(a), AttributeValue::Ns(b)) => {
            sorted(a) == sorted(b)
        }
        (AttributeValue::Bs(a), AttributeValue::Bs(b)) => sorted(a) == sorted(b),
        _ => compare(actual, expected).map_or_else(|| actual == expected, Ordering::is_eq),
    }
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut items = items.to_vec();
    items.sort();
    items
}

/// Exact numeric ordering of two `N` texts, `None` if either is malformed.
pub(crate) fn compare_numbers(left: &str, right: &str) -> Option<Ordering> {
    Some(Number::parse(left)?.cmp(&Number::parse(right)?))
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Applies update actions to `item` in order.
pub(crate) fn apply_updates(item: &mut Item, updates: &[AttributeUpdate]) -> Result<(), BackendError> {
    for update in updates {
        match update {
            AttributeUpdate::Put { attribute, value } => {
                item.insert(attribute.clone(), value.clone());
            }
            AttributeUpdate::Remove { attribute } => {
                item.remove(attribute);
            }
            AttributeUpdate::Add { attribute, value } => apply_add(item, attribute, value)?,
            AttributeUpdate::Delete { attribute, value } => apply_delete(item, attribute, value)?,
        }
    }
    Ok(())
}

fn apply_add(item: &mut Item, attribute: &str, value: &AttributeValue) -> Result<(), BackendError> {
    let merged = match (item.get(attribute), value) {
        (None, AttributeValue::N(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)) => {
            value.clone()
        }
        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
            let sum = Number::parse(a)
                .zip(Number::parse(b))
                .and_then(|(a, b)| a.checked_add(&b))
                .ok_or_else(|| BackendError::Validation(format!("cannot add {b} to {a}")))?;
            AttributeValue::N(sum.to_string())
        }
        (Some(AttributeValue::Ss(existing)), AttributeValue::Ss(added)) => {
            AttributeValue::Ss(union(existing, added))
        }
        (Some(AttributeValue::Ns(existing)), AttributeValue::Ns(added)) => {
            AttributeValue::Ns(union(existing, added))
        }
        (Some(AttributeValue::Bs(existing)), AttributeValue::Bs(added)) => {
            AttributeValue::Bs(union(existing, added))
        }
        (existing, _) => {
            return Err(BackendError::Validation(format!(
                "ADD on {attribute}: incompatible operand {} for existing {}",
                value.type_descriptor(),
                existing.map_or("nothing", AttributeValue::type_descriptor)
            )));
        }
    };
    item.insert(attribute.to_owned(), merged);
    Ok(())
}

fn apply_delete(
    item: &mut Item,
    attribute: &str,
    value: &AttributeValue,
) -> Result<(), BackendError> {
    let Some(existing) = item.get(attribute) else {
        return Ok(());
    };
    let remaining = match (existing, value) {
        (AttributeValue::Ss(existing), AttributeValue::Ss(removed)) => {
            AttributeValue::Ss(difference(existing, removed))
        }
        (AttributeValue::Ns(existing), AttributeValue::Ns(removed)) => {
            AttributeValue::Ns(difference(existing, removed))
        }
        (AttributeValue::Bs(existing), AttributeValue::Bs(removed)) => {
            AttributeValue::Bs(difference(existing, removed))
        }
        (existing, _) => {
            return Err(BackendError::Validation(format!(
                "DELETE on {attribute}: operand {} does not match existing {}",
                value.type_descriptor(),
                existing.type_descriptor()
            )));
        }
    };
    if remaining.set_len() == Some(0) {
        item.remove(attribute);
    } else {
        item.insert(attribute.to_owned(), remaining);
    }
    Ok(())
}

fn union<T: PartialEq + Clone>(existing: &[T], added: &[T]) -> Vec<T> {
    let mut merged = existing.to_vec();
    for member in added {
        if !merged.contains(member) {
            merged.push(member.clone());
        }
    }
    merged
}

fn difference<T: PartialEq + Clone>(existing: &[T], removed: &[T]) -> Vec<T> {
    existing
        .iter()
        .filter(|member| !removed.contains(member))
        .cloned()
        .collect()
}
