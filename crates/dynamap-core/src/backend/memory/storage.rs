//! Partitioned item storage for one in-memory table.
//!
//! ```text
//! DashMap<hash key value, BTreeMap<SortableAttributeValue, Item>>
//! ```
//!
//! Items within a partition are ordered by range key. Tables without a range
//! key store each partition's single item under a sentinel.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use dashmap::DashMap;
use dynamap_model::{AttributeValue, Item, KeySchema, SecondaryIndex, TableDefinition};

use super::evaluator::{compare_numbers, matches, matches_all};
use crate::backend::{BackendError, Condition, KeyCondition, Page};

// ---------------------------------------------------------------------------
// SortableAttributeValue
// ---------------------------------------------------------------------------

/// A key-eligible attribute value with the store's ordering.
///
/// Strings order by UTF-8 bytes, numbers numerically, binary byte-wise.
#[derive(Debug, Clone)]
pub(crate) enum SortableAttributeValue {
    S(String),
    N(String),
    B(bytes::Bytes),
    /// Range slot of tables without a range key.
    Sentinel,
}

impl SortableAttributeValue {
    fn from_attribute_value(attr_name: &str, value: &AttributeValue) -> Result<Self, BackendError> {
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => Ok(Self::N(n.clone())),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            other => Err(BackendError::Validation(format!(
                "key attribute {attr_name} must be S, N or B, got {}",
                other.type_descriptor()
            ))),
        }
    }
}

impl PartialEq for SortableAttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortableAttributeValue {}

impl PartialOrd for SortableAttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableAttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::S(a), Self::S(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::N(a), Self::N(b)) => compare_numbers(a, b).unwrap_or_else(|| a.cmp(b)),
            (Self::B(a), Self::B(b)) => a.as_ref().cmp(b.as_ref()),
            (Self::Sentinel, Self::Sentinel) => Ordering::Equal,
            (Self::S(_), _) => Ordering::Less,
            (_, Self::S(_)) => Ordering::Greater,
            (Self::N(_), _) => Ordering::Less,
            (_, Self::N(_)) => Ordering::Greater,
            (Self::B(_), _) => Ordering::Less,
            (_, Self::B(_)) => Ordering::Greater,
        }
    }
}

/// Position of an item in a result sequence: the sort values of the path
/// followed by the table key as tie-breaker.
type Position = Vec<SortableAttributeValue>;

// ---------------------------------------------------------------------------
// TableStorage
// ---------------------------------------------------------------------------

/// Storage and key metadata of one table.
#[derive(Debug)]
pub(crate) struct TableStorage {
    definition: TableDefinition,
    data: DashMap<AttributeValue, BTreeMap<SortableAttributeValue, Item>>,
}

impl TableStorage {
    pub(crate) fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            data: DashMap::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }

    fn key_schema(&self) -> &KeySchema {
        &self.definition.key_schema
    }

    pub(crate) fn index(&self, name: &str) -> Result<&SecondaryIndex, BackendError> {
        self.definition
            .index(name)
            .ok_or_else(|| BackendError::IndexNotFound {
                table: self.definition.name.clone(),
                index: name.to_owned(),
            })
    }

    /// Number of stored items.
    pub(crate) fn item_count(&self) -> usize {
        self.data.iter().map(|partition| partition.len()).sum()
    }

    /// Splits a key or item into partition value and range slot, checking
    /// the declared key types.
    fn locate(&self, item: &Item) -> Result<(AttributeValue, SortableAttributeValue), BackendError> {
        let schema = self.key_schema();
        let hash = key_value(item, &schema.hash_key.name, schema.hash_key.attr_type)?;
        let range = match &schema.range_key {
            Some(range) => SortableAttributeValue::from_attribute_value(
                &range.name,
                key_value(item, &range.name, range.attr_type)?,
            )?,
            None => SortableAttributeValue::Sentinel,
        };
        Ok((hash.clone(), range))
    }

    pub(crate) fn get(&self, key: &Item) -> Result<Option<Item>, BackendError> {
        let (hash, range) = self.locate(key)?;
        Ok(self
            .data
            .get(&hash)
            .and_then(|partition| partition.get(&range).cloned()))
    }

    /// Writes `item` if `conditions` hold for the current item.
    pub(crate) fn put(&self, item: Item, conditions: &[Condition]) -> Result<(), BackendError> {
        let (hash, range) = self.locate(&item)?;
        let mut partition = self.data.entry(hash).or_default();
        check(partition.get(&range), conditions)?;
        partition.insert(range, item);
        Ok(())
    }

    pub(crate) fn delete(&self, key: &Item, conditions: &[Condition]) -> Result<(), BackendError> {
        let (hash, range) = self.locate(key)?;
        let Some(mut partition) = self.data.get_mut(&hash) else {
            return check(None, conditions);
        };
        check(partition.get(&range), conditions)?;
        partition.remove(&range);
        Ok(())
    }

    /// Applies `mutate` to the current item (or to the bare key when none
    /// exists) under the partition lock and stores the result.
    pub(crate) fn update(
        &self,
        key: &Item,
        conditions: &[Condition],
        mutate: impl FnOnce(&mut Item) -> Result<(), BackendError>,
    ) -> Result<Item, BackendError> {
        let (hash, range) = self.locate(key)?;
        let key_names: Vec<&str> = self.key_schema().attribute_names().collect();
        let mut partition = self.data.entry(hash).or_default();
        let current = partition.get(&range);
        check(current, conditions)?;

        let mut updated = current.cloned().unwrap_or_else(|| key.clone());
        mutate(&mut updated)?;
        if let Some(name) = key_names.iter().find(|name| updated.get(**name) != key.get(**name)) {
            return Err(BackendError::Validation(format!(
                "cannot update key attribute {name}"
            )));
        }
        partition.insert(range, updated.clone());
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Queries the table's own key.
    pub(crate) fn query_table(
        &self,
        key: &KeyCondition,
        filter: &[Condition],
        scan_forward: bool,
        limit: Option<usize>,
        exclusive_start_key: Option<&Item>,
    ) -> Result<Page, BackendError> {
        let schema = self.key_schema();
        if key.hash_attribute != schema.hash_key.name {
            return Err(BackendError::Validation(format!(
                "key condition targets {} but the table hash key is {}",
                key.hash_attribute, schema.hash_key.name
            )));
        }
        let Some(partition) = self.data.get(&key.hash_value) else {
            return Ok(Page::default());
        };

        let start = exclusive_start_key
            .map(|esk| self.locate(esk).map(|(_, range)| range))
            .transpose()?;
        let lower = match (&start, scan_forward) {
            (Some(start), true) => Bound::Excluded(start.clone()),
            _ => Bound::Unbounded,
        };
        let upper = match (&start, scan_forward) {
            (Some(start), false) => Bound::Excluded(start.clone()),
            _ => Bound::Unbounded,
        };
        let ordered: Box<dyn Iterator<Item = &Item> + '_> = if scan_forward {
            Box::new(partition.range((lower, upper)).map(|(_, item)| item))
        } else {
            Box::new(partition.range((lower, upper)).rev().map(|(_, item)| item))
        };

        Ok(self.collect_page(ordered, key.range.as_ref(), filter, limit, None))
    }

    /// Queries a secondary index. Items lacking the index's key attributes
    /// are not part of the index.
    pub(crate) fn query_index(
        &self,
        index: &SecondaryIndex,
        key: &KeyCondition,
        filter: &[Condition],
        scan_forward: bool,
        limit: Option<usize>,
        exclusive_start_key: Option<&Item>,
    ) -> Result<Page, BackendError> {
        if key.hash_attribute != index.key_schema.hash_key.name {
            return Err(BackendError::Validation(format!(
                "key condition targets {} but index {} is keyed on {}",
                key.hash_attribute, index.name, index.key_schema.hash_key.name
            )));
        }
        let sort_attrs = self.sort_attributes(index.key_schema.range_key.as_ref().map(|k| k.name.as_str()));

        let mut candidates: Vec<(Position, Item)> = Vec::new();
        for partition in &self.data {
            for item in partition.values() {
                let in_index = index
                    .key_schema
                    .attribute_names()
                    .all(|name| item.contains_key(name));
                if in_index && item.get(&key.hash_attribute) == Some(&key.hash_value) {
                    candidates.push((position(item, &sort_attrs), item.clone()));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        if !scan_forward {
            candidates.reverse();
        }

        let start = exclusive_start_key.map(|esk| position(esk, &sort_attrs));
        let resumed = candidates
            .iter()
            .filter(|(pos, _)| match &start {
                Some(start) if scan_forward => pos > start,
                Some(start) => pos < start,
                None => true,
            })
            .map(|(_, item)| item);

        let index_keys: Vec<&str> = index.key_schema.attribute_names().collect();
        Ok(self.collect_page(resumed, key.range.as_ref(), filter, limit, Some(&index_keys)))
    }

    /// Scans the whole table in (hash, range) order.
    pub(crate) fn scan(
        &self,
        filter: &[Condition],
        limit: Option<usize>,
        exclusive_start_key: Option<&Item>,
    ) -> Page {
        let sort_attrs = self.sort_attributes(None);
        let mut all_items: Vec<(Position, Item)> = self
            .data
            .iter()
            .flat_map(|partition| {
                partition
                    .values()
                    .map(|item| (position(item, &sort_attrs), item.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all_items.sort_by(|a, b| a.0.cmp(&b.0));

        let start = exclusive_start_key.map(|esk| position(esk, &sort_attrs));
        let resumed = all_items
            .iter()
            .filter(|(pos, _)| start.as_ref().is_none_or(|start| pos > start))
            .map(|(_, item)| item);
        self.collect_page(resumed, None, filter, limit, None)
    }

    /// Attribute order defining a path's sequence: the path's range key (if
    /// any), then the table key.
    fn sort_attributes(&self, range: Option<&str>) -> Vec<String> {
        let mut attrs: Vec<String> = range.map(str::to_owned).into_iter().collect();
        for name in self.key_schema().attribute_names() {
            if !attrs.iter().any(|a| a == name) {
                attrs.push(name.to_owned());
            }
        }
        attrs
    }

    /// Takes matching items up to `limit`. The page carries a resume key when
    /// it is full and more items follow.
    fn collect_page<'a>(
        &self,
        ordered: impl Iterator<Item = &'a Item>,
        range: Option<&Condition>,
        filter: &[Condition],
        limit: Option<usize>,
        index_keys: Option<&[&str]>,
    ) -> Page {
        let limit = limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut ordered = ordered.peekable();
        while items.len() < limit {
            let Some(item) = ordered.next() else {
                break;
            };
            if range.is_none_or(|r| matches(item, r)) && matches_all(item, filter) {
                items.push(item.clone());
            }
        }

        let last_evaluated_key = if items.len() == limit && ordered.peek().is_some() {
            items.last().map(|item| self.resume_key(item, index_keys))
        } else {
            None
        };
        Page {
            items,
            last_evaluated_key,
        }
    }

    fn resume_key(&self, item: &Item, index_keys: Option<&[&str]>) -> Item {
        self.key_schema()
            .attribute_names()
            .chain(index_keys.unwrap_or_default().iter().copied())
            .filter_map(|name| item.get(name).map(|v| (name.to_owned(), v.clone())))
            .collect()
    }
}

fn key_value<'a>(
    item: &'a Item,
    name: &str,
    attr_type: dynamap_model::ScalarAttributeType,
) -> Result<&'a AttributeValue, BackendError> {
    let value = item
        .get(name)
        .ok_or_else(|| BackendError::Validation(format!("missing key attribute {name}")))?;
    if !attr_type.matches(value) {
        return Err(BackendError::Validation(format!(
            "key attribute {name} must be {attr_type}, got {}",
            value.type_descriptor()
        )));
    }
    Ok(value)
}

fn position(item: &Item, attrs: &[String]) -> Position {
    attrs
        .iter()
        .map(|name| {
            item.get(name)
                .and_then(|v| SortableAttributeValue::from_attribute_value(name, v).ok())
                .unwrap_or(SortableAttributeValue::Sentinel)
        })
        .collect()
}

fn check(current: Option<&Item>, conditions: &[Condition]) -> Result<(), BackendError> {
    let empty = Item::new();
    if matches_all(current.unwrap_or(&empty), conditions) {
        Ok(())
    } else {
        Err(BackendError::ConditionFailed)
    }
}
