//! Change tracking for partial updates.
//!
//! Scalar and structured fields are compared against their snapshot and
//! written back whole. Set fields are wrapped in a [`TrackedSet`] that keeps
//! a change log of element additions and removals relative to the last
//! synced value, so a sync can send only the net difference.

use std::collections::BTreeSet;

use crate::value::{SetElement, Value, ValueSet};

/// Net change of one attribute since the last sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Nothing to write.
    Unchanged,
    /// Overwrite with the new value, or remove the attribute on `None`.
    Replace(Option<Value>),
    /// Add and remove individual set members.
    Incremental {
        /// Members to add, if any.
        add: Option<ValueSet>,
        /// Members to remove, if any.
        remove: Option<ValueSet>,
    },
}

impl Delta {
    /// Returns `true` for [`Delta::Unchanged`].
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Whole-value delta between a snapshot and the current value.
#[must_use]
pub fn replace_delta(snapshot: Option<&Value>, current: Option<&Value>) -> Delta {
    if snapshot == current {
        Delta::Unchanged
    } else {
        Delta::Replace(current.cloned())
    }
}

/// A set value together with its change log.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSet {
    base: ValueSet,
    current: ValueSet,
    added: BTreeSet<SetElement>,
    removed: BTreeSet<SetElement>,
    replaced: bool,
}

impl TrackedSet {
    /// Starts tracking from a synced value.
    #[must_use]
    pub fn new(synced: ValueSet) -> Self {
        Self {
            current: synced.clone(),
            base: synced,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            replaced: false,
        }
    }

    /// Current members.
    #[must_use]
    pub fn value(&self) -> &ValueSet {
        &self.current
    }

    /// Adds a member. An earlier removal of the same member is cancelled.
    pub fn insert(&mut self, element: SetElement) -> Result<bool, SetElement> {
        if !self.current.insert(element.clone())? {
            return Ok(false);
        }
        if !self.replaced && !self.removed.remove(&element) && !self.base.contains(&element) {
            self.added.insert(element);
        }
        Ok(true)
    }

    /// Removes a member. An earlier addition of the same member is cancelled.
    pub fn remove(&mut self, element: &SetElement) -> bool {
        if !self.current.remove(element) {
            return false;
        }
        if !self.replaced && !self.added.remove(element) && self.base.contains(element) {
            self.removed.insert(element.clone());
        }
        true
    }

    /// Replaces the whole value, superseding any logged additions or removals.
    pub fn replace(&mut self, value: ValueSet) {
        self.current = value;
        self.replaced = true;
        self.added.clear();
        self.removed.clear();
    }

    /// Net change since the last commit.
    #[must_use]
    pub fn delta(&self) -> Delta {
        if self.replaced {
            if self.current == self.base {
                return Delta::Unchanged;
            }
            let value = (!self.current.is_empty()).then(|| Value::Set(self.current.clone()));
            return Delta::Replace(value);
        }
        if self.added.is_empty() && self.removed.is_empty() {
            return Delta::Unchanged;
        }
        let kind = self.current.kind();
        let as_set =
            |items: &BTreeSet<SetElement>| (!items.is_empty()).then(|| ValueSet::from_parts(kind, items.clone()));
        Delta::Incremental {
            add: as_set(&self.added),
            remove: as_set(&self.removed),
        }
    }

    /// Accepts the current value as synced and clears the log.
    pub fn commit(&mut self) {
        self.base = self.current.clone();
        self.added.clear();
        self.removed.clear();
        self.replaced = false;
    }
}
