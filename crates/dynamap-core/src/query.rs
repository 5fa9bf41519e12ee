//! Fluent query and scan builder.
//!
//! A [`Query`] accumulates predicates and options without touching the
//! store. Every terminal operation plans afresh from the current predicate
//! set, so planning errors surface before any backend call, and pages
//! through the backend lazily.

use std::collections::VecDeque;
use std::sync::Arc;

use dynamap_model::Item;
use tracing::debug;

use crate::backend::{Condition, QueryRequest, ScanRequest};
use crate::condition::Predicate;
use crate::engine::Engine;
use crate::entity::Entity;
use crate::error::{MapperError, MapperResult, OperationContext};
use crate::planner::{self, Plan, PlanMode};
use crate::schema::ModelSchema;

/// Query or scan under construction.
#[derive(Debug, Clone)]
pub struct Query<'e> {
    engine: &'e Engine,
    schema: Arc<ModelSchema>,
    mode: PlanMode,
    predicates: Vec<Predicate>,
    index: Option<String>,
    limit: Option<usize>,
    descending: bool,
    consistent: bool,
}

impl<'e> Query<'e> {
    pub(crate) fn new(engine: &'e Engine, schema: Arc<ModelSchema>, mode: PlanMode) -> Self {
        Self {
            engine,
            schema,
            mode,
            predicates: Vec::new(),
            index: None,
            limit: None,
            descending: false,
            consistent: false,
        }
    }

    /// Adds a predicate, joined with AND.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds several predicates.
    #[must_use]
    pub fn filter_all(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Reads through the named index instead of letting the planner choose.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    /// Caps the number of returned entities.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns query results in descending range key order.
    ///
    /// Scans have no order; planning a scan with this set fails.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Asks the backend for a strongly consistent read. Queries only.
    #[must_use]
    pub fn consistent(mut self) -> Self {
        self.consistent = true;
        self
    }

    /// Accumulated predicates.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Plans the current predicate set without reading anything.
    pub fn explain(&self) -> MapperResult<Plan> {
        if self.mode == PlanMode::Scan {
            let option = if self.descending {
                Some("descending order")
            } else if self.consistent {
                Some("consistent read")
            } else {
                None
            };
            if let Some(option) = option {
                return Err(MapperError::UnsupportedScanOption {
                    model: self.schema.name().to_owned(),
                    option,
                });
            }
        }
        planner::plan(
            &self.schema,
            &self.predicates,
            self.index.as_deref(),
            self.mode,
        )
    }

    /// Lazily iterates the matching entities.
    ///
    /// Each call plans and starts over; pages are fetched as the iterator
    /// advances.
    pub fn iter(&self) -> MapperResult<Results<'e>> {
        Ok(Results {
            items: self.items(None)?,
        })
    }

    /// Lazily iterates raw items holding only the named attributes.
    ///
    /// The backend projects the items, so nothing is decoded into entities.
    pub fn attributes<S: Into<String>>(
        &self,
        names: impl IntoIterator<Item = S>,
    ) -> MapperResult<Projection<'e>> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Ok(Projection {
            items: self.items(Some(names))?,
        })
    }

    /// Every matching entity.
    pub fn all(&self) -> MapperResult<Vec<Entity>> {
        self.iter()?.collect()
    }

    /// The first matching entity, if any.
    pub fn first(&self) -> MapperResult<Option<Entity>> {
        self.clone().limit(1).iter()?.next().transpose()
    }

    /// The only matching entity.
    ///
    /// Fails with `NoResult` when nothing matches and with
    /// `MultipleResults` when more than one entity does.
    pub fn one(&self) -> MapperResult<Entity> {
        let mut results = self.clone().limit(2).iter()?;
        let model = || self.schema.name().to_owned();
        let Some(found) = results.next().transpose()? else {
            return Err(MapperError::NoResult { model: model() });
        };
        if results.next().transpose()?.is_some() {
            return Err(MapperError::MultipleResults { model: model() });
        }
        Ok(found)
    }

    /// Number of matching items.
    pub fn count(&self) -> MapperResult<usize> {
        self.items(None)?.try_fold(0, |n, item| item.map(|_| n + 1))
    }

    /// Deletes every matching item and returns how many were deleted.
    ///
    /// Keys are read first; each delete is then conditional on the item
    /// still existing, and items removed in between are not counted.
    pub fn delete(&self) -> MapperResult<usize> {
        let key_schema = self.schema.key_schema();
        let keys: Vec<Item> = self
            .items(None)?
            .filter_map(|item| item.map(|item| key_schema.extract_key(&item)).transpose())
            .collect::<MapperResult<_>>()?;

        let table = self.engine.table_name(&self.schema);
        let condition = [Condition::exists(&key_schema.hash_key.name)];
        let mut deleted = 0;
        for key in &keys {
            let Err(err) = self.engine.backend().delete(&table, key, &condition) else {
                deleted += 1;
                continue;
            };
            match self.engine.context("delete", &table, key, &self.schema).wrap(err) {
                MapperError::ConditionFailed { context } => {
                    debug!(%context, "item vanished before delete");
                }
                err => return Err(err),
            }
        }
        debug!(
            model = self.schema.name(),
            table = %table,
            matched = keys.len(),
            deleted,
            "deleted matching items"
        );
        Ok(deleted)
    }

    fn items(&self, projection: Option<Vec<String>>) -> MapperResult<Items<'e>> {
        let plan = self.explain()?;
        let table = self.engine.table_name(&self.schema);
        debug!(model = self.schema.name(), table = %table, plan = %plan, "executing");
        Ok(Items {
            engine: self.engine,
            schema: Arc::clone(&self.schema),
            plan,
            table,
            scan_forward: !self.descending,
            consistent: self.consistent,
            projection,
            page_size: self.engine.config().page_size.max(1),
            remaining: self.limit,
            buffer: VecDeque::new(),
            start_key: None,
            exhausted: false,
        })
    }
}

/// Lazy sequence of raw items, fetched page by page.
#[derive(Debug)]
struct Items<'e> {
    engine: &'e Engine,
    schema: Arc<ModelSchema>,
    plan: Plan,
    table: String,
    scan_forward: bool,
    consistent: bool,
    projection: Option<Vec<String>>,
    page_size: usize,
    remaining: Option<usize>,
    buffer: VecDeque<Item>,
    start_key: Option<Item>,
    exhausted: bool,
}

impl Items<'_> {
    fn fetch(&mut self) -> MapperResult<()> {
        let limit = Some(self.remaining.map_or(self.page_size, |r| r.min(self.page_size)));
        let filter = self.plan.filter().to_vec();
        let exclusive_start_key = self.start_key.take();
        let page = match (self.plan.mode(), self.plan.key_condition()) {
            (PlanMode::Query, Some(key_condition)) => {
                let index = self.plan.index_name().map(str::to_owned);
                let request = QueryRequest {
                    table: self.table.clone(),
                    index: index.clone(),
                    key_condition: key_condition.clone(),
                    filter,
                    limit,
                    exclusive_start_key,
                    scan_forward: self.scan_forward,
                    consistent_read: self.consistent,
                    projection: self.projection.clone(),
                };
                self.engine.backend().query(&request).map_err(|e| {
                    OperationContext::new("query", &self.table)
                        .with_index(index.as_deref())
                        .wrap(e)
                })?
            }
            _ => {
                let request = ScanRequest {
                    table: self.table.clone(),
                    filter,
                    limit,
                    exclusive_start_key,
                    projection: self.projection.clone(),
                };
                self.engine
                    .backend()
                    .scan(&request)
                    .map_err(|e| OperationContext::new("scan", &self.table).wrap(e))?
            }
        };
        debug!(
            model = self.schema.name(),
            access = %self.plan.access(),
            items = page.items.len(),
            "fetched page"
        );
        self.buffer.extend(page.items);
        self.exhausted = page.last_evaluated_key.is_none();
        self.start_key = page.last_evaluated_key;
        Ok(())
    }
}

impl Iterator for Items<'_> {
    type Item = MapperResult<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            if let Some(item) = self.buffer.pop_front() {
                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

/// Lazy sequence of entities produced by [`Query::iter`].
#[derive(Debug)]
pub struct Results<'e> {
    items: Items<'e>,
}

impl Iterator for Results<'_> {
    type Item = MapperResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.next()?;
        Some(item.and_then(|item| Entity::from_item(Arc::clone(&self.items.schema), &item)))
    }
}

/// Lazy sequence of projected items produced by [`Query::attributes`].
#[derive(Debug)]
pub struct Projection<'e> {
    items: Items<'e>,
}

impl Iterator for Projection<'_> {
    type Item = MapperResult<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}
