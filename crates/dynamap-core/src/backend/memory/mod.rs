//! In-memory storage backend.
//!
//! Tables are created from the [`TableDefinition`]s a model produces and
//! live in a [`DashMap`]. Every call is recorded in a journal so callers can
//! assert which backend operations a mapper call issued.

mod evaluator;
mod storage;

use std::sync::Arc;

use dashmap::DashMap;
use dynamap_model::{Item, TableDefinition};
use parking_lot::Mutex;
use tracing::debug;

use self::storage::TableStorage;
use super::{
    AttributeUpdate, BackendError, Condition, Page, QueryRequest, ScanRequest, StorageBackend,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `put` on a table.
    Put {
        /// Table name.
        table: String,
    },
    /// `get` on a table.
    Get {
        /// Table name.
        table: String,
    },
    /// `delete` on a table.
    Delete {
        /// Table name.
        table: String,
    },
    /// `query` on a table or index.
    Query {
        /// Table name.
        table: String,
        /// Index name, `None` for the table.
        index: Option<String>,
        /// Whether a consistent read was requested.
        consistent: bool,
    },
    /// `scan` on a table.
    Scan {
        /// Table name.
        table: String,
    },
    /// `update` on a table.
    Update {
        /// Table name.
        table: String,
    },
    /// `batch_get` on a table.
    BatchGet {
        /// Table name.
        table: String,
        /// Number of keys requested.
        keys: usize,
    },
}

/// A [`StorageBackend`] holding every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: DashMap<String, Arc<TableStorage>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MemoryBackend {
    /// Creates a backend with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions a table. Re-creating an existing table is a no-op.
    pub fn create_table(&self, definition: TableDefinition) {
        let name = definition.name.clone();
        self.tables.entry(name.clone()).or_insert_with(|| {
            debug!(table = %name, indexes = definition.indexes.len(), "created table");
            Arc::new(TableStorage::new(definition))
        });
    }

    /// Drops a table and its items.
    pub fn delete_table(&self, table: &str) -> Result<(), BackendError> {
        self.tables
            .remove(table)
            .map(|_| debug!(table, "deleted table"))
            .ok_or_else(|| BackendError::TableNotFound {
                table: table.to_owned(),
            })
    }

    /// Names of all tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of items stored in `table`.
    pub fn item_count(&self, table: &str) -> Result<usize, BackendError> {
        Ok(self.table(table)?.item_count())
    }

    /// Calls recorded since creation or the last [`MemoryBackend::clear_calls`].
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Empties the call journal.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn table(&self, name: &str) -> Result<Arc<TableStorage>, BackendError> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| BackendError::TableNotFound {
                table: name.to_owned(),
            })
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, table: &str, item: Item, condition: &[Condition]) -> Result<(), BackendError> {
        self.record(BackendCall::Put {
            table: table.to_owned(),
        });
        self.table(table)?.put(item, condition)
    }

    fn get(&self, table: &str, key: &Item) -> Result<Option<Item>, BackendError> {
        self.record(BackendCall::Get {
            table: table.to_owned(),
        });
        self.table(table)?.get(key)
    }

    fn delete(
        &self,
        table: &str,
        key: &Item,
        condition: &[Condition],
    ) -> Result<(), BackendError> {
        self.record(BackendCall::Delete {
            table: table.to_owned(),
        });
        self.table(table)?.delete(key, condition)
    }

    fn query(&self, request: &QueryRequest) -> Result<Page, BackendError> {
        self.record(BackendCall::Query {
            table: request.table.clone(),
            index: request.index.clone(),
            consistent: request.consistent_read,
        });
        let storage = self.table(&request.table)?;
        let page = match &request.index {
            Some(name) => storage.query_index(
                storage.index(name)?,
                &request.key_condition,
                &request.filter,
                request.scan_forward,
                request.limit,
                request.exclusive_start_key.as_ref(),
            )?,
            None => storage.query_table(
                &request.key_condition,
                &request.filter,
                request.scan_forward,
                request.limit,
                request.exclusive_start_key.as_ref(),
            )?,
        };
        let page = project(page, request.projection.as_deref());
        debug!(
            table = storage.name(),
            index = request.index.as_deref(),
            items = page.items.len(),
            more = page.last_evaluated_key.is_some(),
            "query page"
        );
        Ok(page)
    }

    fn scan(&self, request: &ScanRequest) -> Result<Page, BackendError> {
        self.record(BackendCall::Scan {
            table: request.table.clone(),
        });
        let storage = self.table(&request.table)?;
        let page = storage.scan(
            &request.filter,
            request.limit,
            request.exclusive_start_key.as_ref(),
        );
        let page = project(page, request.projection.as_deref());
        debug!(
            table = storage.name(),
            items = page.items.len(),
            more = page.last_evaluated_key.is_some(),
            "scan page"
        );
        Ok(page)
    }

    fn update(
        &self,
        table: &str,
        key: &Item,
        updates: &[AttributeUpdate],
        condition: &[Condition],
    ) -> Result<Item, BackendError> {
        self.record(BackendCall::Update {
            table: table.to_owned(),
        });
        self.table(table)?
            .update(key, condition, |item| evaluator::apply_updates(item, updates))
    }

    fn batch_get(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, BackendError> {
        self.record(BackendCall::BatchGet {
            table: table.to_owned(),
            keys: keys.len(),
        });
        let storage = self.table(table)?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = storage.get(key)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

/// Keeps only the projected attributes of every item in the page.
fn project(mut page: Page, projection: Option<&[String]>) -> Page {
    if let Some(names) = projection {
        for item in &mut page.items {
            item.retain(|name, _| names.iter().any(|n| n == name));
        }
    }
    page
}
