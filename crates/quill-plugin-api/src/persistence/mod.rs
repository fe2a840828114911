//! Persistence collaborator interface and its guest façade.
//!
//! The relational engine itself lives outside this crate. Plugins reach it
//! through the [`Persistence`] trait; filter arguments are plain maps of
//! field to expected value, compiled into predicates by the collaborator.

mod facade;
mod hooked;
mod memory;

pub use facade::{DbBinding, PersistenceFacade};
pub use hooked::{HookedPersistence, HookedTransaction};
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

/// A guest filter map: every entry must match.
pub type Filter = Map<String, JsonValue>;

/// Errors reported by a persistence collaborator.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The collaborator does not support the operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The schema does not exist.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A query expecting one row found a different number.
    #[error("Expected exactly one row, found {0}")]
    NotSingular(usize),

    /// The transaction was already committed or rolled back.
    #[error("Transaction is closed")]
    TransactionClosed,

    /// A hook around the operation failed.
    #[error("Hook failed: {0}")]
    Hook(#[from] quill_runtime::RuntimeError),

    /// Any other collaborator failure.
    #[error("{0}")]
    Backend(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// A builder query: schema, ANDed filters and paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub schema: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    /// Projected fields; empty selects every field.
    #[serde(default)]
    pub select: Vec<String>,
}

impl QuerySpec {
    /// Query every row of `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Self::default()
        }
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &JsonValue) -> bool {
        self.filters.iter().all(|filter| {
            filter
                .iter()
                .all(|(field, expected)| row.get(field) == Some(expected))
        })
    }

    /// Apply the projection to a row.
    pub fn project(&self, row: &JsonValue) -> JsonValue {
        if self.select.is_empty() {
            return row.clone();
        }
        let mut out = Map::new();
        for field in &self.select {
            if let Some(value) = row.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
        JsonValue::Object(out)
    }
}

/// The host's persistence collaborator.
///
/// `ctx` is the opaque host context created by the guest's `context()`
/// binding; collaborators may use it for auditing or deadlines.
pub trait Persistence: Send + Sync {
    /// Run a raw read query.
    fn query(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>>;

    /// Run a raw statement, returning the affected row count.
    fn exec(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<u64>;

    /// Insert an entity, returning the stored row.
    fn create(&self, ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue>;

    /// Rows matching a builder query.
    fn select(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>>;

    /// Number of rows matching a builder query (paging ignored).
    fn count(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64>;

    /// Update matching rows, returning the affected row count.
    fn update(&self, ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64>;

    /// Delete matching rows, returning the affected row count.
    fn delete(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64>;

    /// Start a transaction.
    fn begin(&self, ctx: &JsonValue) -> PersistenceResult<Arc<dyn Transaction>>;
}

/// An open transaction; operations on it are invisible outside until commit.
pub trait Transaction: Persistence {
    /// The transaction as a plain collaborator.
    fn as_persistence(&self) -> &dyn Persistence;

    /// Make the transaction's changes visible.
    fn commit(&self) -> PersistenceResult<()>;

    /// Discard the transaction's changes.
    fn rollback(&self) -> PersistenceResult<()>;
}
