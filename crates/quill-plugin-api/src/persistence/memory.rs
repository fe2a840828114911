//! In-memory persistence collaborator.
//!
//! Rows are JSON objects grouped by schema. Every created row gets a
//! numeric `id` unless it brings its own. Transactions read from a snapshot
//! of all tables plus their own writes, and replay their writes onto the
//! live tables on commit. Ids are reserved from the live store, so rows
//! written outside a transaction keep theirs.

use super::{Filter, Persistence, PersistenceError, PersistenceResult, QuerySpec, Transaction};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, Vec<JsonValue>>,
    next_id: u64,
}

impl Tables {
    fn table(&self, schema: &str) -> PersistenceResult<&Vec<JsonValue>> {
        self.rows
            .get(schema)
            .ok_or_else(|| PersistenceError::UnknownSchema(schema.to_string()))
    }

    fn table_mut(&mut self, schema: &str) -> PersistenceResult<&mut Vec<JsonValue>> {
        self.rows
            .get_mut(schema)
            .ok_or_else(|| PersistenceError::UnknownSchema(schema.to_string()))
    }

    fn create(&mut self, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        self.table(schema)?;

        let mut row = values.clone();
        if !row.contains_key("id") {
            self.next_id += 1;
            row.insert("id".to_string(), self.next_id.into());
        }
        let row = JsonValue::Object(row);
        self.table_mut(schema)?.push(row.clone());
        Ok(row)
    }

    fn select(&self, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>> {
        let rows = self
            .table(&spec.schema)?
            .iter()
            .filter(|row| spec.matches(row))
            .skip(spec.offset.unwrap_or(0))
            .take(spec.limit.unwrap_or(usize::MAX))
            .map(|row| spec.project(row))
            .collect();
        Ok(rows)
    }

    fn count(&self, spec: &QuerySpec) -> PersistenceResult<u64> {
        let count = self.table(&spec.schema)?.iter().filter(|row| spec.matches(row)).count();
        Ok(count as u64)
    }

    fn update(&mut self, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        let mut affected = 0;
        for row in self.table_mut(&spec.schema)?.iter_mut() {
            if !spec.matches(row) {
                continue;
            }
            if let Some(object) = row.as_object_mut() {
                for (field, value) in values {
                    object.insert(field.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn delete(&mut self, spec: &QuerySpec) -> PersistenceResult<u64> {
        let table = self.table_mut(&spec.schema)?;
        let before = table.len();
        table.retain(|row| !spec.matches(row));
        Ok((before - table.len()) as u64)
    }
}

/// Reference collaborator keeping all rows in memory.
///
/// Raw `query`/`exec` are not supported.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store without schemas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a schema; declaring an existing schema keeps its rows.
    pub fn define(&self, schema: impl Into<String>) {
        let schema = schema.into();
        debug!(schema = %schema, "Defined schema");
        lock(&self.tables).rows.entry(schema).or_default();
    }

    /// Declared schema names.
    pub fn schemas(&self) -> Vec<String> {
        lock(&self.tables).rows.keys().cloned().collect()
    }
}

impl Persistence for MemoryStore {
    fn query(&self, _ctx: &JsonValue, _sql: &str, _args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>> {
        Err(PersistenceError::Unsupported("raw queries on the memory store".to_string()))
    }

    fn exec(&self, _ctx: &JsonValue, _sql: &str, _args: &[JsonValue]) -> PersistenceResult<u64> {
        Err(PersistenceError::Unsupported("raw statements on the memory store".to_string()))
    }

    fn create(&self, _ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        lock(&self.tables).create(schema, values)
    }

    fn select(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>> {
        lock(&self.tables).select(spec)
    }

    fn count(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        lock(&self.tables).count(spec)
    }

    fn update(&self, _ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        lock(&self.tables).update(spec, values)
    }

    fn delete(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        lock(&self.tables).delete(spec)
    }

    fn begin(&self, _ctx: &JsonValue) -> PersistenceResult<Arc<dyn Transaction>> {
        let snapshot = lock(&self.tables).clone();
        Ok(Arc::new(MemoryTransaction {
            store: Arc::clone(&self.tables),
            working: Mutex::new(Some(Working {
                tables: snapshot,
                log: Vec::new(),
            })),
        }))
    }
}

/// A write recorded by a transaction, replayed on commit.
#[derive(Debug)]
enum Write {
    Create { schema: String, row: Filter },
    Update { spec: QuerySpec, values: Filter },
    Delete { spec: QuerySpec },
}

impl Write {
    fn apply(&self, tables: &mut Tables) -> PersistenceResult<()> {
        match self {
            Write::Create { schema, row } => tables.create(schema, row).map(|_| ()),
            Write::Update { spec, values } => tables.update(spec, values).map(|_| ()),
            Write::Delete { spec } => tables.delete(spec).map(|_| ()),
        }
    }
}

#[derive(Debug)]
struct Working {
    tables: Tables,
    log: Vec<Write>,
}

struct MemoryTransaction {
    store: Arc<Mutex<Tables>>,
    working: Mutex<Option<Working>>,
}

impl MemoryTransaction {
    fn with<R>(&self, f: impl FnOnce(&mut Working) -> PersistenceResult<R>) -> PersistenceResult<R> {
        match lock(&self.working).as_mut() {
            Some(working) => f(working),
            None => Err(PersistenceError::TransactionClosed),
        }
    }

    /// Apply `write` to the working tables and record it for commit.
    fn write<R>(&self, write: Write, f: impl FnOnce(&mut Tables) -> PersistenceResult<R>) -> PersistenceResult<R> {
        self.with(|working| {
            let result = f(&mut working.tables)?;
            working.log.push(write);
            Ok(result)
        })
    }

    fn reserve_id(&self) -> u64 {
        let mut live = lock(&self.store);
        live.next_id += 1;
        live.next_id
    }
}

impl Persistence for MemoryTransaction {
    fn query(&self, _ctx: &JsonValue, _sql: &str, _args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>> {
        Err(PersistenceError::Unsupported("raw queries on the memory store".to_string()))
    }

    fn exec(&self, _ctx: &JsonValue, _sql: &str, _args: &[JsonValue]) -> PersistenceResult<u64> {
        Err(PersistenceError::Unsupported("raw statements on the memory store".to_string()))
    }

    fn create(&self, _ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        self.with(|working| working.tables.table(schema).map(|_| ()))?;

        let mut row = values.clone();
        if !row.contains_key("id") {
            row.insert("id".to_string(), self.reserve_id().into());
        }
        let write = Write::Create {
            schema: schema.to_string(),
            row: row.clone(),
        };
        self.write(write, |tables| tables.create(schema, &row))
    }

    fn select(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>> {
        self.with(|working| working.tables.select(spec))
    }

    fn count(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.with(|working| working.tables.count(spec))
    }

    fn update(&self, _ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        let write = Write::Update {
            spec: spec.clone(),
            values: values.clone(),
        };
        self.write(write, |tables| tables.update(spec, values))
    }

    fn delete(&self, _ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        let write = Write::Delete { spec: spec.clone() };
        self.write(write, |tables| tables.delete(spec))
    }

    fn begin(&self, _ctx: &JsonValue) -> PersistenceResult<Arc<dyn Transaction>> {
        Err(PersistenceError::Unsupported("nested transactions".to_string()))
    }
}

impl Transaction for MemoryTransaction {
    fn as_persistence(&self) -> &dyn Persistence {
        self
    }

    fn commit(&self) -> PersistenceResult<()> {
        let working = lock(&self.working)
            .take()
            .ok_or(PersistenceError::TransactionClosed)?;

        let mut live = lock(&self.store);
        let mut replayed = live.clone();
        for write in &working.log {
            write.apply(&mut replayed)?;
        }
        *live = replayed;
        debug!(writes = working.log.len(), "Committed transaction");
        Ok(())
    }

    fn rollback(&self) -> PersistenceResult<()> {
        lock(&self.working)
            .take()
            .map(|_| debug!("Rolled back transaction"))
            .ok_or(PersistenceError::TransactionClosed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(value: JsonValue) -> Filter {
        value.as_object().cloned().unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.define("post");
        store
    }

    #[test]
    fn test_create_assigns_ids() {
        let store = store();
        let ctx = JsonValue::Null;
        let a = store.create(&ctx, "post", &values(json!({ "title": "a" }))).unwrap();
        let b = store.create(&ctx, "post", &values(json!({ "title": "b" }))).unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 2);
    }

    #[test]
    fn test_unknown_schema() {
        let store = store();
        let err = store
            .create(&JsonValue::Null, "comment", &Filter::new())
            .unwrap_err();
        assert!(matches!(err, PersistenceError::UnknownSchema(ref s) if s == "comment"));
    }

    #[test]
    fn test_update_delete_and_paging() {
        let store = store();
        let ctx = JsonValue::Null;
        for i in 0..5 {
            let status = if i % 2 == 0 { "draft" } else { "live" };
            store
                .create(&ctx, "post", &values(json!({ "n": i, "status": status })))
                .unwrap();
        }

        let mut drafts = QuerySpec::new("post");
        drafts.filters.push(values(json!({ "status": "draft" })));
        assert_eq!(store.count(&ctx, &drafts).unwrap(), 3);

        let mut page = drafts.clone();
        page.offset = Some(1);
        page.limit = Some(1);
        page.select = vec!["n".into()];
        assert_eq!(store.select(&ctx, &page).unwrap(), vec![json!({ "n": 2 })]);

        assert_eq!(store.update(&ctx, &drafts, &values(json!({ "status": "live" }))).unwrap(), 3);
        assert_eq!(store.count(&ctx, &drafts).unwrap(), 0);
        assert_eq!(store.delete(&ctx, &QuerySpec::new("post")).unwrap(), 5);
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let store = store();
        let ctx = JsonValue::Null;

        let tx = store.begin(&ctx).unwrap();
        tx.create(&ctx, "post", &values(json!({ "title": "pending" }))).unwrap();
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 0);
        tx.commit().unwrap();
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 1);
        assert!(matches!(tx.commit(), Err(PersistenceError::TransactionClosed)));

        let tx = store.begin(&ctx).unwrap();
        tx.delete(&ctx, &QuerySpec::new("post")).unwrap();
        tx.rollback().unwrap();
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 1);
        assert!(matches!(
            tx.create(&ctx, "post", &Filter::new()),
            Err(PersistenceError::TransactionClosed)
        ));
    }

    #[test]
    fn test_commit_keeps_writes_made_outside_the_transaction() {
        let store = store();
        let ctx = JsonValue::Null;

        let tx = store.begin(&ctx).unwrap();
        let outside = store.create(&ctx, "post", &values(json!({ "title": "outside" }))).unwrap();
        let inside = tx.create(&ctx, "post", &values(json!({ "title": "inside" }))).unwrap();
        assert_ne!(outside["id"], inside["id"]);
        assert_eq!(tx.count(&ctx, &QuerySpec::new("post")).unwrap(), 1);
        tx.commit().unwrap();

        let rows = store.select(&ctx, &QuerySpec::new("post")).unwrap();
        assert_eq!(rows, vec![outside, inside]);

        let next = store.create(&ctx, "post", &values(json!({ "title": "after" }))).unwrap();
        assert_eq!(next["id"], json!(3));
    }

    #[test]
    fn test_commit_replays_updates_against_live_rows() {
        let store = store();
        let ctx = JsonValue::Null;
        store.create(&ctx, "post", &values(json!({ "status": "draft" }))).unwrap();

        let mut drafts = QuerySpec::new("post");
        drafts.filters.push(values(json!({ "status": "draft" })));

        let tx = store.begin(&ctx).unwrap();
        assert_eq!(tx.update(&ctx, &drafts, &values(json!({ "status": "live" }))).unwrap(), 1);
        store.create(&ctx, "post", &values(json!({ "status": "draft" }))).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.count(&ctx, &drafts).unwrap(), 0);
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 2);
    }
}
