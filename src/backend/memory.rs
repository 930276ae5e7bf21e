//! In-memory stores for tests and offline sessions.
//!
//! Every call is recorded, and failures can be scripted per operation with
//! `fail_next`. The stores are cheap to clone; clones share their contents.

use crate::api::{
    error::StoreError,
    id::{DocumentId, RowId},
    store::{DocumentStore, RowStore},
};
use anyhow::anyhow;
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// A failure to inject into the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    PermissionDenied,
    Unavailable,
}

impl Fault {
    fn into_error(self, what: &str) -> StoreError {
        match self {
            Fault::NotFound => StoreError::NotFound(what.to_owned()),
            Fault::PermissionDenied => StoreError::PermissionDenied {
                code: "42501".to_owned(),
                message: format!("permission denied for {}", what),
            },
            Fault::Unavailable => StoreError::Storage(anyhow!("store unavailable while accessing {}", what)),
        }
    }
}

// ROWS

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Update,
    Select,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowCall {
    Insert { table: String, row: Map<String, Value> },
    Update { table: String, id: RowId, changes: Map<String, Value> },
    Select { table: String, id: RowId, column: String },
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    rows: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    calls: Vec<RowCall>,
    faults: VecDeque<(RowOp, Fault)>,
}

impl Tables {
    fn take_fault(&mut self, op: RowOp) -> Option<Fault> {
        let position = self.faults.iter().position(|(target, _)| *target == op)?;
        self.faults.remove(position).map(|(_, fault)| fault)
    }
}

/// A row store keeping its tables in memory, with serial integer ids.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    tables: Arc<Mutex<Tables>>,
    latency: Option<Duration>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, to widen the window between concurrent calls.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `op` call fail with `fault`.
    pub fn fail_next(&self, op: RowOp, fault: Fault) {
        self.lock().faults.push_back((op, fault));
    }

    pub fn seed_row(&self, table: &str, id: &RowId, row: Map<String, Value>) {
        self.lock()
            .rows
            .entry(table.to_owned())
            .or_default()
            .insert(id.as_ref().to_owned(), row);
    }

    /// Deletes a row from whichever table holds it.
    pub fn delete_row(&self, id: &RowId) {
        for rows in self.lock().rows.values_mut() {
            rows.remove(id.as_ref());
        }
    }

    pub fn row(&self, table: &str, id: &RowId) -> Option<Map<String, Value>> {
        self.lock().rows.get(table)?.get(id.as_ref()).cloned()
    }

    /// The `trials` column of a row in any table.
    pub fn trials(&self, id: &RowId) -> Option<Vec<Value>> {
        let tables = self.lock();
        let row = tables.rows.values().find_map(|rows| rows.get(id.as_ref()))?;
        match row.get(crate::api::TRIALS) {
            Some(Value::Array(trials)) => Some(trials.clone()),
            _ => None,
        }
    }

    pub fn calls(&self) -> Vec<RowCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }
}

impl RowStore for MemoryRowStore {
    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<RowId, StoreError> {
        self.wait();
        let mut tables = self.lock();
        tables.calls.push(RowCall::Insert { table: table.to_owned(), row: row.clone() });
        if let Some(fault) = tables.take_fault(RowOp::Insert) {
            return Err(fault.into_error(table));
        }
        tables.next_id += 1;
        let id = RowId::from(format!("{}", tables.next_id));
        tables
            .rows
            .entry(table.to_owned())
            .or_default()
            .insert(id.as_ref().to_owned(), row.clone());
        Ok(id)
    }

    fn update(&self, table: &str, id: &RowId, changes: &Map<String, Value>) -> Result<(), StoreError> {
        self.wait();
        let mut tables = self.lock();
        tables.calls.push(RowCall::Update {
            table: table.to_owned(),
            id: id.clone(),
            changes: changes.clone(),
        });
        let what = format!("row {} in {}", id, table);
        if let Some(fault) = tables.take_fault(RowOp::Update) {
            return Err(fault.into_error(&what));
        }
        let row = tables
            .rows
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id.as_ref()))
            .ok_or(StoreError::NotFound(what))?;
        for (key, value) in changes {
            row.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn select_column(&self, table: &str, id: &RowId, column: &str) -> Result<Value, StoreError> {
        self.wait();
        let mut tables = self.lock();
        tables.calls.push(RowCall::Select {
            table: table.to_owned(),
            id: id.clone(),
            column: column.to_owned(),
        });
        let what = format!("row {} in {}", id, table);
        if let Some(fault) = tables.take_fault(RowOp::Select) {
            return Err(fault.into_error(&what));
        }
        let row = tables
            .rows
            .get(table)
            .and_then(|rows| rows.get(id.as_ref()))
            .ok_or(StoreError::NotFound(what))?;
        Ok(row.get(column).cloned().unwrap_or(Value::Null))
    }
}

// DOCUMENTS

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOp {
    Set,
    ArrayUnion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCall {
    Set { collection: String, id: DocumentId, document: Map<String, Value> },
    ArrayUnion { collection: String, id: DocumentId, field: String, elements: Vec<Value> },
}

#[derive(Debug, Default)]
struct Collections {
    next_id: u64,
    documents: HashMap<(String, String), Map<String, Value>>,
    calls: Vec<DocumentCall>,
    faults: VecDeque<(DocumentOp, Fault)>,
}

/// A document store keeping its collections in memory.
///
/// `array_union` skips elements equal to one already in the array, like
/// Firestore does.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: DocumentOp, fault: Fault) {
        self.lock().faults.push_back((op, fault));
    }

    pub fn document(&self, collection: &str, id: &DocumentId) -> Option<Map<String, Value>> {
        self.lock()
            .documents
            .get(&(collection.to_owned(), id.as_ref().to_owned()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<DocumentCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Collections {
    fn take_fault(&mut self, op: DocumentOp) -> Option<Fault> {
        let position = self.faults.iter().position(|(target, _)| *target == op)?;
        self.faults.remove(position).map(|(_, fault)| fault)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn new_document_id(&self, _collection: &str) -> DocumentId {
        let mut collections = self.lock();
        collections.next_id += 1;
        DocumentId::from(format!("memory-{}", collections.next_id))
    }

    fn set(&self, collection: &str, id: &DocumentId, document: &Map<String, Value>) -> Result<(), StoreError> {
        let mut collections = self.lock();
        collections.calls.push(DocumentCall::Set {
            collection: collection.to_owned(),
            id: id.clone(),
            document: document.clone(),
        });
        if let Some(fault) = collections.take_fault(DocumentOp::Set) {
            return Err(fault.into_error(&format!("{}/{}", collection, id)));
        }
        collections
            .documents
            .insert((collection.to_owned(), id.as_ref().to_owned()), document.clone());
        Ok(())
    }

    fn array_union(&self, collection: &str, id: &DocumentId, field: &str, elements: &[Value]) -> Result<(), StoreError> {
        let mut collections = self.lock();
        collections.calls.push(DocumentCall::ArrayUnion {
            collection: collection.to_owned(),
            id: id.clone(),
            field: field.to_owned(),
            elements: elements.to_vec(),
        });
        if let Some(fault) = collections.take_fault(DocumentOp::ArrayUnion) {
            return Err(fault.into_error(&format!("{}/{}", collection, id)));
        }
        let document = collections
            .documents
            .entry((collection.to_owned(), id.as_ref().to_owned()))
            .or_default();
        let array = document
            .entry(field.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !array.is_array() {
            *array = Value::Array(Vec::new());
        }
        if let Value::Array(items) = array {
            for element in elements {
                if !items.contains(element) {
                    items.push(element.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_get_serial_ids() {
        let store = MemoryRowStore::new();
        let first = store.insert("experiments", &Map::new()).unwrap();
        let second = store.insert("experiments", &Map::new()).unwrap();
        assert_eq!(first.as_ref(), "1");
        assert_eq!(second.as_ref(), "2");
    }

    #[test]
    fn scripted_fault_hits_only_the_next_matching_call() {
        let store = MemoryRowStore::new();
        let id = store.insert("experiments", &Map::new()).unwrap();
        store.fail_next(RowOp::Select, Fault::Unavailable);

        store.update("experiments", &id, &Map::new()).unwrap();
        assert!(store.select_column("experiments", &id, "trials").is_err());
        assert_eq!(store.select_column("experiments", &id, "trials").unwrap(), Value::Null);
    }

    #[test]
    fn deleted_row_is_not_found() {
        let store = MemoryRowStore::new();
        let id = store.insert("experiments", &Map::new()).unwrap();
        store.delete_row(&id);
        let error = store.select_column("experiments", &id, "trials").unwrap_err();
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[test]
    fn array_union_skips_equal_elements() {
        let store = MemoryDocumentStore::new();
        let id = store.new_document_id("experiments");
        store
            .array_union("experiments", &id, "trials", &[json!({ "trial_type": "a" })])
            .unwrap();
        store
            .array_union("experiments", &id, "trials", &[json!({ "trial_type": "a" }), json!({ "trial_type": "b" })])
            .unwrap();
        let document = store.document("experiments", &id).unwrap();
        assert_eq!(
            document["trials"],
            json!([{ "trial_type": "a" }, { "trial_type": "b" }])
        );
    }
}
