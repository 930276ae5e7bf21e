use crate::api::{error::StoreError, id::*};
use serde_json::{Map, Value};

/// A schemaless document store with atomic array appends.
///
/// Methods take `&self`; implementations are shared between the experiment
/// thread and background writes and use interior mutability where needed.
#[rustfmt::skip]
pub trait DocumentStore: Send + Sync {
    /// Allocates an id for a new document without contacting the store.
    fn new_document_id(&self, collection: &str) -> DocumentId;
    /// Replaces the whole document, creating it if needed.
    fn set(&self, collection: &str, id: &DocumentId, document: &Map<String, Value>) -> Result<(), StoreError>;
    /// Appends `elements` to the array `field`, merged by the store itself.
    fn array_union(&self, collection: &str, id: &DocumentId, field: &str, elements: &[Value]) -> Result<(), StoreError>;
}

/// A table store with generated primary keys.
///
/// `update` and `select_column` report a missing row as [`StoreError::NotFound`].
#[rustfmt::skip]
pub trait RowStore: Send + Sync {
    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<RowId, StoreError>;
    fn update(&self, table: &str, id: &RowId, changes: &Map<String, Value>) -> Result<(), StoreError>;
    fn select_column(&self, table: &str, id: &RowId, column: &str) -> Result<Value, StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn new_document_id(&self, collection: &str) -> DocumentId {
        (**self).new_document_id(collection)
    }

    fn set(&self, collection: &str, id: &DocumentId, document: &Map<String, Value>) -> Result<(), StoreError> {
        (**self).set(collection, id, document)
    }

    fn array_union(&self, collection: &str, id: &DocumentId, field: &str, elements: &[Value]) -> Result<(), StoreError> {
        (**self).array_union(collection, id, field, elements)
    }
}

impl<S: RowStore + ?Sized> RowStore for std::sync::Arc<S> {
    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<RowId, StoreError> {
        (**self).insert(table, row)
    }

    fn update(&self, table: &str, id: &RowId, changes: &Map<String, Value>) -> Result<(), StoreError> {
        (**self).update(table, id, changes)
    }

    fn select_column(&self, table: &str, id: &RowId, column: &str) -> Result<Value, StoreError> {
        (**self).select_column(table, id, column)
    }
}
