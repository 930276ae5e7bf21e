use thiserror::Error;

pub type StorageError = anyhow::Error;

/// Errors reported by a [`DocumentStore`](crate::api::store::DocumentStore)
/// or [`RowStore`](crate::api::store::RowStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("the resource {0} does not exist")]
    NotFound(String),
    #[error("access denied by the store ({code}): {message}")]
    PermissionDenied { code: String, message: String },
    #[error("an error ocurred in the storage backend: {0:?}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// Whether this error means the addressed row or document is gone.
    ///
    /// Backends do not always classify this themselves, so untyped storage
    /// errors are inspected for the usual wording as well.
    pub fn indicates_missing_record(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::PermissionDenied { .. } => false,
            StoreError::Storage(error) => {
                let text = format!("{:#}", error).to_lowercase();
                // Postgres says "does not exist" for missing tables and
                // columns too, so that wording is not a missing row.
                text.contains("not found") || text.contains("contains 0 rows") || text.contains("pgrst116")
            }
        }
    }
}
