use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_COLLECTION: &str = "experiments";

/// Options shared by both managers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManagerOptions {
    /// Collection (document store) or table (row store) holding the records.
    pub collection: String,
    /// Write to this existing record instead of creating a new one.
    pub fixed_record_id: Option<String>,
    /// Merged over the `date`/`time` defaults of the record metadata.
    pub metadata: Map<String, Value>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            collection: DEFAULT_COLLECTION.to_owned(),
            fixed_record_id: None,
            metadata: Map::new(),
        }
    }
}

impl ManagerOptions {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn fixed_record_id(mut self, id: impl Into<String>) -> Self {
        self.fixed_record_id = Some(id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
