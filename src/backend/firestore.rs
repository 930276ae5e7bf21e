//! Cloud Firestore over its REST API.

mod value;

use crate::api::{
    error::StoreError,
    id::DocumentId,
    store::DocumentStore,
};
use crate::backend::{execute, Endpoint, Rejected};
use anyhow::anyhow;
use nanorand::{WyRand, RNG};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Mutex;

pub const API_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE: &str = "(default)";

const AUTO_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const AUTO_ID_LENGTH: usize = 20;

#[derive(Deserialize)]
struct GoogleErrorResponse {
    error: GoogleError,
}
#[derive(Deserialize)]
struct GoogleError {
    #[serde(default)]
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

fn parse_error(rejected: Rejected, document: &str) -> StoreError {
    let Rejected { status, body } = rejected;
    let response = serde_json::from_str::<GoogleErrorResponse>(&body).ok();
    match response {
        Some(GoogleErrorResponse { error }) => match error.status.clone().as_str() {
            "NOT_FOUND" => StoreError::NotFound(document.to_owned()),
            "PERMISSION_DENIED" | "UNAUTHENTICATED" => StoreError::PermissionDenied {
                code: error.status,
                message: error.message,
            },
            _ => StoreError::Storage(anyhow!("{} {}: {}", error.code, error.status, error.message)),
        },
        None => StoreError::Storage(anyhow!("Unknown {} error:\n{}", status, body)),
    }
}

/// A Firestore database, accessed with a web API key.
pub struct Firestore {
    api_url: String,
    project_id: String,
    database: String,
    api_key: String,
    rng: Mutex<WyRand>,
}

impl Firestore {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() ^ u64::from(elapsed.subsec_nanos()))
            .unwrap_or(0x5eed);
        Firestore {
            api_url: API_URL.to_owned(),
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_owned(),
            api_key: api_key.into(),
            rng: Mutex::new(WyRand::new_seed(seed)),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Talk to another endpoint, such as the local emulator.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Resource name of the database's document root.
    fn root(&self) -> String {
        format!("projects/{}/databases/{}/documents", self.project_id, self.database)
    }

    fn execute<Ep: Endpoint>(&self, request: &Ep, document: &str) -> Result<Ep::Value, StoreError> {
        let api_key = &self.api_key;
        let result = execute(&self.api_url, request, |http_request| {
            http_request.query("key", api_key);
        })
        .map_err(StoreError::Storage)?;
        result.map_err(|rejected| parse_error(rejected, document))
    }
}

impl DocumentStore for Firestore {
    fn new_document_id(&self, _collection: &str) -> DocumentId {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let id = (0..AUTO_ID_LENGTH)
            .map(|_| {
                let index = rng.generate::<u16>() as usize % AUTO_ID_ALPHABET.len();
                AUTO_ID_ALPHABET[index] as char
            })
            .collect::<String>();
        DocumentId::from(id)
    }

    fn set(&self, collection: &str, id: &DocumentId, document: &Map<String, Value>) -> Result<(), StoreError> {
        let name = format!("{}/{}/{}", self.root(), collection, id);
        let request = SetDocument {
            name: &name,
            fields: value::encode_fields(document),
        };
        self.execute(&request, &name)
    }

    fn array_union(&self, collection: &str, id: &DocumentId, field: &str, elements: &[Value]) -> Result<(), StoreError> {
        let name = format!("{}/{}/{}", self.root(), collection, id);
        let request = Commit {
            database: self.root(),
            writes: vec![json!({
                "transform": {
                    "document": name,
                    "fieldTransforms": [{
                        "fieldPath": field,
                        "appendMissingElements": {
                            "values": elements.iter().map(value::encode).collect::<Vec<_>>()
                        }
                    }]
                }
            })],
        };
        self.execute(&request, &name)
    }
}

/// Replaces the whole document; a PATCH without update mask.
#[derive(Debug, Serialize)]
struct SetDocument<'a> {
    #[serde(skip)]
    name: &'a str,
    fields: Map<String, Value>,
}
impl Endpoint for SetDocument<'_> {
    const METHOD: &'static str = "PATCH";
    type Response = IgnoredAny;
    type Value = ();

    fn path(&self) -> String {
        self.name.to_owned()
    }

    fn extract(_response: Self::Response) -> Self::Value {}
}

#[derive(Debug, Serialize)]
struct Commit {
    #[serde(skip)]
    database: String,
    writes: Vec<Value>,
}
impl Endpoint for Commit {
    const METHOD: &'static str = "POST";
    type Response = IgnoredAny;
    type Value = ();

    fn path(&self) -> String {
        format!("{}:commit", self.database)
    }

    fn extract(_response: Self::Response) -> Self::Value {}
}
