//! Tables served by PostgREST, such as a Supabase project's REST API.

use crate::api::{
    error::{StorageError, StoreError},
    id::RowId,
    store::RowStore,
};
use crate::backend::{execute, Endpoint, Rejected};
use anyhow::{anyhow, Context};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;

#[derive(Deserialize)]
struct RestErrorResponse {
    pub code: RestErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
}
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    #[error("{status} {code}: {message}")]
    Known { status: u16, code: RestErrorCode, message: String },
    #[error("Unknown {status} error:\n{body}")]
    Unknown { status: u16, body: String },
}
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RestErrorCode {
    /// The single-object response found no row.
    NoRows,
    /// Postgres `insufficient_privilege`, raised by row level security.
    InsufficientPrivilege,
    Unknown(String),
}
impl From<String> for RestErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PGRST116" => RestErrorCode::NoRows,
            "42501" => RestErrorCode::InsufficientPrivilege,
            _ => RestErrorCode::Unknown(value),
        }
    }
}
impl Display for RestErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestErrorCode::NoRows => f.write_str("PGRST116"),
            RestErrorCode::InsufficientPrivilege => f.write_str("42501"),
            RestErrorCode::Unknown(code) => f.write_str(code),
        }
    }
}

fn parse_error(rejected: Rejected) -> RestError {
    let Rejected { status, body } = rejected;
    let response = serde_json::from_str::<RestErrorResponse>(&body).ok();
    if let Some(response) = response {
        let message = match response.details {
            Some(details) => format!("{} ({})", response.message, details),
            None => response.message,
        };
        RestError::Known {
            status,
            code: response.code,
            message,
        }
    } else {
        RestError::Unknown { status, body }
    }
}

fn classify(error: RestError, row: &str) -> StoreError {
    match error {
        RestError::Known {
            code: RestErrorCode::NoRows,
            ..
        } => StoreError::NotFound(row.to_owned()),
        RestError::Known {
            code: RestErrorCode::InsufficientPrivilege,
            message,
            ..
        } => StoreError::PermissionDenied {
            code: RestErrorCode::InsufficientPrivilege.to_string(),
            message,
        },
        RestError::Known { status, code, message } if status == 401 || status == 403 => {
            StoreError::PermissionDenied { code: code.to_string(), message }
        }
        RestError::Unknown { status, body } if status == 401 || status == 403 => {
            StoreError::PermissionDenied { code: status.to_string(), message: body }
        }
        _ => StoreError::Storage(error.into()),
    }
}

/// A PostgREST endpoint, authenticated with an API key.
pub struct PostgRest {
    api_url: String,
    api_key: String,
}

impl PostgRest {
    /// `url` is the project url, like `https://xyzcompany.supabase.co`.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let url = url.into();
        PostgRest {
            api_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: api_key.into(),
        }
    }

    fn execute<Ep: Endpoint>(&self, request: &Ep, row: &str) -> Result<Ep::Value, StoreError> {
        let bearer = format!("Bearer {}", self.api_key);
        let api_key = &self.api_key;
        let result = execute(&self.api_url, request, |http_request| {
            http_request.set("apikey", api_key);
            http_request.set("Authorization", &bearer);
        })
        .map_err(StoreError::Storage)?;
        result.map_err(|rejected| classify(parse_error(rejected), row))
    }
}

impl RowStore for PostgRest {
    fn insert(&self, table: &str, row: &Map<String, Value>) -> Result<RowId, StoreError> {
        let request = InsertRow { table, row };
        self.execute(&request, table)?
            .ok_or_else(|| StoreError::Storage(anyhow!("insert into {} returned no row", table)))
    }

    fn update(&self, table: &str, id: &RowId, changes: &Map<String, Value>) -> Result<(), StoreError> {
        let request = UpdateRow { table, id, changes };
        let what = format!("row {} in {}", id, table);
        let updated = self.execute(&request, &what)?;
        if updated == 0 {
            return Err(StoreError::NotFound(what));
        }
        Ok(())
    }

    fn select_column(&self, table: &str, id: &RowId, column: &str) -> Result<Value, StoreError> {
        let request = SelectColumn { table, id, column };
        let what = format!("row {} in {}", id, table);
        let mut row = self.execute(&request, &what)?;
        Ok(row.remove(column).unwrap_or(Value::Null))
    }
}

#[derive(Serialize)]
struct RowFilter<'a> {
    id: String,
    select: &'a str,
}
#[derive(Serialize)]
struct Columns<'a> {
    select: &'a str,
}

/// `select=...`, narrowed to one row when `id` is given.
fn row_query(id: Option<&RowId>, select: &str) -> Result<Option<String>, StorageError> {
    let query = match id {
        Some(id) => serde_qs::to_string(&RowFilter { id: format!("eq.{}", id), select }),
        None => serde_qs::to_string(&Columns { select }),
    };
    Ok(Some(query.context("encoding query failed")?))
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: RowId,
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    #[serde(skip)]
    table: &'a str,
    #[serde(flatten)]
    row: &'a Map<String, Value>,
}
impl Endpoint for InsertRow<'_> {
    const METHOD: &'static str = "POST";
    type Response = Vec<InsertedRow>;
    type Value = Option<RowId>;

    fn path(&self) -> String {
        self.table.to_owned()
    }

    fn query(&self) -> Result<Option<String>, StorageError> {
        row_query(None, "id")
    }

    fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("Prefer", "return=representation")]
    }

    fn extract(response: Self::Response) -> Self::Value {
        response.into_iter().next().map(|row| row.id)
    }
}

#[derive(Debug, Serialize)]
struct UpdateRow<'a> {
    #[serde(skip)]
    table: &'a str,
    #[serde(skip)]
    id: &'a RowId,
    #[serde(flatten)]
    changes: &'a Map<String, Value>,
}
impl Endpoint for UpdateRow<'_> {
    const METHOD: &'static str = "PATCH";
    type Response = Vec<IgnoredAny>;
    type Value = usize;

    fn path(&self) -> String {
        self.table.to_owned()
    }

    fn query(&self) -> Result<Option<String>, StorageError> {
        row_query(Some(self.id), "id")
    }

    fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("Prefer", "return=representation")]
    }

    fn extract(response: Self::Response) -> Self::Value {
        response.len()
    }
}

#[derive(Debug, Serialize)]
struct SelectColumn<'a> {
    #[serde(skip)]
    table: &'a str,
    #[serde(skip)]
    id: &'a RowId,
    #[serde(skip)]
    column: &'a str,
}
impl Endpoint for SelectColumn<'_> {
    const METHOD: &'static str = "GET";
    const BODY: bool = false;
    type Response = Map<String, Value>;
    type Value = Map<String, Value>;

    fn path(&self) -> String {
        self.table.to_owned()
    }

    fn query(&self) -> Result<Option<String>, StorageError> {
        row_query(Some(self.id), self.column)
    }

    fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("Accept", "application/vnd.pgrst.object+json")]
    }

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}
