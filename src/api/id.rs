use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// DOCUMENTS

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_owned())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ROWS

/// Primary key of an experiment row.
///
/// Tables may use serial integers or uuids, so both JSON numbers and strings
/// are accepted when reading it back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RowId(String);

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::api::str_or_int::deserialize(deserializer).map(RowId)
    }
}

impl AsRef<str> for RowId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId(id.to_owned())
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::RowId;

    #[test]
    fn row_id_from_integer_or_string() {
        let numeric = serde_json::from_str::<RowId>("42").unwrap();
        assert_eq!(numeric.as_ref(), "42");

        let uuid = serde_json::from_str::<RowId>(r#""5f0c6a1e-1d7b-4c3e-9a43-2b1d0e6f7a88""#).unwrap();
        assert_eq!(uuid.as_ref(), "5f0c6a1e-1d7b-4c3e-9a43-2b1d0e6f7a88");
    }

    #[test]
    fn row_id_rejects_other_shapes() {
        assert!(serde_json::from_str::<RowId>("[1]").is_err());
    }
}
