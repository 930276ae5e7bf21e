//! Connection settings for the HTTP backends, usually read from the environment.

use crate::backend::{
    firestore::{self, Firestore},
    postgrest::PostgRest,
};
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    firestore::DEFAULT_DATABASE.to_owned()
}

impl FirestoreConfig {
    /// Reads `FIRESTORE_PROJECT_ID`, `FIRESTORE_API_KEY` and the optional
    /// `FIRESTORE_DATABASE`.
    pub fn from_env() -> Result<Self> {
        Ok(FirestoreConfig {
            project_id: required("FIRESTORE_PROJECT_ID")?,
            api_key: required("FIRESTORE_API_KEY")?,
            database: std::env::var("FIRESTORE_DATABASE").unwrap_or_else(|_| default_database()),
        })
    }

    pub fn connect(&self) -> Firestore {
        Firestore::new(&self.project_id, &self.api_key).with_database(&self.database)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgRestConfig {
    pub url: String,
    pub api_key: String,
}

impl PostgRestConfig {
    /// Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(PostgRestConfig {
            url: required("SUPABASE_URL")?,
            api_key: required("SUPABASE_ANON_KEY")?,
        })
    }

    pub fn connect(&self) -> PostgRest {
        PostgRest::new(&self.url, &self.api_key)
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("environment variable {} is not set", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_firestore_config() {
        let config = r#"{ "project_id": "lab-study", "api_key": "AIza-test" }"#;
        let parsed = serde_json::from_str::<FirestoreConfig>(config).unwrap();
        assert_eq!(parsed.database, "(default)");
    }

    #[test]
    fn missing_variable_is_named() {
        let error = required("TRIALSINK_TEST_SURELY_UNSET").unwrap_err();
        assert!(error.to_string().contains("TRIALSINK_TEST_SURELY_UNSET"));
    }
}
