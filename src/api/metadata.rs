use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields every new experiment record starts out with.
///
/// Captured once when a manager is constructed. Caller supplied fields win
/// over `date` and `time` when the names collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub date: String,
    pub time: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExperimentMetadata {
    /// Metadata stamped with the current local wall clock.
    pub fn capture(extra: Map<String, Value>) -> Self {
        Self::at(&Local::now(), extra)
    }

    pub fn at<Tz>(moment: &DateTime<Tz>, extra: Map<String, Value>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        ExperimentMetadata {
            date: moment.format("%Y-%m-%d").to_string(),
            time: moment.format("%H:%M:%S").to_string(),
            extra,
        }
    }

    /// The metadata as a flat record, ready to be merged with overrides.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("date".to_owned(), Value::String(self.date.clone()));
        record.insert("time".to_owned(), Value::String(self.time.clone()));
        for (key, value) in &self.extra {
            record.insert(key.clone(), value.clone());
        }
        record
    }
}
