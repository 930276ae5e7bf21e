use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved field that keeps a trial from being saved when set to `true`.
pub const SKIP_SAVE: &str = "skip_save";

/// The data of one completed trial, as handed over by the experiment runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialData {
    pub trial_type: String,
    /// Milliseconds since the experiment started, at trial completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_elapsed: Option<i64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TrialData {
    pub fn new(trial_type: impl Into<String>) -> Self {
        TrialData {
            trial_type: trial_type.into(),
            time_elapsed: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_time_elapsed(mut self, time_elapsed: i64) -> Self {
        self.time_elapsed = Some(time_elapsed);
        self
    }

    /// Removes the skip flag if it is set to `true` and reports whether it was.
    ///
    /// A flag holding anything else is left in place.
    pub fn take_skip_save(&mut self) -> bool {
        if self.fields.get(SKIP_SAVE) == Some(&Value::Bool(true)) {
            self.fields.remove(SKIP_SAVE);
            true
        } else {
            false
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::TrialData;
    use serde_json::json;

    #[test]
    fn parse_runner_trial() {
        let trial = r#"
        {
            "trial_type": "html-keyboard-response",
            "time_elapsed": 5023,
            "rt": 412,
            "response": "f",
            "stimulus": "<p>left</p>"
        }
        "#;
        let parsed = serde_json::from_str::<TrialData>(trial).unwrap();
        assert_eq!(parsed.trial_type, "html-keyboard-response");
        assert_eq!(parsed.time_elapsed, Some(5023));
        assert_eq!(parsed.fields["rt"], json!(412));
        assert!(!parsed.fields.contains_key("trial_type"));
    }

    #[test]
    fn skip_flag_removed_only_when_true() {
        let mut skipped = TrialData::new("fixation").with_field("skip_save", true);
        assert!(skipped.take_skip_save());
        assert!(skipped.fields.is_empty());

        let mut kept = TrialData::new("fixation").with_field("skip_save", false);
        assert!(!kept.take_skip_save());
        assert_eq!(kept.fields["skip_save"], json!(false));
    }

    #[test]
    fn serializes_flat() {
        let trial = TrialData::new("survey")
            .with_time_elapsed(10)
            .with_field("answers", json!([1, 2]));
        assert_eq!(
            trial.to_value().unwrap(),
            json!({ "trial_type": "survey", "time_elapsed": 10, "answers": [1, 2] })
        );
    }
}
