//! Conversion of plain JSON into Firestore's typed value representation.

use serde_json::{json, Map, Value};

/// Encodes every field of a document.
pub fn encode_fields(document: &Map<String, Value>) -> Map<String, Value> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), encode(value)))
        .collect()
}

pub fn encode(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // 64 bit integers travel as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

#[cfg(test)]
mod tests {
    use super::encode;
    use serde_json::json;

    #[test]
    fn encodes_scalars() {
        assert_eq!(encode(&json!(null)), json!({ "nullValue": null }));
        assert_eq!(encode(&json!(true)), json!({ "booleanValue": true }));
        assert_eq!(encode(&json!(412)), json!({ "integerValue": "412" }));
        assert_eq!(encode(&json!(0.5)), json!({ "doubleValue": 0.5 }));
        assert_eq!(encode(&json!("f")), json!({ "stringValue": "f" }));
    }

    #[test]
    fn encodes_trial_element() {
        let encoded = encode(&json!({ "trial_type": "rt", "resp": { "0": 1 } }));
        assert_eq!(
            encoded,
            json!({
                "mapValue": { "fields": {
                    "trial_type": { "stringValue": "rt" },
                    "resp": { "mapValue": { "fields": { "0": { "integerValue": "1" } } } }
                } }
            })
        );
    }

    #[test]
    fn encodes_top_level_trial_list() {
        assert_eq!(
            encode(&json!([])),
            json!({ "arrayValue": { "values": [] } })
        );
    }
}
