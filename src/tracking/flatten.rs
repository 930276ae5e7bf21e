//! Firestore rejects arrays nested inside array elements, and every trial is
//! stored as an element of the `trials` array. Arrays inside a trial are
//! therefore rewritten into maps keyed by their index.

use serde_json::{Map, Value};

/// Replaces every array in `value`, at any depth, with an index-keyed map.
pub fn flatten_arrays(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), flatten_arrays(item)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, item)| (key, flatten_arrays(item)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::flatten_arrays;
    use serde_json::json;

    #[test]
    fn nested_arrays_become_maps() {
        let flattened = flatten_arrays(json!({ "a": [1, [2, 3]], "b": "x" }));
        assert_eq!(
            flattened,
            json!({ "a": { "0": 1, "1": { "0": 2, "1": 3 } }, "b": "x" })
        );
    }

    #[test]
    fn arrays_inside_objects() {
        let flattened = flatten_arrays(json!({
            "response": { "Q0": ["left", "right"], "Q1": { "grid": [[true], []] } }
        }));
        assert_eq!(
            flattened,
            json!({
                "response": {
                    "Q0": { "0": "left", "1": "right" },
                    "Q1": { "grid": { "0": { "0": true }, "1": {} } }
                }
            })
        );
    }

    #[test]
    fn scalars_pass_through() {
        for value in vec![json!(null), json!(true), json!(-4), json!(2.5), json!("text"), json!({})] {
            assert_eq!(flatten_arrays(value.clone()), value);
        }
    }
}
