//! Query string serialization with nested maps and arrays
//!
//! Flat `serde_urlencoded` cannot express arrays or nested objects, which
//! list and filter endpoints use routinely. Parameters are instead taken as
//! JSON and flattened into bracketed keys (`filter[status]=open`), with
//! arrays written according to an [`ArrayFormat`].

use serde_json::Value;

use crate::{config::ArrayFormat, error::ApiError};

/// Appends `params` to the query string of `url`
///
/// `params` must be a JSON object (or `null`, which appends nothing). Null
/// values are skipped, so unset optional fields do not appear at all.
pub fn append_query(
    url: &mut reqwest::Url,
    params: &Value,
    format: ArrayFormat,
) -> Result<(), ApiError> {
    let pairs = flatten(params, format)?;
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(())
}

/// Flattens `params` into query pairs without encoding them
pub fn flatten(params: &Value, format: ArrayFormat) -> Result<Vec<(String, String)>, ApiError> {
    let mut pairs = Vec::new();
    match params {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                push_value(key.clone(), value, format, &mut pairs);
            }
        }
        _ => return Err(ApiError::InvalidParams),
    }
    Ok(pairs)
}

fn push_value(key: String, value: &Value, format: ArrayFormat, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((key, b.to_string())),
        Value::Number(n) => out.push((key, n.to_string())),
        Value::String(s) => out.push((key, s.clone())),
        Value::Object(map) => {
            for (child, value) in map {
                push_value(format!("{}[{}]", key, child), value, format, out);
            }
        }
        Value::Array(items) => push_array(key, items, format, out),
    }
}

fn push_array(key: String, items: &[Value], format: ArrayFormat, out: &mut Vec<(String, String)>) {
    match format {
        ArrayFormat::Comma if items.iter().all(is_scalar) => {
            let joined = items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(",");
            out.push((key, joined));
        }
        ArrayFormat::Brackets => {
            for item in items {
                push_value(format!("{}[]", key), item, format, out);
            }
        }
        ArrayFormat::Repeat => {
            for item in items {
                push_value(key.clone(), item, format, out);
            }
        }
        // Nested structures inside comma lists fall back to indices
        ArrayFormat::Indices | ArrayFormat::Comma => {
            for (idx, item) in items.iter().enumerate() {
                push_value(format!("{}[{}]", key, idx), item, format, out);
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pairs(params: Value, format: ArrayFormat) -> Vec<(String, String)> {
        flatten(&params, format).unwrap()
    }

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_owned(), value.to_owned())
    }

    #[test]
    fn scalars_are_written_plainly() {
        let params = json!({ "skipCount": 0, "sorting": "date desc", "archived": false });
        let mut result = pairs(params, ArrayFormat::Indices);
        result.sort();
        assert_eq!(
            result,
            vec![
                pair("archived", "false"),
                pair("skipCount", "0"),
                pair("sorting", "date desc"),
            ]
        );
    }

    #[test]
    fn nulls_are_skipped() {
        let params = json!({ "categoryId": null, "maxResultCount": 20 });
        assert_eq!(
            pairs(params, ArrayFormat::Indices),
            vec![pair("maxResultCount", "20")]
        );
    }

    #[test]
    fn arrays_follow_the_configured_format() {
        let params = json!({ "ids": [3, 5] });

        assert_eq!(
            pairs(params.clone(), ArrayFormat::Indices),
            vec![pair("ids[0]", "3"), pair("ids[1]", "5")]
        );
        assert_eq!(
            pairs(params.clone(), ArrayFormat::Brackets),
            vec![pair("ids[]", "3"), pair("ids[]", "5")]
        );
        assert_eq!(
            pairs(params.clone(), ArrayFormat::Repeat),
            vec![pair("ids", "3"), pair("ids", "5")]
        );
        assert_eq!(
            pairs(params, ArrayFormat::Comma),
            vec![pair("ids", "3,5")]
        );
    }

    #[test]
    fn nested_objects_use_bracketed_keys() {
        let params = json!({ "filter": { "range": { "from": "2024-01" } } });
        assert_eq!(
            pairs(params, ArrayFormat::Indices),
            vec![pair("filter[range][from]", "2024-01")]
        );
    }

    #[test]
    fn non_map_parameters_are_rejected() {
        let error = flatten(&json!([1, 2]), ArrayFormat::Indices).unwrap_err();
        assert!(matches!(error, ApiError::InvalidParams));
    }

    #[test]
    fn pairs_are_percent_encoded_into_the_url() {
        let mut url: reqwest::Url = "https://admin.example.com/api/app/lottery".parse().unwrap();
        append_query(&mut url, &json!({ "ids": [1] }), ArrayFormat::Indices).unwrap();
        assert_eq!(url.query(), Some("ids%5B0%5D=1"));
    }
}
