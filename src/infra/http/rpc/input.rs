use serde::Deserialize;
use serde_json::Value;

use crate::application::procedures::ProcedureError;

/// Most calls a single batch request may carry.
pub const MAX_BATCH_CALLS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    Get,
    Post,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RpcQuery {
    pub batch: Option<String>,
    pub input: Option<String>,
}

impl RpcQuery {
    pub fn is_batch(&self) -> bool {
        matches!(self.batch.as_deref(), Some("1" | "true"))
    }
}

/// One procedure invocation decoded from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub path: String,
    pub input: Value,
}

/// Decode the raw input of a request (query string or body) into JSON.
///
/// An absent or empty input is `null`, which procedures without parameters accept.
pub fn decode_raw_input(raw: Option<&str>) -> Result<Value, ProcedureError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|err| ProcedureError::parse(format!("Input is not valid JSON: {err}"))),
    }
}

/// Split a request into its calls.
pub fn split_calls(paths: &str, batch: bool, input: Value) -> Result<Vec<RpcCall>, ProcedureError> {
    if !batch {
        return Ok(vec![RpcCall {
            path: paths.to_string(),
            input,
        }]);
    }

    let call_count = paths.split(',').count();
    if call_count > MAX_BATCH_CALLS {
        return Err(ProcedureError::parse(format!(
            "Batch carries {call_count} calls, at most {MAX_BATCH_CALLS} are allowed"
        )));
    }

    let mut inputs = match input {
        Value::Null => serde_json::Map::new(),
        Value::Object(map) => map,
        _ => {
            return Err(ProcedureError::parse(
                "Batch input must be an object keyed by call index",
            ));
        }
    };

    Ok(paths
        .split(',')
        .enumerate()
        .map(|(index, path)| RpcCall {
            path: path.trim().to_string(),
            input: inputs.remove(&index.to_string()).unwrap_or(Value::Null),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_api_types::ErrorCode;
    use serde_json::json;

    #[test]
    fn empty_input_decodes_to_null() {
        assert_eq!(decode_raw_input(None).expect("null"), Value::Null);
        assert_eq!(decode_raw_input(Some("  ")).expect("null"), Value::Null);
        assert_eq!(
            decode_raw_input(Some(r#"{"id":"abc"}"#)).expect("object"),
            json!({"id": "abc"})
        );
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        let err = decode_raw_input(Some("{not json")).expect_err("parse error");
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn batch_inputs_are_matched_by_position() {
        let calls = split_calls(
            "posts.getAll,posts.getById",
            true,
            json!({"1": {"id": "abc"}}),
        )
        .expect("calls");
        assert_eq!(
            calls,
            vec![
                RpcCall {
                    path: "posts.getAll".to_string(),
                    input: Value::Null,
                },
                RpcCall {
                    path: "posts.getById".to_string(),
                    input: json!({"id": "abc"}),
                },
            ]
        );
    }

    #[test]
    fn batch_input_must_be_an_object() {
        let err = split_calls("posts.getAll", true, json!([1])).expect_err("array input");
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn oversized_batch_is_a_parse_error() {
        let paths = vec!["posts.getAll"; MAX_BATCH_CALLS].join(",");
        let calls = split_calls(&paths, true, Value::Null).expect("at the cap");
        assert_eq!(calls.len(), MAX_BATCH_CALLS);

        let paths = vec!["posts.getAll"; MAX_BATCH_CALLS + 1].join(",");
        let err = split_calls(&paths, true, Value::Null).expect_err("over the cap");
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn batch_flag_accepts_one_or_true() {
        let query = |batch: &str| RpcQuery {
            batch: Some(batch.to_string()),
            input: None,
        };
        assert!(query("1").is_batch());
        assert!(query("true").is_batch());
        assert!(!query("0").is_batch());
        assert!(!RpcQuery::default().is_batch());
    }
}
