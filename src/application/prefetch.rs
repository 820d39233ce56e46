//! Server-side query prefetching and the dehydrated state handed to the browser.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::procedures::{Procedure, ProcedureError, ProcedureRouter};

/// A query result as embedded into a rendered page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQuery {
    /// `[procedure path, input]`
    pub query_key: (String, Value),
    pub state: DehydratedQueryState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQueryState {
    pub data: Value,
    /// Unix milliseconds.
    pub data_updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DehydratedState {
    pub queries: Vec<DehydratedQuery>,
}

impl DehydratedState {
    /// Serialize for an inline `<script type="application/json">` element.
    ///
    /// `<`, `>` and `&` are escaped so user content cannot close the element.
    pub fn to_script_json(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{\"queries\":[]}".to_string());
        let mut escaped = String::with_capacity(json.len());
        for ch in json.chars() {
            match ch {
                '<' => escaped.push_str("\\u003c"),
                '>' => escaped.push_str("\\u003e"),
                '&' => escaped.push_str("\\u0026"),
                '\u{2028}' => escaped.push_str("\\u2028"),
                '\u{2029}' => escaped.push_str("\\u2029"),
                other => escaped.push(other),
            }
        }
        escaped
    }

    pub fn find(&self, path: &str, input: &Value) -> Option<&DehydratedQuery> {
        self.queries
            .iter()
            .find(|query| query.query_key.0 == path && &query.query_key.1 == input)
    }
}

/// Runs queries ahead of a render and remembers their results for dehydration.
pub struct PrefetchHelper {
    router: ProcedureRouter,
    queries: Vec<DehydratedQuery>,
}

impl PrefetchHelper {
    pub fn new(router: ProcedureRouter) -> Self {
        Self {
            router,
            queries: Vec::new(),
        }
    }

    /// Run `procedure` and record its result. Failures are returned and not recorded.
    pub async fn prefetch(
        &mut self,
        procedure: Procedure,
        input: Value,
    ) -> Result<Value, ProcedureError> {
        let cached = self.router.query(procedure, input.clone()).await?;
        let data_updated_at =
            i64::try_from(cached.updated_at.unix_timestamp_nanos() / 1_000_000).unwrap_or(0);

        self.queries
            .retain(|query| !(query.query_key.0 == procedure.path() && query.query_key.1 == input));
        self.queries.push(DehydratedQuery {
            query_key: (procedure.path().to_string(), input),
            state: DehydratedQueryState {
                data: cached.data.clone(),
                data_updated_at,
            },
        });
        Ok(cached.data)
    }

    /// [`PrefetchHelper::prefetch`] with the result decoded for the template.
    pub async fn fetch<T: DeserializeOwned>(
        &mut self,
        procedure: Procedure,
        input: Value,
    ) -> Result<T, ProcedureError> {
        let data = self.prefetch(procedure, input).await?;
        serde_json::from_value(data).map_err(|err| ProcedureError::internal(err.to_string()))
    }

    pub fn dehydrate(&self) -> DehydratedState {
        DehydratedState {
            queries: self.queries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dehydrated_state_uses_query_key_tuples() {
        let state = DehydratedState {
            queries: vec![DehydratedQuery {
                query_key: ("posts.getById".to_string(), json!({"id": "abc"})),
                state: DehydratedQueryState {
                    data: json!({"post": {"content": "hi"}}),
                    data_updated_at: 1_700_000_000_000,
                },
            }],
        };

        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["queries"][0]["queryKey"], json!(["posts.getById", {"id": "abc"}]));
        assert_eq!(value["queries"][0]["state"]["dataUpdatedAt"], json!(1_700_000_000_000i64));
        assert!(state.find("posts.getById", &json!({"id": "abc"})).is_some());
        assert!(state.find("posts.getById", &json!({"id": "xyz"})).is_none());
    }

    #[test]
    fn script_json_cannot_close_the_script_element() {
        let state = DehydratedState {
            queries: vec![DehydratedQuery {
                query_key: ("posts.getAll".to_string(), Value::Null),
                state: DehydratedQueryState {
                    data: json!("</script><script>alert(1)</script>"),
                    data_updated_at: 0,
                },
            }],
        };

        let script = state.to_script_json();
        assert!(!script.contains("</script>"));
        let decoded: DehydratedState = serde_json::from_str(&script).expect("still valid json");
        assert_eq!(decoded, state);
    }
}
