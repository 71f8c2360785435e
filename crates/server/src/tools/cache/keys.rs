//! cache_keys tool implementation.
//!
//! Lists namespaces, or the request keys stored in one namespace.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_core::RequestKey;

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_keys tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheKeysParams {
    /// Namespace to list. When omitted, lists namespace names instead.
    #[serde(default)]
    pub cache_name: Option<String>,
}

/// Output from the cache_keys tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CacheKeysOutput {
    Namespaces { namespaces: Vec<String> },
    Entries { cache_name: String, keys: Vec<RequestKey> },
}

/// Implementation of the cache_keys tool.
pub async fn keys_impl(state: &AppState, params: CacheKeysParams) -> Result<CallToolResult, McpError> {
    let output = match params.cache_name {
        None => CacheKeysOutput::Namespaces { namespaces: state.db.namespace_names().await? },
        Some(cache_name) => {
            let keys = state.db.entries(&cache_name).await?.into_iter().map(|e| e.key).collect();
            CacheKeysOutput::Entries { cache_name, keys }
        }
    };
    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::tools::result_json;
    use outpost_core::CachedResponse;

    #[tokio::test]
    async fn test_keys_lists_namespaces_and_entries() {
        let state = test_state().await;
        state.db.open_namespace("cacheA").await.unwrap();
        state
            .db
            .put_entry("cacheB", &RequestKey::get("http://localhost:3000/x"), &CachedResponse::new(200, b"x".to_vec()))
            .await
            .unwrap();

        let output = result_json(&keys_impl(&state, CacheKeysParams { cache_name: None }).await.unwrap());
        assert_eq!(output["namespaces"], serde_json::json!(["cacheA", "cacheB"]));

        let params = CacheKeysParams { cache_name: Some("cacheB".into()) };
        let output = result_json(&keys_impl(&state, params).await.unwrap());
        assert_eq!(output["keys"][0]["url"], "http://localhost:3000/x");
        assert_eq!(output["keys"][0]["method"], "GET");
    }

    #[tokio::test]
    async fn test_keys_of_missing_namespace_is_empty() {
        let state = test_state().await;
        let params = CacheKeysParams { cache_name: Some("nope".into()) };
        let output = result_json(&keys_impl(&state, params).await.unwrap());
        assert!(output["keys"].as_array().unwrap().is_empty());
    }
}
