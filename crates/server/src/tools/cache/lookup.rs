//! cache_match tool implementation.
//!
//! Looks up a request in a cache namespace without touching the network.

use std::collections::BTreeMap;

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_client::fetch::resolve;
use outpost_core::{CacheEntry, Error, RequestKey};

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_match tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheMatchParams {
    /// Path relative to the origin, or an absolute URL.
    pub url: String,

    /// HTTP method of the cached request (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Namespace to search. Defaults to the agent's active namespace.
    #[serde(default)]
    pub cache_name: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// A cache entry with its body rendered for display.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntryView {
    pub cache_name: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Body as text, when it is valid UTF-8.
    pub body_text: Option<String>,
    pub body_len: usize,
    pub stored_at: String,
}

impl From<CacheEntry> for CacheEntryView {
    fn from(entry: CacheEntry) -> Self {
        let body_len = entry.response.body.len();
        Self {
            cache_name: entry.cache_name,
            method: entry.key.method,
            url: entry.key.url,
            status: entry.response.status,
            headers: entry.response.headers,
            body_text: String::from_utf8(entry.response.body).ok(),
            body_len,
            stored_at: entry.stored_at,
        }
    }
}

/// Output from the cache_match tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheMatchOutput {
    pub hit: bool,
    pub entry: Option<CacheEntryView>,
}

/// Implementation of the cache_match tool.
pub async fn match_impl(state: &AppState, params: CacheMatchParams) -> Result<CallToolResult, McpError> {
    let url = resolve(&state.config.origin, &params.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    let cache_name = match params.cache_name {
        Some(name) => name,
        None => state.agent.status().await?.namespace,
    };

    let key = RequestKey::new(params.method, url.as_str());
    let entry = state.db.match_entry(&cache_name, &key).await?;
    tracing::debug!(cache = %cache_name, url = %key.url, hit = entry.is_some(), "cache_match");

    json_result(&CacheMatchOutput { hit: entry.is_some(), entry: entry.map(CacheEntryView::from) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::tools::result_json;
    use outpost_core::CachedResponse;

    #[tokio::test]
    async fn test_match_miss() {
        let state = test_state().await;
        let params = CacheMatchParams { url: "/nothing".into(), method: "GET".into(), cache_name: None };
        let output = result_json(&match_impl(&state, params).await.unwrap());
        assert_eq!(output["hit"], false);
        assert!(output["entry"].is_null());
    }

    #[tokio::test]
    async fn test_match_hit_in_active_namespace() {
        let state = test_state().await;
        let key = RequestKey::get("http://localhost:3000/worker.js");
        let response = CachedResponse::new(200, b"self.onmessage = () => {}".to_vec())
            .with_header("Content-Type", "application/javascript");
        state.db.put_entry("worker-app-v1", &key, &response).await.unwrap();

        let params = CacheMatchParams { url: "/worker.js".into(), method: "get".into(), cache_name: None };
        let output = result_json(&match_impl(&state, params).await.unwrap());

        assert_eq!(output["hit"], true);
        assert_eq!(output["entry"]["body_text"], "self.onmessage = () => {}");
        assert_eq!(output["entry"]["headers"]["content-type"], "application/javascript");
    }

    #[tokio::test]
    async fn test_match_binary_body() {
        let state = test_state().await;
        let key = RequestKey::get("http://localhost:3000/icon.png");
        state
            .db
            .put_entry("icons", &key, &CachedResponse::new(200, vec![0x89, 0x50, 0xff, 0x00]))
            .await
            .unwrap();

        let params = CacheMatchParams { url: "/icon.png".into(), method: "GET".into(), cache_name: Some("icons".into()) };
        let output = result_json(&match_impl(&state, params).await.unwrap());
        assert!(output["entry"]["body_text"].is_null());
        assert_eq!(output["entry"]["body_len"], 4);
    }

    #[tokio::test]
    async fn test_match_bad_url() {
        let state = test_state().await;
        let params = CacheMatchParams { url: "ftp://x/y".into(), method: "GET".into(), cache_name: None };
        assert!(match_impl(&state, params).await.is_err());
    }
}
