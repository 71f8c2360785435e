//! cache_clear tool implementation.
//!
//! Without a name this posts CLEAR_CACHE to the agent, which drops its active
//! namespace. With a name the namespace is deleted directly.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_client::AgentMessage;

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearParams {
    /// Namespace to delete. Defaults to the agent's active namespace.
    #[serde(default)]
    pub cache_name: Option<String>,
}

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    pub cache_name: String,
    /// Whether the namespace existed before the call.
    pub existed: bool,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(state: &AppState, params: CacheClearParams) -> Result<CallToolResult, McpError> {
    let output = match params.cache_name {
        Some(cache_name) => {
            let existed = state.db.delete_namespace(&cache_name).await?;
            CacheClearOutput { cache_name, existed }
        }
        None => {
            let cache_name = state.agent.status().await?.namespace;
            let existed = state.db.has_namespace(&cache_name).await?;
            state.agent.post(AgentMessage::ClearCache).await?;
            CacheClearOutput { cache_name, existed }
        }
    };
    tracing::info!(cache = %output.cache_name, existed = output.existed, "cache_clear");
    json_result(&output)
}
