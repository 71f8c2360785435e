//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the agent, the coordinator and the compute worker.
use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::state::AppState;
use crate::tools::{
    CacheClearParams, CacheKeysParams, CacheMatchParams, ComputeRunParams, ConnectivitySetParams,
    NotificationsListParams, PushNotifyParams, RecordRequeueParams, RecordSaveParams, RecordsListParams, agent, cache,
    compute, records,
};

/// The main MCP server handler for outpost-agent.
#[derive(Clone)]
pub struct OutpostServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
#[tool_router]
impl OutpostServer {
    /// Create a new server handler over shared runtime state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    /// Run the trigonometric workload on a fresh background worker.
    ///
    /// Progress is reported in whole percent; the final message is COMPLETE or ERROR.
    #[tool(
        description = "Run a CPU-heavy job on a background worker. Returns the COMPLETE summary or the ERROR reason, plus progress counts."
    )]
    async fn compute_run(&self, params: Parameters<ComputeRunParams>) -> Result<CallToolResult, McpError> {
        compute::compute_impl(&self.state.config, params.0).await
    }

    #[tool(
        description = "Save a record. Writes to the live store when online, caches it through the agent and queues it for replay when the write fails."
    )]
    async fn record_save(&self, params: Parameters<RecordSaveParams>) -> Result<CallToolResult, McpError> {
        records::save_impl(&self.state.coordinator, params.0).await
    }

    #[tool(description = "List records from the local sync queue (source=queue) or the live store (source=live).")]
    async fn records_list(&self, params: Parameters<RecordsListParams>) -> Result<CallToolResult, McpError> {
        records::list_impl(&self.state.coordinator, params.0).await
    }

    /// Trigger the background-sync replay now.
    #[tool(description = "Replay pending records to the live store. Fails while offline.")]
    async fn sync_replay(&self) -> Result<CallToolResult, McpError> {
        records::replay_impl(&self.state.coordinator).await
    }

    #[tool(description = "Move a failed record back to pending so the next replay retries it.")]
    async fn record_requeue(&self, params: Parameters<RecordRequeueParams>) -> Result<CallToolResult, McpError> {
        records::requeue_impl(&self.state.coordinator, params.0).await
    }

    #[tool(description = "Set simulated connectivity. Going from offline to online triggers a replay.")]
    async fn connectivity_set(&self, params: Parameters<ConnectivitySetParams>) -> Result<CallToolResult, McpError> {
        agent::connectivity_impl(&self.state, params.0).await
    }

    /// Look up a cached response without touching the network.
    #[tool(description = "Look up a request in a cache namespace. Defaults to the agent's active namespace.")]
    async fn cache_match(&self, params: Parameters<CacheMatchParams>) -> Result<CallToolResult, McpError> {
        cache::match_impl(&self.state, params.0).await
    }

    #[tool(description = "List cache namespaces, or the request keys stored in one namespace.")]
    async fn cache_keys(&self, params: Parameters<CacheKeysParams>) -> Result<CallToolResult, McpError> {
        cache::keys_impl(&self.state, params.0).await
    }

    #[tool(description = "Delete a cache namespace. Without a name, sends CLEAR_CACHE to the agent.")]
    async fn cache_clear(&self, params: Parameters<CacheClearParams>) -> Result<CallToolResult, McpError> {
        cache::clear_impl(&self.state, params.0).await
    }

    #[tool(description = "Deliver a push message to the agent and return the notification it raised.")]
    async fn push_notify(&self, params: Parameters<PushNotifyParams>) -> Result<CallToolResult, McpError> {
        agent::push_impl(&self.state, params.0).await
    }

    #[tool(description = "List notifications raised so far. Set drain=true to clear them.")]
    async fn notifications_list(&self, params: Parameters<NotificationsListParams>) -> Result<CallToolResult, McpError> {
        agent::notifications_impl(&self.state, params.0).await
    }

    #[tool(description = "Report agent lifecycle state, active namespace, connectivity and pending record count.")]
    async fn agent_status(&self) -> Result<CallToolResult, McpError> {
        agent::status_impl(&self.state).await
    }
}

impl ServerHandler for OutpostServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "outpost-agent".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
