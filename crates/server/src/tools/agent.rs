//! Agent tools: connectivity, push delivery, notifications and status.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_client::{AgentStatus, Notification};

use super::json_result;
use crate::state::AppState;

/// Input parameters for connectivity_set tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectivitySetParams {
    /// New connectivity state. Going from offline to online triggers a replay.
    pub online: bool,
}

/// Input parameters for push_notify tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushNotifyParams {
    /// Raw push body, normally JSON `{"title": ..., "message": ...}`.
    /// Omit to simulate a push without a payload.
    #[serde(default)]
    pub payload: Option<String>,
}

/// Input parameters for notifications_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationsListParams {
    /// Remove returned notifications from the buffer (default: false).
    #[serde(default)]
    pub drain: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivitySetOutput {
    pub online: bool,
    /// True when this call restored connectivity.
    pub restored: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationsListOutput {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusOutput {
    #[serde(flatten)]
    pub agent: AgentStatus,
    pub pending_records: u64,
    pub namespaces: Vec<String>,
}

/// Implementation of the connectivity_set tool.
pub async fn connectivity_impl(state: &AppState, params: ConnectivitySetParams) -> Result<CallToolResult, McpError> {
    let restored = state.coordinator.connectivity().set_online(params.online);
    json_result(&ConnectivitySetOutput { online: params.online, restored })
}

/// Implementation of the push_notify tool.
pub async fn push_impl(state: &AppState, params: PushNotifyParams) -> Result<CallToolResult, McpError> {
    let notification = state.agent.push(params.payload.map(String::into_bytes)).await?;
    json_result(&notification)
}

/// Implementation of the notifications_list tool.
pub async fn notifications_impl(state: &AppState, params: NotificationsListParams) -> Result<CallToolResult, McpError> {
    let notifications =
        if params.drain { state.notifier.drain().await } else { state.notifier.snapshot().await };
    json_result(&NotificationsListOutput { notifications })
}

/// Implementation of the agent_status tool.
pub async fn status_impl(state: &AppState) -> Result<CallToolResult, McpError> {
    let agent = state.agent.status().await?;
    let pending_records = state.db.pending_count().await?;
    let namespaces = state.db.namespace_names().await?;
    json_result(&AgentStatusOutput { agent, pending_records, namespaces })
}
