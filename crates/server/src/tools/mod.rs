//! MCP tool implementations.
//!
//! This module contains all tools exposed by the outpost-agent server. Each
//! tool maps onto one page-controller operation.

pub mod agent;
pub mod cache;
pub mod compute;
pub mod records;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use outpost_core::Error;

pub use agent::{ConnectivitySetParams, NotificationsListParams, PushNotifyParams};
pub use cache::{CacheClearParams, CacheKeysParams, CacheMatchParams};
pub use compute::ComputeRunParams;
pub use records::{RecordRequeueParams, RecordSaveParams, RecordsListParams};

/// Render a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Parse the text content of a successful tool result back into JSON.
#[cfg(test)]
pub(crate) fn result_json(result: &CallToolResult) -> serde_json::Value {
    let content_val = serde_json::to_value(&result.content[0]).unwrap();
    let text = content_val
        .get("text")
        .and_then(|v| v.as_str())
        .expect("Expected text field in content");
    serde_json::from_str(text).unwrap()
}
