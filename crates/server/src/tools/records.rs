//! Record tools: save, list, replay and requeue.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_client::SyncCoordinator;
use outpost_core::{Error, QueuedRecord, Record};

use super::json_result;

/// Input parameters for record_save tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordSaveParams {
    /// Name shown in notifications. Must not be blank.
    pub name: String,
    pub message: String,
}

/// Input parameters for records_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordsListParams {
    /// "queue" (default) lists the local sync queue; "live" reads the live store.
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "queue".into()
}

/// Input parameters for record_requeue tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordRequeueParams {
    /// Id of a record in the failed state.
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RecordsListOutput {
    Queue { queued: Vec<QueuedRecord> },
    Live { records: Vec<Record> },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordRequeueOutput {
    pub id: i64,
    pub requeued: bool,
}

/// Implementation of the record_save tool.
pub async fn save_impl(coordinator: &SyncCoordinator, params: RecordSaveParams) -> Result<CallToolResult, McpError> {
    let record = Record::new(params.name, params.message);
    let queued = coordinator.persist(&record).await?;
    json_result(&queued)
}

/// Implementation of the records_list tool.
pub async fn list_impl(coordinator: &SyncCoordinator, params: RecordsListParams) -> Result<CallToolResult, McpError> {
    let output = match params.source.as_str() {
        "queue" => RecordsListOutput::Queue { queued: coordinator.queued().await? },
        "live" => RecordsListOutput::Live { records: coordinator.live_records().await? },
        other => return Err(Error::InvalidInput(format!("unsupported source: {other}")).into()),
    };
    json_result(&output)
}

/// Implementation of the sync_replay tool.
pub async fn replay_impl(coordinator: &SyncCoordinator) -> Result<CallToolResult, McpError> {
    let report = coordinator.replay_pending().await?;
    json_result(&report)
}

/// Implementation of the record_requeue tool.
pub async fn requeue_impl(
    coordinator: &SyncCoordinator, params: RecordRequeueParams,
) -> Result<CallToolResult, McpError> {
    let requeued = coordinator.requeue_failed(params.id).await?;
    json_result(&RecordRequeueOutput { id: params.id, requeued })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::tools::result_json;

    #[tokio::test]
    async fn test_save_online_is_synced() {
        let state = test_state().await;
        let params = RecordSaveParams { name: "A".into(), message: "hi".into() };

        let output = result_json(&save_impl(&state.coordinator, params).await.unwrap());
        assert_eq!(output["sync_state"], "synced");
        assert_eq!(output["payload"]["name"], "A");
    }

    #[tokio::test]
    async fn test_save_blank_name_rejected() {
        let state = test_state().await;
        let params = RecordSaveParams { name: "".into(), message: "hi".into() };
        let err = save_impl(&state.coordinator, params).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_offline_save_then_replay() {
        let state = test_state().await;
        state.coordinator.connectivity().set_online(false);

        let params = RecordSaveParams { name: "B".into(), message: "later".into() };
        let output = result_json(&save_impl(&state.coordinator, params).await.unwrap());
        assert_eq!(output["sync_state"], "pending");

        let live = result_json(&list_impl(&state.coordinator, RecordsListParams { source: "live".into() }).await.unwrap());
        assert!(live["records"].as_array().unwrap().is_empty());

        state.coordinator.connectivity().set_online(true);
        replay_impl(&state.coordinator).await.unwrap();

        let queue = result_json(&list_impl(&state.coordinator, RecordsListParams { source: "queue".into() }).await.unwrap());
        assert_eq!(queue["queued"][0]["sync_state"], "synced");
    }

    #[tokio::test]
    async fn test_replay_while_offline_errors() {
        let state = test_state().await;
        state.coordinator.connectivity().set_online(false);
        assert!(replay_impl(&state.coordinator).await.is_err());
    }

    #[tokio::test]
    async fn test_list_unknown_source() {
        let state = test_state().await;
        let params = RecordsListParams { source: "elsewhere".into() };
        assert!(list_impl(&state.coordinator, params).await.is_err());
    }

    #[tokio::test]
    async fn test_requeue_unknown_record() {
        let state = test_state().await;
        let output = result_json(&requeue_impl(&state.coordinator, RecordRequeueParams { id: 42 }).await.unwrap());
        assert_eq!(output["requeued"], false);
    }
}
