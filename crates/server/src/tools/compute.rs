//! compute_run tool implementation.
//!
//! Starts a fresh compute worker, follows its message stream to the end and
//! reports what the page controller would have seen.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_client::{ComputeWorker, JobEvent, WorkerCommand, WorkerMessage};
use outpost_core::AppConfig;

use super::json_result;

/// Input parameters for compute_run tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComputeRunParams {
    /// Number of iterations to run. Must be positive.
    pub iterations: i64,

    /// Include every PROGRESS message in the output (default: false).
    #[serde(default)]
    pub include_progress: bool,
}

/// Output structure for compute_run tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComputeRunOutput {
    pub job_id: u64,
    /// "complete" or "error".
    pub status: String,
    /// COMPLETE summary, when the job succeeded.
    pub result: Option<String>,
    /// ERROR reason, when the job failed.
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
    /// Number of PROGRESS messages received.
    pub progress_updates: usize,
    /// Wire messages in order, if requested.
    #[schemars(skip)]
    pub messages: Option<Vec<WorkerMessage>>,
}

/// Implementation of the compute_run tool.
pub async fn compute_impl(config: &AppConfig, params: ComputeRunParams) -> Result<CallToolResult, McpError> {
    let worker = ComputeWorker::from_config(config);
    let mut handle = worker.dispatch(WorkerCommand::StartProcessing { iterations: params.iterations })?;
    let job_id = handle.job().id;

    let mut output = ComputeRunOutput {
        job_id,
        status: "error".into(),
        result: None,
        error: None,
        elapsed_ms: None,
        progress_updates: 0,
        messages: params.include_progress.then(Vec::new),
    };

    while let Some(event) = handle.next_event().await {
        if let Some(messages) = output.messages.as_mut() {
            messages.push(event.to_message());
        }
        match event {
            JobEvent::Progress { .. } => output.progress_updates += 1,
            JobEvent::Completed(result) => {
                output.status = "complete".into();
                output.elapsed_ms = Some(result.elapsed_ms);
                output.result = Some(result.summary());
            }
            JobEvent::Failed(failure) => output.error = Some(failure.reason),
        }
    }

    if output.result.is_none() && output.error.is_none() {
        output.error = Some(format!("job {job_id} ended without a result"));
    }

    tracing::info!(job_id, status = %output.status, "compute job finished");
    json_result(&output)
}
