//! Wire messages exchanged between the page controller and a compute worker.
//!
//! ```text
//! page  -> worker  {"type": "START_PROCESSING", "data": {"iterations": 1000000}}
//! worker -> page   {"type": "PROGRESS", "progress": 42}
//! worker -> page   {"type": "COMPLETE", "result": "Computed ..."}
//! worker -> page   {"type": "ERROR", "error": "..."}
//! ```

use serde::{Deserialize, Serialize};

/// Commands accepted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    StartProcessing { iterations: i64 },
}

/// Messages emitted by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    Progress { progress: u8 },
    Complete { result: String },
    Error { error: String },
}

impl WorkerMessage {
    /// COMPLETE and ERROR end a job's stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress { .. })
    }
}
