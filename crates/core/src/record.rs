//! Records written by the page controller and their sync bookkeeping.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::Error;

static LAST_RECORD_ID: AtomicI64 = AtomicI64::new(0);

/// A user record destined for the live persistence API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub message: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl Record {
    /// Create a record stamped with the current time.
    ///
    /// Ids are millisecond timestamps, bumped when two records land in the
    /// same millisecond so they stay unique within the process.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        let millis = now.timestamp_millis();
        let id = match LAST_RECORD_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(millis.max(last + 1)))
        {
            Ok(last) | Err(last) => millis.max(last + 1),
        };

        Self { id, name: name.into(), message: message.into(), timestamp: now.to_rfc3339() }
    }

    /// Check the fields a caller controls.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("record name cannot be empty".into()));
        }
        Ok(())
    }
}

/// Where a queued record stands with respect to the live path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncState::Pending),
            "synced" => Ok(SyncState::Synced),
            "failed" => Ok(SyncState::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync state: {other}"))),
        }
    }
}

/// A record in the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueuedRecord {
    pub id: i64,
    pub payload: Record,
    pub created_at: String,
    pub sync_state: SyncState,
    /// Live attempts made during replays.
    pub attempts: u32,
    pub last_error: Option<String>,
}
