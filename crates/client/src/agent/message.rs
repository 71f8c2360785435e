//! Page-to-agent messages and the agent lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use outpost_core::Record;

/// Messages the page controller posts to the agent.
///
/// Wire shape: `{"type": "CACHE_DATA", "data": {...record}}`, `{"type": "CLEAR_CACHE"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    CacheData(Record),
    ClearCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Uninstalled,
    Installing,
    Active,
    Updating,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Uninstalled => "uninstalled",
            AgentState::Installing => "installing",
            AgentState::Active => "active",
            AgentState::Updating => "updating",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
