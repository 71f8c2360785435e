//! Runtime capability switches.

use serde::{Deserialize, Serialize};

/// Capabilities resolved once at startup and injected into the runtime.
///
/// Each switch disables one optional surface instead of probing for it at the
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Compute jobs may run on a dedicated worker thread.
    #[serde(default = "default_true")]
    pub has_background_execution: bool,

    /// Cache namespaces and the sync queue live in the on-disk database.
    /// When false they live in an in-memory database for the process lifetime.
    #[serde(default = "default_true")]
    pub has_persistent_cache: bool,

    /// Push payloads are turned into notifications.
    #[serde(default = "default_true")]
    pub has_push_channel: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { has_background_execution: true, has_persistent_cache: true, has_push_channel: true }
    }
}
