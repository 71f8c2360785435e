//! Online/offline state shared between the page controller and the agent.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity flag.
///
/// Clones observe the same state. The agent subscribes to learn about
/// offline -> online transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Returns true when this call restored connectivity.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.tx.send_replace(online);
        let restored = online && !was_online;
        if was_online != online {
            tracing::info!(online, "connectivity changed");
        }
        restored
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
