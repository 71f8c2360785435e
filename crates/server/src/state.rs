//! Runtime wiring shared by every tool call.

use std::sync::Arc;

use outpost_client::{
    AgentHandle, Connectivity, FetchClient, FetchConfig, HttpLiveStore, LiveStore, MemoryLiveStore, MemoryNotifier,
    Network, Replayer, ServiceAgent, SyncCoordinator,
};
use outpost_core::{AppConfig, CacheDb, Error};

/// The agent, its collaborators and the page-side coordinator.
pub struct AppState {
    pub config: AppConfig,
    pub db: CacheDb,
    pub agent: AgentHandle,
    pub coordinator: SyncCoordinator,
    pub notifier: Arc<MemoryNotifier>,
}

impl AppState {
    /// Open storage, pick the live path and spawn the agent.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: AppConfig) -> Result<Self, Error> {
        let db = CacheDb::open_with_config(&config).await?;
        let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from_app(&config))?);

        let live: Arc<dyn LiveStore> = match &config.api_base_url {
            Some(base_url) => {
                let store = HttpLiveStore::new(base_url, &config.user_agent, config.timeout())?;
                tracing::info!(url = %store.data_url(), "using HTTP live store");
                Arc::new(store)
            }
            None => {
                tracing::info!("no api_base_url configured, using in-process live store");
                Arc::new(MemoryLiveStore::new())
            }
        };

        let notifier = Arc::new(MemoryNotifier::new());
        let replayer = Arc::new(Replayer::new(
            db.clone(),
            live,
            notifier.clone(),
            Connectivity::new(true),
            config.retry.clone(),
        ));
        let agent = ServiceAgent::new(&config, db.clone(), network, notifier.clone(), replayer.clone()).spawn();
        let coordinator = SyncCoordinator::new(agent.clone(), replayer, config.timeout());

        Ok(Self { config, db, agent, coordinator, notifier })
    }
}
