//! Fakes and fixtures shared by the agent and sync tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use outpost_core::{AppConfig, CacheDb, Error, Record, SyncState};

use crate::agent::{AgentHandle, ServiceAgent};
use crate::connectivity::Connectivity;
use crate::fetch::{FetchRequest, FetchResponse, Network, ResponseSource};
use crate::live::MemoryLiveStore;
use crate::notify::MemoryNotifier;
use crate::sync::{Replayer, SyncCoordinator};

/// Network that answers from a path table; unknown paths are 404.
pub(crate) struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: AtomicUsize,
    reachable: AtomicBool,
    delay_ms: AtomicU64,
}

impl FakeNetwork {
    /// Serves the default manifest: `/`, `/worker.js`, `/manifest.json`.
    pub fn with_default_manifest() -> Self {
        let network = Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
        };
        for path in ["/", "/worker.js", "/manifest.json"] {
            network.route(path, 200, format!("{path} body").as_bytes());
        }
        network
    }

    pub fn route(&self, path: &str, status: u16, body: &[u8]) {
        self.routes.lock().unwrap().insert(path.to_string(), (status, body.to_vec()));
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Hold every later fetch for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable(format!("{} unreachable", request.url)));
        }

        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| (404, b"not found".to_vec()));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        Ok(FetchResponse {
            url: request.url.clone(),
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            bytes: Bytes::from(body),
            source: ResponseSource::Network,
            fetch_ms: 0,
        })
    }
}

/// Millisecond backoff and a retry tick that never fires during a test.
pub(crate) fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.replay_interval_ms = 600_000;
    config
}

/// A running agent wired to in-memory collaborators.
pub(crate) struct Harness {
    pub config: AppConfig,
    pub db: CacheDb,
    pub network: Arc<FakeNetwork>,
    pub live: Arc<MemoryLiveStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub connectivity: Connectivity,
    pub replayer: Arc<Replayer>,
    pub agent: AgentHandle,
}

impl Harness {
    pub async fn start(config: AppConfig) -> Self {
        Self::build(config, true).await
    }

    pub async fn start_offline(config: AppConfig) -> Self {
        Self::build(config, false).await
    }

    async fn build(config: AppConfig, online: bool) -> Self {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::with_default_manifest());
        let live = Arc::new(MemoryLiveStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let connectivity = Connectivity::new(online);
        let replayer = Arc::new(Replayer::new(
            db.clone(),
            live.clone(),
            notifier.clone(),
            connectivity.clone(),
            config.retry.clone(),
        ));
        let agent = ServiceAgent::new(&config, db.clone(), network.clone(), notifier.clone(), replayer.clone()).spawn();

        Self { config, db, network, live, notifier, connectivity, replayer, agent }
    }

    pub fn coordinator(&self) -> SyncCoordinator {
        SyncCoordinator::new(self.agent.clone(), self.replayer.clone(), self.config.timeout())
    }

    pub async fn live_records(&self) -> Vec<Record> {
        use crate::live::LiveStore;
        self.live.list().await.unwrap()
    }

    /// Poll the queue until record `id` reaches `state`, failing after 5s.
    pub async fn wait_for_state(&self, id: i64, state: SyncState) {
        let db = self.db.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                if let Some(queued) = db.queued_record(id).await.unwrap()
                    && queued.sync_state == state
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("record {id} never reached {state}"));
    }
}
