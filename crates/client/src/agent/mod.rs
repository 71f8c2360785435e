//! Service agent: the long-lived background controller.
//!
//! ### Lifecycle
//! `Uninstalled -> Installing -> Active -> (Updating -> Active)*`. Install
//! precaches the manifest into a staging namespace and merges it into
//! `{cache_name}-v{version}` only once every resource is in; any resource that
//! fails to fetch fails the install and only the staging namespace is dropped.
//!
//! ### Actor
//! The agent owns its state and reads one inbound queue of `AgentEvent`s.
//! Replies go back on per-request oneshot channels. Precaching, fetches and
//! replays run on spawned tasks so a slow network never stalls the queue;
//! precache outcomes come back to the actor as `Staged` values.
//!
//! ### Reconciliation
//! A `background-sync` signal runs one replay. The agent raises that signal
//! itself on every offline -> online transition, and a periodic tick retries
//! while online with records still pending. Replays are serialized by the
//! `Replayer`.

pub mod manifest;
pub mod message;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use outpost_core::{AppConfig, CacheDb, CachedResponse, Error, Record, RequestKey};

use crate::fetch::{FetchRequest, FetchResponse, Network, resolve};
use crate::notify::{Notification, NotificationChannel};
use crate::sync::{ReplayReport, Replayer};

pub use manifest::CacheManifest;
pub use message::{AgentMessage, AgentState};

/// Tag of the connectivity-restored signal.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

const INBOX_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// Everything the agent reacts to.
pub(crate) enum AgentEvent {
    Install(Reply<AgentStatus>),
    Update(CacheManifest, Reply<AgentStatus>),
    Fetch(Box<FetchRequest>, Reply<FetchResponse>),
    Message(AgentMessage, Reply<()>),
    Push(Option<Vec<u8>>, Reply<Notification>),
    Sync(String, Reply<ReplayReport>),
    Status(Reply<AgentStatus>),
    Shutdown,
}

/// Outcome of a spawned precache, applied by the actor.
enum Staged {
    Installed(Result<usize, Error>, Reply<AgentStatus>),
    Updated {
        manifest: CacheManifest,
        namespace: String,
        result: Result<usize, Error>,
        reply: Reply<AgentStatus>,
    },
}

/// Snapshot of the agent for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub namespace: String,
    pub manifest_version: u32,
    pub online: bool,
}

/// State shared with the tasks the agent spawns.
struct Shared {
    origin: String,
    cache_name: String,
    cache_live_fetches: bool,
    push_enabled: bool,
    replay_interval: Duration,
    db: CacheDb,
    network: Arc<dyn Network>,
    notifier: Arc<dyn NotificationChannel>,
    replayer: Arc<Replayer>,
}

pub struct ServiceAgent {
    shared: Arc<Shared>,
    manifest: CacheManifest,
    namespace: String,
    state: AgentState,
}

impl ServiceAgent {
    pub fn new(
        config: &AppConfig, db: CacheDb, network: Arc<dyn Network>, notifier: Arc<dyn NotificationChannel>,
        replayer: Arc<Replayer>,
    ) -> Self {
        let manifest = CacheManifest::from_config(config);
        let namespace = manifest.namespace(&config.cache_name);
        let shared = Shared {
            origin: config.origin.clone(),
            cache_name: config.cache_name.clone(),
            cache_live_fetches: config.cache_live_fetches,
            push_enabled: config.capabilities.has_push_channel,
            replay_interval: config.replay_interval(),
            db,
            network,
            notifier,
            replayer,
        };
        Self { shared: Arc::new(shared), manifest, namespace, state: AgentState::Uninstalled }
    }

    /// Start the agent on the current runtime.
    pub fn spawn(self) -> AgentHandle {
        let (tx, inbox) = mpsc::channel(INBOX_DEPTH);
        tokio::spawn(self.run(inbox));
        AgentHandle { tx }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<AgentEvent>) {
        let mut connectivity = self.shared.replayer.connectivity().subscribe();
        let mut was_online = *connectivity.borrow_and_update();
        let mut watching = true;

        let mut retry_tick = tokio::time::interval(self.shared.replay_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry_tick.reset();

        let (staged_tx, mut staged) = mpsc::unbounded_channel();

        tracing::info!(namespace = %self.namespace, "service agent started");

        loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(AgentEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event, &staged_tx).await,
                },
                Some(done) = staged.recv() => self.finish(done).await,
                changed = connectivity.changed(), if watching => match changed {
                    Ok(()) => {
                        let online = *connectivity.borrow_and_update();
                        if online && !was_online {
                            tracing::info!("connectivity restored, raising {BACKGROUND_SYNC_TAG}");
                            self.spawn_replay(BACKGROUND_SYNC_TAG, None);
                        }
                        was_online = online;
                    }
                    Err(_) => watching = false,
                },
                _ = retry_tick.tick() => self.retry_pending(),
            }
        }

        tracing::info!("service agent stopped");
    }

    async fn handle(&mut self, event: AgentEvent, staged: &mpsc::UnboundedSender<Staged>) {
        match event {
            AgentEvent::Install(reply) => self.install(reply, staged),
            AgentEvent::Update(manifest, reply) => self.update(manifest, reply, staged),
            AgentEvent::Fetch(request, reply) => {
                // Updating still serves from the current namespace.
                let serving = matches!(self.state, AgentState::Active | AgentState::Updating);
                let namespace = serving.then(|| self.namespace.clone());
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    let _ = reply.send(shared.intercept(namespace.as_deref(), &request).await);
                });
            }
            AgentEvent::Message(message, reply) => {
                let _ = reply.send(self.route(message).await);
            }
            AgentEvent::Push(payload, reply) => {
                let _ = reply.send(self.push(payload.as_deref()).await);
            }
            AgentEvent::Sync(tag, reply) => {
                if tag == BACKGROUND_SYNC_TAG {
                    self.spawn_replay(BACKGROUND_SYNC_TAG, Some(reply));
                } else {
                    let _ = reply.send(Err(Error::InvalidInput(format!("unknown sync tag: {tag}"))));
                }
            }
            AgentEvent::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            AgentEvent::Shutdown => {}
        }
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            state: self.state,
            namespace: self.namespace.clone(),
            manifest_version: self.manifest.version,
            online: self.shared.replayer.connectivity().is_online(),
        }
    }

    fn install(&mut self, reply: Reply<AgentStatus>, staged: &mpsc::UnboundedSender<Staged>) {
        match self.state {
            AgentState::Uninstalled => {}
            AgentState::Active => {
                let _ = reply.send(Ok(self.status()));
                return;
            }
            other => {
                let _ = reply.send(Err(Error::InvalidInput(format!("cannot install while {other}"))));
                return;
            }
        }

        self.state = AgentState::Installing;
        tracing::info!(namespace = %self.namespace, version = self.manifest.version, "installing");

        let shared = Arc::clone(&self.shared);
        let manifest = self.manifest.clone();
        let namespace = self.namespace.clone();
        let staged = staged.clone();
        tokio::spawn(async move {
            let result = shared.stage(&manifest, &namespace).await;
            let _ = staged.send(Staged::Installed(result, reply));
        });
    }

    fn update(&mut self, manifest: CacheManifest, reply: Reply<AgentStatus>, staged: &mpsc::UnboundedSender<Staged>) {
        if self.state != AgentState::Active {
            let _ = reply.send(Err(Error::InvalidInput(format!("cannot update while {}", self.state))));
            return;
        }
        if manifest.version <= self.manifest.version {
            let _ = reply.send(Err(Error::InvalidInput(format!(
                "manifest version {} is not newer than {}",
                manifest.version, self.manifest.version
            ))));
            return;
        }

        let namespace = manifest.namespace(&self.shared.cache_name);
        self.state = AgentState::Updating;
        tracing::info!(from = %self.namespace, to = %namespace, "updating");

        let shared = Arc::clone(&self.shared);
        let staged = staged.clone();
        tokio::spawn(async move {
            let result = shared.stage(&manifest, &namespace).await;
            let _ = staged.send(Staged::Updated { manifest, namespace, result, reply });
        });
    }

    async fn finish(&mut self, staged: Staged) {
        match staged {
            Staged::Installed(result, reply) => {
                let outcome = match result {
                    Ok(count) => {
                        self.state = AgentState::Active;
                        tracing::info!(namespace = %self.namespace, resources = count, "agent active");
                        Ok(self.status())
                    }
                    Err(e) => {
                        self.state = AgentState::Uninstalled;
                        tracing::error!(error = %e, "install failed");
                        Err(e)
                    }
                };
                let _ = reply.send(outcome);
            }
            Staged::Updated { manifest, namespace, result, reply } => {
                self.state = AgentState::Active;
                let outcome = match result {
                    Ok(_) => {
                        let previous = std::mem::replace(&mut self.namespace, namespace);
                        self.manifest = manifest;
                        self.shared.carry_records(&previous, &self.namespace).await;
                        self.shared.discard(&previous).await;
                        tracing::info!(namespace = %self.namespace, "update complete");
                        Ok(self.status())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, namespace = %self.namespace, "update failed, keeping current cache");
                        Err(e)
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }

    async fn route(&self, message: AgentMessage) -> Result<(), Error> {
        match message {
            AgentMessage::CacheData(record) => self.cache_record(&record).await,
            AgentMessage::ClearCache => {
                let existed = self.shared.db.delete_namespace(&self.namespace).await?;
                tracing::info!(namespace = %self.namespace, existed, "cache cleared");
                Ok(())
            }
        }
    }

    async fn cache_record(&self, record: &Record) -> Result<(), Error> {
        let url = resolve(&self.shared.origin, &format!("/data/{}", record.id))
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let key = RequestKey::get(url.as_str());
        let response = CachedResponse::json(record)?;

        self.shared.db.put_entry(&self.namespace, &key, &response).await?;
        tracing::debug!(id = record.id, url = %key.url, "record cached");

        let notification = Notification::new("Data Cached", format!("Saved: {}", record.name)).tagged("data-cached");
        self.shared.notifier.notify(notification).await;
        Ok(())
    }

    async fn push(&self, payload: Option<&[u8]>) -> Result<Notification, Error> {
        if !self.shared.push_enabled {
            return Err(Error::CapabilityMissing("push channel is disabled".into()));
        }
        let notification = Notification::from_push(payload);
        self.shared.notifier.notify(notification.clone()).await;
        Ok(notification)
    }

    fn spawn_replay(&self, tag: &'static str, reply: Option<Reply<ReplayReport>>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = shared.replayer.replay_pending().await;
            match &result {
                Ok(report) => {
                    tracing::info!(tag, synced = report.synced.len(), failed = report.failed.len(), "replay finished")
                }
                Err(e) => tracing::warn!(tag, error = %e, "replay did not run"),
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }

    fn retry_pending(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if !shared.replayer.connectivity().is_online() {
                return;
            }
            match shared.db.pending_count().await {
                Ok(0) => {}
                Ok(pending) => match shared.replayer.try_replay_pending().await {
                    Ok(Some(report)) => {
                        tracing::debug!(pending, synced = report.synced.len(), "retry tick replayed")
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "retry tick replay failed"),
                },
                Err(e) => tracing::warn!(error = %e, "could not count pending records"),
            }
        });
    }
}

impl Shared {
    /// Serve from `namespace` when given, otherwise go to the network.
    async fn intercept(&self, namespace: Option<&str>, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let key = request.cache_key();

        if let Some(namespace) = namespace {
            match self.db.match_entry(namespace, &key).await {
                Ok(Some(entry)) => {
                    tracing::debug!(url = %request.url, "cache hit");
                    return FetchResponse::from_cached(request.url.clone(), &entry);
                }
                Ok(None) => tracing::debug!(url = %request.url, "cache miss"),
                Err(e) => tracing::warn!(url = %request.url, error = %e, "cache lookup failed, fetching live"),
            }
        }

        let response = self.network.fetch(request).await?;

        if let Some(namespace) = namespace
            && self.cache_live_fetches
            && request.method == Method::GET
            && response.status.is_success()
            && let Err(e) = self.db.put_entry(namespace, &key, &response.to_cached()).await
        {
            tracing::warn!(url = %request.url, error = %e, "could not cache live response");
        }

        Ok(response)
    }

    async fn precache(&self, manifest: &CacheManifest, namespace: &str) -> Result<usize, Error> {
        self.db.open_namespace(namespace).await?;

        for resource in &manifest.resources {
            let url = resolve(&self.origin, resource).map_err(|e| Error::InvalidUrl(format!("{resource}: {e}")))?;
            let request = FetchRequest::get(url);
            let response = self.network.fetch(&request).await?;
            if !response.status.is_success() {
                return Err(Error::HttpError(format!(
                    "precache {} returned {}",
                    request.url,
                    response.status.as_u16()
                )));
            }
            self.db
                .put_entry(namespace, &request.cache_key(), &response.to_cached())
                .await?;
            tracing::debug!(url = %request.url, "precached");
        }

        Ok(manifest.resources.len())
    }

    /// Precache `manifest` into a staging namespace, then merge it into `target`.
    ///
    /// `target` is only written once every resource has been fetched, so a
    /// failure leaves whatever it already held untouched.
    async fn stage(&self, manifest: &CacheManifest, target: &str) -> Result<usize, Error> {
        let staging = format!("{target}.staging");
        self.discard(&staging).await;

        let result = async {
            let count = self.precache(manifest, &staging).await?;
            self.db.promote_namespace(&staging, target).await?;
            Ok::<_, Error>(count)
        }
        .await;

        if result.is_err() {
            self.discard(&staging).await;
        }
        result
    }

    /// Copy cached records from the namespace being retired into its successor.
    async fn carry_records(&self, from: &str, to: &str) {
        let prefix = match resolve(&self.origin, "/data/") {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve record prefix, records stay behind");
                return;
            }
        };
        match self.db.copy_missing_entries(from, to, &prefix).await {
            Ok(0) => {}
            Ok(copied) => tracing::debug!(from, to, copied, "cached records carried over"),
            Err(e) => tracing::warn!(from, to, error = %e, "could not carry cached records over"),
        }
    }

    async fn discard(&self, namespace: &str) {
        if let Err(e) = self.db.delete_namespace(namespace).await {
            tracing::warn!(namespace, error = %e, "could not delete cache namespace");
        }
    }
}

/// Cloneable sender side of a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("closed", &self.tx.is_closed()).finish()
    }
}

impl AgentHandle {
    async fn request<T>(&self, event: impl FnOnce(Reply<T>) -> AgentEvent) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(event(reply))
            .await
            .map_err(|_| Error::AgentUnavailable("agent is not running".into()))?;
        response
            .await
            .map_err(|_| Error::AgentUnavailable("agent dropped the request".into()))?
    }

    /// Precache the manifest and become Active.
    pub async fn install(&self) -> Result<AgentStatus, Error> {
        self.request(AgentEvent::Install).await
    }

    /// Move to a newer manifest version.
    pub async fn update(&self, manifest: CacheManifest) -> Result<AgentStatus, Error> {
        self.request(|reply| AgentEvent::Update(manifest, reply)).await
    }

    /// Send a request through the agent's fetch interception.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        self.request(|reply| AgentEvent::Fetch(Box::new(request), reply)).await
    }

    pub async fn post(&self, message: AgentMessage) -> Result<(), Error> {
        self.request(|reply| AgentEvent::Message(message, reply)).await
    }

    /// Deliver a push payload.
    pub async fn push(&self, payload: Option<Vec<u8>>) -> Result<Notification, Error> {
        self.request(|reply| AgentEvent::Push(payload, reply)).await
    }

    /// Raise a sync signal and wait for its replay.
    pub async fn sync(&self, tag: &str) -> Result<ReplayReport, Error> {
        let tag = tag.to_string();
        self.request(|reply| AgentEvent::Sync(tag, reply)).await
    }

    pub async fn status(&self) -> Result<AgentStatus, Error> {
        self.request(AgentEvent::Status).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(AgentEvent::Shutdown).await;
    }
}
