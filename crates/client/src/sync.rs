//! Offline-first persistence of records and their replay to the live path.
//!
//! `SyncCoordinator::persist` tries the live write when online and always
//! mirrors the record into the cache through the agent, so a record is never
//! lost to flaky connectivity. Records whose live write did not succeed stay
//! `pending` until a replay moves them to `synced` or, once the retry budget is
//! spent, to `failed`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use outpost_core::{CacheDb, Error, QueuedRecord, Record, RetryConfig, SyncState};

use crate::agent::{AgentHandle, AgentMessage, BACKGROUND_SYNC_TAG};
use crate::connectivity::Connectivity;
use crate::live::LiveStore;
use crate::notify::{Notification, NotificationChannel};

/// Outcome of one replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub synced: Vec<QueuedRecord>,
    pub failed: Vec<QueuedRecord>,
}

impl ReplayReport {
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.failed.is_empty()
    }
}

/// Replays pending records against the live store, one replay at a time.
pub struct Replayer {
    db: CacheDb,
    live: Arc<dyn LiveStore>,
    notifier: Arc<dyn NotificationChannel>,
    connectivity: Connectivity,
    retry: RetryConfig,
    in_flight: Mutex<()>,
}

impl Replayer {
    pub fn new(
        db: CacheDb, live: Arc<dyn LiveStore>, notifier: Arc<dyn NotificationChannel>, connectivity: Connectivity,
        retry: RetryConfig,
    ) -> Self {
        Self { db, live, notifier, connectivity, retry, in_flight: Mutex::new(()) }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Replay every pending record, oldest first.
    ///
    /// Concurrent calls queue behind each other; a call that finds nothing
    /// pending returns an empty report. Stops early, leaving the rest pending,
    /// if connectivity drops mid-replay.
    pub async fn replay_pending(&self) -> Result<ReplayReport, Error> {
        let _in_flight = self.in_flight.lock().await;
        self.replay_locked().await
    }

    /// Like `replay_pending`, but returns `None` at once if a replay is
    /// already running or waiting.
    pub async fn try_replay_pending(&self) -> Result<Option<ReplayReport>, Error> {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            tracing::debug!("replay already in flight, skipping");
            return Ok(None);
        };
        self.replay_locked().await.map(Some)
    }

    async fn replay_locked(&self) -> Result<ReplayReport, Error> {
        if !self.connectivity.is_online() {
            return Err(Error::NetworkUnavailable("offline, pending records stay queued".into()));
        }

        let pending = self.db.pending_records().await?;
        let mut report = ReplayReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(count = pending.len(), "replaying pending records");

        for mut queued in pending {
            if !self.connectivity.is_online() {
                tracing::info!(id = queued.id, "went offline during replay, deferring the rest");
                break;
            }

            let (used, outcome) = self.replay_one(&queued.payload).await;
            queued.attempts += used;

            match outcome {
                Ok(()) => {
                    queued.sync_state = SyncState::Synced;
                    queued.last_error = None;
                }
                Err(e) => {
                    let exhausted =
                        Error::ReplayExhausted { id: queued.id, attempts: queued.attempts, reason: e.to_string() };
                    tracing::error!(error = %exhausted, "record replay failed");
                    queued.sync_state = SyncState::Failed;
                    queued.last_error = Some(exhausted.to_string());

                    let notification =
                        Notification::new("Sync Failed", format!("Could not sync: {}", queued.payload.name))
                            .tagged("sync-failed");
                    self.notifier.notify(notification).await;
                }
            }

            if let Err(e) = self
                .db
                .mark_record(queued.id, queued.sync_state, queued.attempts, queued.last_error.clone())
                .await
            {
                tracing::warn!(id = queued.id, error = %e, "could not record replay outcome");
            }

            match queued.sync_state {
                SyncState::Synced => report.synced.push(queued),
                _ => report.failed.push(queued),
            }
        }

        Ok(report)
    }

    /// Try one record up to the retry budget. Returns attempts used.
    async fn replay_one(&self, record: &Record) -> (u32, Result<(), Error>) {
        let budget = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.live.save(record).await {
                Ok(_) => return (attempts, Ok(())),
                Err(e) if e.is_transient() && attempts < budget => {
                    let delay = self.retry.delay_for(attempts);
                    tracing::debug!(id = record.id, attempts, ?delay, error = %e, "live write failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (attempts, Err(e)),
            }
        }
    }
}

/// Page-side policy for writing records.
pub struct SyncCoordinator {
    agent: AgentHandle,
    replayer: Arc<Replayer>,
    timeout: Duration,
}

impl SyncCoordinator {
    /// `timeout` bounds how long `persist` waits on the live write.
    pub fn new(agent: AgentHandle, replayer: Arc<Replayer>, timeout: Duration) -> Self {
        Self { agent, replayer, timeout }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.replayer.connectivity
    }

    /// Write a record: live when online, always mirrored into the cache.
    ///
    /// The returned row is `synced` when the live write succeeded and
    /// `pending` otherwise.
    pub async fn persist(&self, record: &Record) -> Result<QueuedRecord, Error> {
        record.validate()?;

        let live_outcome = if self.connectivity().is_online() { Some(self.write_live(record).await) } else { None };

        if let Err(e) = self.agent.post(AgentMessage::CacheData(record.clone())).await {
            tracing::warn!(id = record.id, error = %e, "could not mirror record into cache");
            let notification =
                Notification::new("Cache Unavailable", format!("Not cached: {}", record.name)).tagged("cache-failed");
            self.replayer.notifier.notify(notification).await;
        }

        let Some(outcome) = live_outcome else {
            let queued = self.replayer.db.enqueue_record(record, SyncState::Pending).await?;
            tracing::info!(id = record.id, "offline, record queued for replay");
            return Ok(queued);
        };

        let (state, last_error) = match outcome {
            Ok(()) => (SyncState::Synced, None),
            Err(e) => {
                tracing::warn!(id = record.id, error = %e, "live write failed, record queued for replay");
                (SyncState::Pending, Some(e.to_string()))
            }
        };
        self.replayer.db.enqueue_attempted(record, state, 1, last_error).await
    }

    async fn write_live(&self, record: &Record) -> Result<(), Error> {
        match tokio::time::timeout(self.timeout, self.replayer.live.save(record)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Error::NetworkUnavailable(format!(
                "live write timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Ask the agent to replay pending records.
    pub async fn replay_pending(&self) -> Result<ReplayReport, Error> {
        self.agent.sync(BACKGROUND_SYNC_TAG).await
    }

    /// Move a failed record back to pending. Returns false unless it was failed.
    pub async fn requeue_failed(&self, id: i64) -> Result<bool, Error> {
        let requeued = self.replayer.db.requeue_failed(id).await?;
        if requeued {
            tracing::info!(id, "failed record requeued");
        }
        Ok(requeued)
    }

    /// Every queued record, oldest first.
    pub async fn queued(&self) -> Result<Vec<QueuedRecord>, Error> {
        self.replayer.db.all_queued().await
    }

    /// Records currently held by the live store.
    pub async fn live_records(&self) -> Result<Vec<Record>, Error> {
        self.replayer.live.list().await
    }
}
