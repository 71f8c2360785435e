//! Client side of outpost.
//!
//! This crate provides the HTTP fetch pipeline and live-path store client,
//! the compute worker, and the service agent with its sync coordinator.

pub mod agent;
pub mod connectivity;
pub mod fetch;
pub mod live;
pub mod notify;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentHandle, AgentMessage, AgentState, AgentStatus, BACKGROUND_SYNC_TAG, CacheManifest, ServiceAgent};
pub use connectivity::Connectivity;
pub use fetch::{FetchClient, FetchConfig, FetchRequest, FetchResponse, Network, ResponseSource};
pub use live::{HttpLiveStore, LiveStore, MemoryLiveStore, SaveAck};
pub use notify::{LogNotifier, MemoryNotifier, Notification, NotificationChannel};
pub use sync::{ReplayReport, Replayer, SyncCoordinator};
pub use worker::{ComputeWorker, Job, JobEvent, JobHandle, JobResult, WorkerCommand, WorkerMessage};
