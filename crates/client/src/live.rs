//! The live path: the external persistence API records are written to.
//!
//! The API is `POST /data {record} -> {success, id}` and `GET /data -> [record]`.
//! Nothing here assumes the store is durable; callers always mirror records
//! into the local cache as well.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use outpost_core::{Error, Record};

/// Acknowledgement returned by `POST /data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAck {
    pub success: bool,
    pub id: i64,
}

/// Something records can be written to and read back from.
#[async_trait::async_trait]
pub trait LiveStore: Send + Sync {
    /// Write one record. Transport failures are `NetworkUnavailable`;
    /// a rejected write is `HttpError`.
    async fn save(&self, record: &Record) -> Result<SaveAck, Error>;

    /// Every record the store currently holds.
    async fn list(&self) -> Result<Vec<Record>, Error>;
}

/// Live store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLiveStore {
    http: Client,
    data_url: Url,
}

impl HttpLiveStore {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let mut base = Url::parse(base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let data_url = base.join("data").map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::NetworkUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, data_url })
    }

    pub fn data_url(&self) -> &Url {
        &self.data_url
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_decode() {
        Error::HttpError(format!("malformed response: {err}"))
    } else {
        Error::NetworkUnavailable(err.to_string())
    }
}

#[async_trait::async_trait]
impl LiveStore for HttpLiveStore {
    async fn save(&self, record: &Record) -> Result<SaveAck, Error> {
        let response = self
            .http
            .post(self.data_url.clone())
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("POST {} returned {}", self.data_url, status.as_u16())));
        }

        let ack: SaveAck = response.json().await.map_err(transport_error)?;
        if !ack.success {
            return Err(Error::HttpError(format!("record {} rejected by live store", record.id)));
        }

        tracing::debug!(id = ack.id, "record saved to live store");
        Ok(ack)
    }

    async fn list(&self) -> Result<Vec<Record>, Error> {
        let response = self
            .http
            .get(self.data_url.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("GET {} returned {}", self.data_url, status.as_u16())));
        }

        response.json().await.map_err(transport_error)
    }
}

/// In-process live store with process-lifetime contents.
///
/// Stands in for the persistence API when none is configured. Reachability
/// can be toggled and failures injected to exercise offline behavior.
#[derive(Debug)]
pub struct MemoryLiveStore {
    records: RwLock<Vec<Record>>,
    reachable: AtomicBool,
    failures_remaining: AtomicU32,
}

impl Default for MemoryLiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLiveStore {
    pub fn new() -> Self {
        Self { records: RwLock::new(Vec::new()), reachable: AtomicBool::new(true), failures_remaining: AtomicU32::new(0) }
    }

    /// Make every call fail with `NetworkUnavailable` until set back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `count` saves, then recover.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), Error> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable("live store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LiveStore for MemoryLiveStore {
    async fn save(&self, record: &Record) -> Result<SaveAck, Error> {
        self.check_reachable()?;

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::NetworkUnavailable("injected live store failure".into()));
        }

        self.records.write().await.push(record.clone());
        Ok(SaveAck { success: true, id: record.id })
    }

    async fn list(&self) -> Result<Vec<Record>, Error> {
        self.check_reachable()?;
        Ok(self.records.read().await.clone())
    }
}
