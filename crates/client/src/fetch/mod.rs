//! HTTP fetch pipeline used by the service agent.
//!
//! ### Request identity
//! - Request URLs are resolved against the configured origin and
//!   canonicalized (lowercase host, no fragment) before they become cache keys.
//! - The cache key is `METHOD + URL`; headers do not participate.
//!
//! ### Pass-through
//! - Responses are returned unmodified whatever their status; only transport
//!   failures (DNS, connect, timeout) become `NetworkUnavailable`.
//! - Max redirects: 5. Request timeout comes from `timeout_ms`.

pub mod url;

use bytes::Bytes;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub use url::{UrlError, resolve};

use outpost_core::{AppConfig, CacheEntry, CachedResponse, Error, RequestKey};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "outpost/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "outpost/0.1".to_string(), timeout: Duration::from_millis(20000), max_redirects: 5 }
    }
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), ..Default::default() }
    }
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: None }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Key under which this request's response is cached.
    pub fn cache_key(&self) -> RequestKey {
        RequestKey::new(self.method.as_str(), self.url.as_str())
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL requested
    pub url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body bytes
    pub bytes: Bytes,
    /// Cache hit or live fetch
    pub source: ResponseSource,
    /// Time taken to produce the response in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// Snapshot of this response suitable for `CacheDb::put_entry`.
    ///
    /// Repeated headers are joined with `, `.
    pub fn to_cached(&self) -> CachedResponse {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &self.headers {
            let Ok(value) = value.to_str() else {
                tracing::debug!(header = %name, "skipping non-text header value");
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        CachedResponse { status: self.status.as_u16(), headers, body: self.bytes.to_vec() }
    }

    /// Rebuild a response from a cache entry.
    pub fn from_cached(url: Url, entry: &CacheEntry) -> Result<Self, Error> {
        let status = StatusCode::from_u16(entry.response.status)
            .map_err(|e| Error::CacheUnavailable(format!("stored status {}: {e}", entry.response.status)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &entry.response.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, url = %url, "dropping unparseable cached header"),
            }
        }

        Ok(Self {
            url,
            status,
            headers,
            bytes: Bytes::from(entry.response.body.clone()),
            source: ResponseSource::Cache,
            fetch_ms: 0,
        })
    }
}

/// The network as seen by the service agent.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    /// Perform a live request. Transport failures are `NetworkUnavailable`.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;
}

/// HTTP fetch client backed by reqwest.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::NetworkUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Network for FetchClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::NetworkUnavailable(format!("{} {}: {}", request.method, request.url, e)))?;

        let status = response.status();
        let headers = response.headers().clone();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkUnavailable(format!("failed to read response: {}", e)))?;

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} {} -> {} in {}ms ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            fetch_ms,
            bytes.len()
        );

        Ok(FetchResponse {
            url: request.url.clone(),
            status,
            headers,
            bytes,
            source: ResponseSource::Network,
            fetch_ms,
        })
    }
}
