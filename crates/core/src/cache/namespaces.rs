//! Named cache namespaces holding request-keyed responses.
//!
//! Semantics follow the browser Cache Storage model:
//!
//! - `open` is idempotent; concurrent opens of one name converge on a single
//!   row via `INSERT OR IGNORE`.
//! - `put` replaces the whole entry at a key, headers and body included.
//! - Deleting a namespace cascades to its entries; reopening starts empty.
//!
//! Every storage fault is reported as `Error::CacheUnavailable` so callers can
//! fall back to the live path.

use std::collections::BTreeMap;

use super::connection::CacheDb;
use super::hash::compute_request_key;
use crate::Error;
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// Identity of a cached request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self { method: method.into().to_ascii_uppercase(), url: url.into() }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Storage digest of this key.
    pub fn digest(&self) -> String {
        compute_request_key(&self.method, &self.url)
    }
}

/// A stored response: status, headers and raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: BTreeMap::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// JSON response carrying `value`.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(200, body).with_header("content-type", "application/json"))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An entry as read back from a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    pub cache_name: String,
    pub key: RequestKey,
    pub response: CachedResponse,
    /// RFC 3339 time of the last `put`.
    pub stored_at: String,
}

/// Handle to one named namespace.
///
/// Handles are cheap; two handles opened with the same name address the same
/// logical namespace.
#[derive(Clone, Debug)]
pub struct CacheNamespace {
    db: CacheDb,
    name: String,
}

impl CacheNamespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, key: &RequestKey) -> Result<Option<CacheEntry>, Error> {
        self.db.match_entry(&self.name, key).await
    }

    pub async fn put(&self, key: &RequestKey, response: &CachedResponse) -> Result<(), Error> {
        self.db.put_entry(&self.name, key, response).await
    }

    pub async fn delete(&self, key: &RequestKey) -> Result<bool, Error> {
        self.db.delete_entry(&self.name, key).await
    }

    pub async fn entries(&self) -> Result<Vec<CacheEntry>, Error> {
        self.db.entries(&self.name).await
    }
}

type EntryRow = (String, String, u16, String, Vec<u8>, String);

fn entry_from_row(cache_name: &str, row: EntryRow) -> Result<CacheEntry, Error> {
    let (method, url, status, headers_json, body, stored_at) = row;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_json)
        .map_err(|e| Error::CacheUnavailable(format!("corrupt headers for {method} {url}: {e}")))?;
    Ok(CacheEntry {
        cache_name: cache_name.to_string(),
        key: RequestKey { method, url },
        response: CachedResponse { status, headers, body },
        stored_at,
    })
}

impl CacheDb {
    /// Open a namespace, creating it on first use.
    pub async fn open_namespace(&self, name: &str) -> Result<CacheNamespace, Error> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("cache name cannot be empty".into()));
        }
        let owned = name.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?1, ?2)",
                    params![owned, now],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())?;

        Ok(CacheNamespace { db: self.clone(), name: name.to_string() })
    }

    /// Names of all existing namespaces, sorted.
    pub async fn namespace_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM cache_namespaces ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Whether a namespace with this name exists.
    pub async fn has_namespace(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache_namespaces WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Look up the entry stored for `key` in namespace `name`.
    ///
    /// Returns None if the namespace or the key doesn't exist.
    pub async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, Error> {
        let cache_name = name.to_string();
        let key_hash = key.digest();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let row: Option<EntryRow> = conn
                    .query_row(
                        "SELECT method, url, status_code, headers_json, body, stored_at
                         FROM cache_entries WHERE namespace = ?1 AND key_hash = ?2",
                        params![cache_name, key_hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
                    )
                    .optional()?;

                row.map(|r| entry_from_row(&cache_name, r)).transpose()
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Store `response` under `key`, replacing any previous entry.
    ///
    /// Creates the namespace if needed. Fails with `CacheUnavailable` when the
    /// write would push stored bodies past the configured quota.
    pub async fn put_entry(&self, name: &str, key: &RequestKey, response: &CachedResponse) -> Result<(), Error> {
        let cache_name = name.to_string();
        let key_hash = key.digest();
        let key = key.clone();
        let status = response.status;
        let headers_json = serde_json::to_string(&response.headers)?;
        let body = response.body.clone();
        let quota = self.quota_bytes;
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;

                if let Some(quota) = quota {
                    let used: i64 = tx.query_row(
                        "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries
                         WHERE NOT (namespace = ?1 AND key_hash = ?2)",
                        params![cache_name, key_hash],
                        |row| row.get(0),
                    )?;
                    let needed = used as u64 + body.len() as u64;
                    if needed > quota {
                        return Err(Error::CacheUnavailable(format!(
                            "quota exceeded: {needed} bytes requested, {quota} allowed"
                        )));
                    }
                }

                tx.execute(
                    "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?1, ?2)",
                    params![cache_name, now],
                )?;
                tx.execute(
                    "INSERT INTO cache_entries (namespace, key_hash, method, url, status_code, headers_json, body, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(namespace, key_hash) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status_code = excluded.status_code,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![cache_name, key_hash, key.method, key.url, status, headers_json, body, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Delete the entry for `key`. Returns whether an entry existed.
    pub async fn delete_entry(&self, name: &str, key: &RequestKey) -> Result<bool, Error> {
        let cache_name = name.to_string();
        let key_hash = key.digest();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key_hash = ?2",
                    params![cache_name, key_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Delete a namespace and every entry in it. Returns whether it existed.
    pub async fn delete_namespace(&self, name: &str) -> Result<bool, Error> {
        let cache_name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM cache_namespaces WHERE name = ?1", params![cache_name])?;
                Ok(count > 0)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Merge every entry of `staging` into `target`, then drop `staging`.
    ///
    /// Runs as one transaction. Entries of `target` under the same key are
    /// replaced; its other entries are left alone. Returns the entries moved.
    pub async fn promote_namespace(&self, staging: &str, target: &str) -> Result<usize, Error> {
        let staging = staging.to_string();
        let target = target.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?1, ?2)",
                    params![target, now],
                )?;
                let moved = tx.execute(
                    "INSERT INTO cache_entries (namespace, key_hash, method, url, status_code, headers_json, body, stored_at)
                     SELECT ?2, key_hash, method, url, status_code, headers_json, body, stored_at
                     FROM cache_entries WHERE namespace = ?1
                     ON CONFLICT(namespace, key_hash) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status_code = excluded.status_code,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![staging, target],
                )?;
                tx.execute("DELETE FROM cache_namespaces WHERE name = ?1", params![staging])?;
                tx.commit()?;
                Ok(moved)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// Copy entries of `from` whose URL starts with `url_prefix` into `to`,
    /// skipping keys `to` already holds. Returns the entries copied.
    ///
    /// The quota is not checked; callers drop `from` right afterwards.
    pub async fn copy_missing_entries(&self, from: &str, to: &str, url_prefix: &str) -> Result<usize, Error> {
        let from = from.to_string();
        let to = to.to_string();
        let url_prefix = url_prefix.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?1, ?2)",
                    params![to, now],
                )?;
                let copied = tx.execute(
                    "INSERT OR IGNORE INTO cache_entries (namespace, key_hash, method, url, status_code, headers_json, body, stored_at)
                     SELECT ?2, key_hash, method, url, status_code, headers_json, body, stored_at
                     FROM cache_entries WHERE namespace = ?1 AND substr(url, 1, length(?3)) = ?3",
                    params![from, to, url_prefix],
                )?;
                tx.commit()?;
                Ok(copied)
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }

    /// All entries in a namespace, ordered by URL then method.
    pub async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, Error> {
        let cache_name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<CacheEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status_code, headers_json, body, stored_at
                     FROM cache_entries WHERE namespace = ?1 ORDER BY url, method",
                )?;
                let rows = stmt
                    .query_map(params![cache_name], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                    })?
                    .collect::<Result<Vec<EntryRow>, rusqlite::Error>>()?;

                rows.into_iter().map(|r| entry_from_row(&cache_name, r)).collect()
            })
            .await
            .map_err(|e| Error::from(e).into_cache_unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(body: &str) -> CachedResponse {
        CachedResponse::new(200, body.as_bytes()).with_header("Content-Type", "text/html")
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_shared() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = db.open_namespace("cacheA").await.unwrap();
        let second = db.open_namespace("cacheA").await.unwrap();

        first.put(&RequestKey::get("/x"), &html("hello")).await.unwrap();

        let seen = second.match_request(&RequestKey::get("/x")).await.unwrap().unwrap();
        assert_eq!(seen.response.body, b"hello");
        assert_eq!(db.namespace_names().await.unwrap(), vec!["cacheA"]);
    }

    #[tokio::test]
    async fn test_match_returns_binary_body_unchanged() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let body: Vec<u8> = (0..=255u8).chain([0, 0, 255, 10, 13]).collect();
        let response = CachedResponse::new(203, body)
            .with_header("content-type", "application/octet-stream")
            .with_header("x-trace", "abc");
        let key = RequestKey::get("https://example.com/blob.bin");

        db.put_entry("bin", &key, &response).await.unwrap();

        let entry = db.match_entry("bin", &key).await.unwrap().unwrap();
        assert_eq!(entry.response, response);
        assert_eq!(entry.key, key);
        assert_eq!(entry.cache_name, "bin");
    }

    #[tokio::test]
    async fn test_put_overwrites_without_merging() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get("/page");

        db.put_entry("c", &key, &html("old").with_header("etag", "v1")).await.unwrap();
        db.put_entry("c", &key, &CachedResponse::new(200, "new")).await.unwrap();

        let entry = db.match_entry("c", &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body, b"new");
        assert!(entry.response.headers.is_empty());
        assert_eq!(db.entries("c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_match_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.match_entry("nope", &RequestKey::get("/x")).await.unwrap().is_none());

        db.open_namespace("empty").await.unwrap();
        assert!(db.match_entry("empty", &RequestKey::get("/x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_method_is_part_of_key() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("c", &RequestKey::get("/x"), &html("get")).await.unwrap();

        assert!(db.match_entry("c", &RequestKey::new("post", "/x")).await.unwrap().is_none());
        assert!(db.match_entry("c", &RequestKey::new("get", "/x")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get("/x");
        db.put_entry("c", &key, &html("x")).await.unwrap();

        assert!(db.delete_entry("c", &key).await.unwrap());
        assert!(!db.delete_entry("c", &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_namespace_is_full_reset() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let ns = db.open_namespace("cacheA").await.unwrap();
        ns.put(&RequestKey::get("/x"), &html("x")).await.unwrap();

        assert!(db.delete_namespace("cacheA").await.unwrap());
        assert!(!db.has_namespace("cacheA").await.unwrap());

        let reopened = db.open_namespace("cacheA").await.unwrap();
        assert!(reopened.entries().await.unwrap().is_empty());
        assert!(!db.delete_namespace("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get("/shared");
        db.put_entry("a", &key, &html("from a")).await.unwrap();
        db.put_entry("b", &key, &html("from b")).await.unwrap();

        db.delete_namespace("a").await.unwrap();

        let b = db.match_entry("b", &key).await.unwrap().unwrap();
        assert_eq!(b.response.body, b"from b");
        assert_eq!(db.namespace_names().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_put() {
        let db = CacheDb::open_in_memory().await.unwrap().with_quota(10);
        let key = RequestKey::get("/x");

        db.put_entry("c", &key, &CachedResponse::new(200, vec![1u8; 8])).await.unwrap();
        // Replacing the same key only counts the new body.
        db.put_entry("c", &key, &CachedResponse::new(200, vec![2u8; 10])).await.unwrap();

        let result = db.put_entry("c", &RequestKey::get("/y"), &CachedResponse::new(200, vec![3u8; 1])).await;
        assert!(matches!(result, Err(Error::CacheUnavailable(msg)) if msg.contains("quota")));

        let kept = db.match_entry("c", &key).await.unwrap().unwrap();
        assert_eq!(kept.response.body, vec![2u8; 10]);
    }

    #[tokio::test]
    async fn test_promote_merges_and_drops_staging() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("live", &RequestKey::get("/data/1"), &html("record")).await.unwrap();
        db.put_entry("live", &RequestKey::get("/"), &html("old index")).await.unwrap();
        db.put_entry("live.staging", &RequestKey::get("/"), &html("new index")).await.unwrap();
        db.put_entry("live.staging", &RequestKey::get("/app.js"), &html("js")).await.unwrap();

        assert_eq!(db.promote_namespace("live.staging", "live").await.unwrap(), 2);

        assert_eq!(db.namespace_names().await.unwrap(), vec!["live"]);
        let entries = db.entries("live").await.unwrap();
        assert_eq!(entries.len(), 3);
        let index = db.match_entry("live", &RequestKey::get("/")).await.unwrap().unwrap();
        assert_eq!(index.response.body, b"new index");
        assert!(db.match_entry("live", &RequestKey::get("/data/1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_promote_creates_target() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("v2.staging", &RequestKey::get("/"), &html("index")).await.unwrap();

        db.promote_namespace("v2.staging", "v2").await.unwrap();
        assert_eq!(db.entries("v2").await.unwrap().len(), 1);
        assert!(!db.has_namespace("v2.staging").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_missing_entries_by_prefix() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("v1", &RequestKey::get("http://h/data/1"), &html("one")).await.unwrap();
        db.put_entry("v1", &RequestKey::get("http://h/data/2"), &html("two, old")).await.unwrap();
        db.put_entry("v1", &RequestKey::get("http://h/app.css"), &html("css")).await.unwrap();
        db.put_entry("v2", &RequestKey::get("http://h/data/2"), &html("two, new")).await.unwrap();

        assert_eq!(db.copy_missing_entries("v1", "v2", "http://h/data/").await.unwrap(), 1);

        let urls: Vec<String> = db.entries("v2").await.unwrap().into_iter().map(|e| e.key.url).collect();
        assert_eq!(urls, vec!["http://h/data/1", "http://h/data/2"]);
        let two = db.match_entry("v2", &RequestKey::get("http://h/data/2")).await.unwrap().unwrap();
        assert_eq!(two.response.body, b"two, new");
    }

    #[tokio::test]
    async fn test_open_rejects_blank_name() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(matches!(db.open_namespace(" ").await, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_json_response() {
        let response = CachedResponse::json(&serde_json::json!({"id": 1})).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert!(response.is_success());
    }
}
