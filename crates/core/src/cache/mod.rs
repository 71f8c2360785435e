//! SQLite-backed local storage for cache namespaces and the sync queue.
//!
//! This module provides a persistent cache gateway using SQLite with async
//! access via tokio-rusqlite. It supports:
//!
//! - Named namespaces of request-keyed responses (open/match/put/delete)
//! - Byte-exact bodies and a global body-size quota
//! - A sync queue of records with pending/synced/failed states
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod namespaces;
pub mod queue;

pub use crate::Error;

pub use connection::CacheDb;
pub use namespaces::{CacheEntry, CacheNamespace, CachedResponse, RequestKey};
