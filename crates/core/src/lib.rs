//! Core types and shared functionality for outpost.
//!
//! This crate provides:
//! - Cache gateway (named namespaces of request-keyed responses) and the sync
//!   queue, both backed by SQLite
//! - Unified error types
//! - Configuration structures and runtime capabilities
//! - Record types exchanged with the live persistence API

pub mod cache;
pub mod config;
pub mod error;
pub mod record;

pub use cache::{CacheDb, CacheEntry, CacheNamespace, CachedResponse, RequestKey};
pub use config::{AppConfig, Capabilities, ConfigError, RetryConfig};
pub use error::Error;
pub use record::{QueuedRecord, Record, SyncState};
