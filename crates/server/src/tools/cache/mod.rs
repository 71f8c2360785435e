//! Cache-related MCP tools.
//!
//! This module provides tools for inspecting and clearing cache namespaces.

pub mod clear;
pub mod keys;
pub mod lookup;

pub use clear::{CacheClearParams, clear_impl};
pub use keys::{CacheKeysParams, keys_impl};
pub use lookup::{CacheMatchParams, match_impl};
