//! Storefront response caching.
//!
//! Decides whether a storefront response may be cached, negotiates validators with the
//! client, keeps rendered bodies in a pluggable backing store and evicts them by key
//! pattern when catalogue content changes.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
pub mod instrumentation;
