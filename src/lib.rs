//! Veilsync: proxy client core
//!
//! Supervises the proxy worker process over its control channel and keeps
//! the local profile catalog in step with remote subscriptions.

pub mod error;
pub mod config;

pub mod worker;
pub mod service;
pub mod subscription;

// Re-exports
pub use error::{Error, Result};

/// Veilsync library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
