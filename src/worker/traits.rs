//! Worker control channel traits
//!
//! This module defines the abstract interfaces for talking to the worker process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::service::ServiceState;

/// One traffic sample pushed by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    /// Upload rate in bytes per second
    pub tx_rate: u64,
    /// Download rate in bytes per second
    pub rx_rate: u64,
    /// Total bytes uploaded
    pub tx_total: u64,
    /// Total bytes downloaded
    pub rx_total: u64,
}

/// Event pushed by the worker over a registered callback
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Lifecycle transition; `message` is set for failure transitions
    StateChanged {
        state: ServiceState,
        profile_name: Option<String>,
        message: Option<String>,
    },
    /// Periodic traffic sample; profile id 0 carries the aggregate
    TrafficUpdated { profile_id: i64, stats: TrafficStats },
    /// Traffic counters of a profile were written to storage
    TrafficPersisted { profile_id: i64 },
}

/// Worker control channel
///
/// Represents one live binding to the worker process. When the worker dies the
/// receiver returned by [`WorkerChannel::register_callback`] yields `None`.
#[async_trait]
pub trait WorkerChannel: Send + Sync + std::fmt::Debug {
    /// Ask the worker to start the tunnel
    async fn start(&self) -> Result<(), crate::Error>;

    /// Ask the worker to stop the tunnel
    async fn stop(&self) -> Result<(), crate::Error>;

    /// Ask a running worker to reload its profile
    async fn reload(&self) -> Result<(), crate::Error>;

    /// Current worker state
    async fn query_state(&self) -> Result<ServiceState, crate::Error>;

    /// Register for pushed events
    ///
    /// A channel holds at most one registration; registering again replaces it.
    async fn register_callback(&self) -> Result<mpsc::Receiver<WorkerEvent>, crate::Error>;

    /// Drop the event registration
    async fn unregister_callback(&self) -> Result<(), crate::Error>;

    /// Start (or reschedule) traffic samples every `interval_ms`
    async fn start_listening_for_bandwidth(&self, interval_ms: u64) -> Result<(), crate::Error>;

    /// Stop traffic samples
    async fn stop_listening_for_bandwidth(&self) -> Result<(), crate::Error>;

    /// Close the channel
    async fn close(&self) -> Result<(), crate::Error>;

    /// Check if channel is active
    fn is_active(&self) -> bool;
}

/// Produces fresh bindings to the worker
#[async_trait]
pub trait WorkerConnector: Send + Sync + std::fmt::Debug {
    /// Bind to the worker, completing the handshake
    async fn bind(&self) -> Result<Arc<dyn WorkerChannel>, crate::Error>;
}
