//! Worker lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the worker process
///
/// The authoritative value lives in the worker; the client only caches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Not running
    Idle,
    /// Start requested, tunnel not yet up
    Connecting,
    /// Tunnel up
    Connected,
    /// Stop requested
    Stopping,
    /// Stopped after a failure
    Stopped,
}

/// Whether a stop request is meaningful in `state`
pub fn can_stop(state: ServiceState) -> bool {
    matches!(state, ServiceState::Connecting | ServiceState::Connected)
}

/// Whether a fresh start request is accepted in `state`
pub fn can_start(state: ServiceState) -> bool {
    matches!(state, ServiceState::Idle | ServiceState::Stopped)
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Idle => "idle",
            ServiceState::Connecting => "connecting",
            ServiceState::Connected => "connected",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
