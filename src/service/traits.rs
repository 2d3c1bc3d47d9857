//! Observer-facing traits for the service connection

use crate::service::ServiceState;
use crate::worker::TrafficStats;

/// Observer of worker lifecycle and traffic
///
/// A connection holds at most one callback target at a time. Methods are called
/// from the connection's event task and must not block.
pub trait ServiceCallback: Send + Sync {
    /// Lifecycle transition; `error_message` is set for failure transitions
    fn on_state_changed(
        &self,
        state: ServiceState,
        profile_name: Option<&str>,
        error_message: Option<&str>,
    );

    /// Traffic sample; profile id 0 carries the aggregate of all profiles
    fn on_traffic_updated(&self, _profile_id: i64, _stats: TrafficStats) {}

    /// Traffic counters of `profile_id` were written to storage
    fn on_traffic_persisted(&self, _profile_id: i64) {}
}

/// Rebind policy applied after the worker channel dies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Bind attempts before giving up (at least one is always made)
    pub attempts: u32,
    /// Backoff unit; attempt `n` waits `n * backoff` before the next one
    pub backoff: std::time::Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: std::time::Duration::from_millis(500),
        }
    }
}

impl ReconnectPolicy {
    /// Policy described by the client configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            attempts: config.reconnect_attempts,
            backoff: std::time::Duration::from_millis(config.reconnect_backoff_ms),
        }
    }
}
