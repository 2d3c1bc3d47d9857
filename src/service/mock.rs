//! Recording callback for testing
//!
//! Captures every delivery so tests can assert on order and content.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::state::ServiceState;
use super::traits::ServiceCallback;
use crate::worker::TrafficStats;

/// One captured callback invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackRecord {
    StateChanged {
        state: ServiceState,
        profile_name: Option<String>,
        error: Option<String>,
    },
    TrafficUpdated {
        profile_id: i64,
        stats: TrafficStats,
    },
    TrafficPersisted {
        profile_id: i64,
    },
}

/// Callback target that records deliveries
#[derive(Debug, Default)]
pub struct RecordingCallback {
    records: Mutex<Vec<CallbackRecord>>,
    notify: Notify,
}

impl RecordingCallback {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: CallbackRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        self.notify.notify_waiters();
    }

    /// Everything recorded so far
    pub fn records(&self) -> Vec<CallbackRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of deliveries so far
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was delivered yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivered states, in order
    pub fn states(&self) -> Vec<ServiceState> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                CallbackRecord::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Delivered error messages, in order
    pub fn errors(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                CallbackRecord::StateChanged { error, .. } => error,
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` deliveries happened; false on timeout
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

impl ServiceCallback for RecordingCallback {
    fn on_state_changed(
        &self,
        state: ServiceState,
        profile_name: Option<&str>,
        error_message: Option<&str>,
    ) {
        self.push(CallbackRecord::StateChanged {
            state,
            profile_name: profile_name.map(String::from),
            error: error_message.map(String::from),
        });
    }

    fn on_traffic_updated(&self, profile_id: i64, stats: TrafficStats) {
        self.push(CallbackRecord::TrafficUpdated { profile_id, stats });
    }

    fn on_traffic_persisted(&self, profile_id: i64) {
        self.push(CallbackRecord::TrafficPersisted { profile_id });
    }
}
