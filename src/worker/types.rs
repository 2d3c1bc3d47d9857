//! Worker control channel wire types
//!
//! JSON messages exchanged with the worker over the WebSocket transport.

use serde::{Deserialize, Serialize};

use super::traits::{TrafficStats, WorkerEvent};
use crate::service::ServiceState;

/// Command method names
pub mod methods {
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const RELOAD: &str = "reload";
    pub const QUERY_STATE: &str = "queryState";
    pub const REGISTER_CALLBACK: &str = "registerCallback";
    pub const UNREGISTER_CALLBACK: &str = "unregisterCallback";
    pub const START_BANDWIDTH: &str = "startListeningForBandwidth";
    pub const STOP_BANDWIDTH: &str = "stopListeningForBandwidth";
}

/// Notification method names
pub mod events {
    pub const STATE_CHANGED: &str = "stateChanged";
    pub const TRAFFIC_UPDATED: &str = "trafficUpdated";
    pub const TRAFFIC_PERSISTED: &str = "trafficPersisted";
}

/// Command sent to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Request ID
    pub id: u64,
    /// Method name (e.g., "queryState")
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Reply to a [`WorkerRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRpcResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    /// Response result
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerErrorDetail>,
}

/// Worker error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerErrorDetail {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Event pushed by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNotification {
    /// Event method (e.g., "stateChanged")
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// `queryState` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResult {
    pub state: ServiceState,
}

/// `startListeningForBandwidth` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthParams {
    pub interval_ms: u64,
}

/// `stateChanged` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedParams {
    pub state: ServiceState,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `trafficUpdated` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficUpdatedParams {
    pub profile_id: i64,
    #[serde(flatten)]
    pub stats: TrafficStats,
}

/// `trafficPersisted` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPersistedParams {
    pub profile_id: i64,
}

impl WorkerNotification {
    /// Decode into a typed event; unknown methods yield `Ok(None)`
    pub fn into_event(self) -> Result<Option<WorkerEvent>, serde_json::Error> {
        let event = match self.method.as_str() {
            events::STATE_CHANGED => {
                let p: StateChangedParams = serde_json::from_value(self.params)?;
                WorkerEvent::StateChanged {
                    state: p.state,
                    profile_name: p.profile_name,
                    // an empty message is not a failure
                    message: p.message.filter(|m| !m.is_empty()),
                }
            }
            events::TRAFFIC_UPDATED => {
                let p: TrafficUpdatedParams = serde_json::from_value(self.params)?;
                WorkerEvent::TrafficUpdated {
                    profile_id: p.profile_id,
                    stats: p.stats,
                }
            }
            events::TRAFFIC_PERSISTED => {
                let p: TrafficPersistedParams = serde_json::from_value(self.params)?;
                WorkerEvent::TrafficPersisted {
                    profile_id: p.profile_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Encode a typed event (used by worker-side code and tests)
    pub fn from_event(event: &WorkerEvent) -> Result<Self, serde_json::Error> {
        let (method, params) = match event {
            WorkerEvent::StateChanged {
                state,
                profile_name,
                message,
            } => (
                events::STATE_CHANGED,
                serde_json::to_value(StateChangedParams {
                    state: *state,
                    profile_name: profile_name.clone(),
                    message: message.clone(),
                })?,
            ),
            WorkerEvent::TrafficUpdated { profile_id, stats } => (
                events::TRAFFIC_UPDATED,
                serde_json::to_value(TrafficUpdatedParams {
                    profile_id: *profile_id,
                    stats: *stats,
                })?,
            ),
            WorkerEvent::TrafficPersisted { profile_id } => (
                events::TRAFFIC_PERSISTED,
                serde_json::to_value(TrafficPersistedParams {
                    profile_id: *profile_id,
                })?,
            ),
        };
        Ok(Self {
            method: method.to_string(),
            params,
        })
    }
}
