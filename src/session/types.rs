//! Types for the realtime session controller.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Default bound on channel establishment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Event type carrying a complete function call
pub const FUNCTION_CALL_EVENT: &str = "response.function_call_arguments.done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Where and how to reach the realtime service.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// `wss://` (or `ws://`) URL of the realtime endpoint
    pub endpoint: String,
    pub api_key: String,
    /// Deployment name for hosted endpoints that address models by deployment
    pub deployment: Option<String>,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Notifications sent from the controller to whoever drives the UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    /// Channel is open and the session config has been sent
    Open,
    /// Something went wrong; the state may or may not have changed
    Error(String),
    /// An inbound event of this type was received
    Event(String),
    /// Channel closed, state is Disconnected
    Closed,
}

/// Inbound events the controller acts on. Anything else is `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        /// Missing names are answered as an unknown tool
        #[serde(default)]
        name: String,
        /// JSON-encoded string on the wire
        #[serde(default)]
        arguments: Value,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<Value>,
        /// Externally measured turn latency in milliseconds
        #[serde(default)]
        latency: Option<Value>,
    },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(other)]
    Other,
}
