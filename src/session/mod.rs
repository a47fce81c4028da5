//! Realtime session controller.
//!
//! Owns the streaming channel and its lifecycle
//! (`Disconnected -> Connecting -> Connected -> Disconnected`), routes inbound
//! events to the tool dispatcher and the telemetry aggregator, and reports
//! what happened through [`SessionNotification`]s and the audit log.
//!
//! Everything runs on the caller's thread. [`SessionController::poll`] reads at
//! most one message per call so a single loop can interleave it with other
//! periodic work.

pub mod audit;
pub mod types;
pub mod websocket;

use std::collections::HashSet;
use std::sync::mpsc;

use serde_json::Value;

pub use audit::{AuditLog, LogCategory, LogEntry};
pub use types::{
    ConnectionSettings, InboundEvent, SessionNotification, SessionState, DEFAULT_CONNECT_TIMEOUT,
};
pub use websocket::{RealtimeChannel, Transport, WsTransport};

use crate::config::SessionConfig;
use crate::error::{SessionError, ToolError};
use crate::telemetry::{Metrics, UsageSample};
use crate::tools::{self, ToolArgs, ToolCallRequest, ToolCallResult};
use crate::vehicle::VehicleStore;

pub struct SessionController {
    transport: Box<dyn Transport>,
    state: SessionState,
    channel: Option<Box<dyn RealtimeChannel>>,
    /// Config the current connection was opened with
    active_config: Option<SessionConfig>,
    vehicle: VehicleStore,
    metrics: Metrics,
    audit: AuditLog,
    /// Call ids already dispatched on this connection
    dispatched_calls: HashSet<String>,
    notify_tx: mpsc::Sender<SessionNotification>,
}

impl SessionController {
    /// Create a disconnected controller and the receiver for its notifications.
    pub fn new(
        transport: Box<dyn Transport>,
        vehicle: VehicleStore,
    ) -> (Self, mpsc::Receiver<SessionNotification>) {
        let (notify_tx, notify_rx) = mpsc::channel();
        let controller = Self {
            transport,
            state: SessionState::Disconnected,
            channel: None,
            active_config: None,
            vehicle,
            metrics: Metrics::new(),
            audit: AuditLog::new(),
            dispatched_calls: HashSet::new(),
            notify_tx,
        };
        (controller, notify_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn vehicle(&self) -> &VehicleStore {
        &self.vehicle
    }

    pub fn active_config(&self) -> Option<&SessionConfig> {
        self.active_config.as_ref()
    }

    fn notify(&self, notification: SessionNotification) {
        let _ = self.notify_tx.send(notification);
    }

    /// Report a failure that happened before the channel was up.
    fn reject(&mut self, err: SessionError) -> Result<(), SessionError> {
        self.state = SessionState::Disconnected;
        self.audit.error(format!("Connect failed: {}", err));
        self.notify(SessionNotification::Error(err.to_string()));
        Err(err)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open a session with `config`.
    ///
    /// Missing endpoint or key, an invalid config, or a tool list that differs
    /// from the dispatcher table are configuration errors and no connection is
    /// attempted. On
    /// success the tool list and session settings are sent before the state
    /// becomes Connected.
    pub fn connect(
        &mut self,
        settings: &ConnectionSettings,
        config: &SessionConfig,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            self.audit.info("Reconnecting: closing the current session first");
            self.disconnect();
        }

        if settings.endpoint.trim().is_empty() {
            return self.reject(SessionError::Configuration(
                "endpoint must not be empty".to_string(),
            ));
        }
        if settings.api_key.trim().is_empty() {
            return self.reject(SessionError::Configuration(
                "api key must not be empty".to_string(),
            ));
        }
        if let Err(e) = config.validate() {
            return self.reject(SessionError::Configuration(e.to_string()));
        }
        if let Err(e) = tools::check_declared(&config.tools) {
            return self.reject(SessionError::Configuration(e.to_string()));
        }

        self.state = SessionState::Connecting;
        self.audit.info(format!(
            "Connecting to {} (model {}, voice {})",
            settings.endpoint, config.model, config.voice
        ));

        let mut channel = match self.transport.open(settings, config) {
            Ok(channel) => channel,
            Err(e) => return self.reject(e),
        };

        let setup = websocket::session_update(config).to_string();
        if let Err(e) = channel.send_text(&setup) {
            channel.close();
            return self.reject(e);
        }

        self.channel = Some(channel);
        self.active_config = Some(config.clone());
        self.dispatched_calls.clear();
        self.state = SessionState::Connected;
        self.audit.info(format!(
            "Connected, {} tools declared",
            config.tools.len()
        ));
        self.notify(SessionNotification::Open);
        Ok(())
    }

    /// Close the session. Calling it when already disconnected does nothing.
    pub fn disconnect(&mut self) {
        let was_open = self.channel.is_some();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.state = SessionState::Disconnected;
        self.active_config = None;

        if was_open {
            self.audit.info("Disconnected");
            self.notify(SessionNotification::Closed);
        }
    }

    /// Channel-level failure: the only thing that ends a session on its own.
    fn channel_failed(&mut self, err: SessionError) {
        self.audit.error(format!("Channel failed: {}", err));
        self.notify(SessionNotification::Error(err.to_string()));
        self.disconnect();
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    /// Read and handle at most one inbound message. Returns true if a message
    /// was handled or the channel changed state.
    pub fn poll(&mut self) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };

        match channel.recv() {
            Ok(Some(text)) => {
                self.handle_inbound_event(&text);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.channel_failed(e);
                true
            }
        }
    }

    /// Route one raw inbound event. Ignored unless the session is Connected.
    pub fn handle_inbound_event(&mut self, raw: &str) {
        if self.state != SessionState::Connected {
            tracing::debug!("[Session] Dropping inbound event while {:?}", self.state);
            return;
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                self.audit.error(format!("Unparsable inbound message: {}", e));
                return;
            }
        };

        let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_string)
        else {
            tracing::debug!("[Session] Ignoring inbound message without a type");
            return;
        };

        // A call id is enough to answer a call whose other fields are broken
        let call_id = value
            .get("call_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let event: InboundEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                self.audit
                    .error(format!("Malformed '{}' event: {}", event_type, e));
                if let (types::FUNCTION_CALL_EVENT, Some(call_id)) =
                    (event_type.as_str(), call_id)
                {
                    let err = ToolError::ArgumentParse(format!("malformed call event: {}", e));
                    self.reject_call(call_id, err);
                }
                return;
            }
        };

        self.notify(SessionNotification::Event(event_type));

        match event {
            InboundEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.handle_function_call(call_id, name, arguments),
            InboundEvent::ResponseDone { response, latency } => {
                let usage = response.as_ref().and_then(|r| r.get("usage"));
                if usage.is_some() || latency.is_some() {
                    let sample = UsageSample::from_usage(usage, latency.as_ref());
                    self.metrics.record(&sample);
                }
            }
            InboundEvent::SessionCreated { .. } => self.audit.info("Session created"),
            InboundEvent::SessionUpdated { .. } => self.audit.info("Session updated"),
            InboundEvent::Error { error } => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                self.audit.error(format!("Server error: {}", message));
                self.notify(SessionNotification::Error(message));
            }
            InboundEvent::Other => {}
        }
    }

    fn handle_function_call(&mut self, call_id: String, name: String, arguments: Value) {
        if !self.dispatched_calls.insert(call_id.clone()) {
            self.audit
                .error(format!("Ignoring repeated call {} for {}", call_id, name));
            return;
        }

        let parsed: Result<ToolArgs, ToolError> = if !self.is_declared(&name) {
            Err(ToolError::UnknownTool(name.clone()))
        } else {
            match arguments {
                Value::String(raw) => tools::parse_arguments(&raw),
                Value::Object(map) => Ok(map),
                Value::Null => Ok(ToolArgs::new()),
                other => Err(ToolError::ArgumentParse(format!(
                    "unexpected arguments value {}",
                    other
                ))),
            }
        };

        let result = match parsed {
            Ok(arguments) => {
                let request = ToolCallRequest {
                    call_id,
                    name,
                    arguments,
                };
                let result = tools::dispatch(&self.vehicle, &request);
                self.audit.tool(format!(
                    "{}({}) -> {}",
                    request.name,
                    Value::Object(request.arguments),
                    result.payload
                ));
                result
            }
            Err(e) => {
                self.audit.tool(format!("{} rejected: {}", name, e));
                ToolCallResult::failed(&call_id, &e)
            }
        };

        self.deliver(&result);
    }

    /// Answer a call that could not be read, at most once per call id.
    fn reject_call(&mut self, call_id: String, err: ToolError) {
        if !self.dispatched_calls.insert(call_id.clone()) {
            return;
        }
        self.audit.tool(format!("call {} rejected: {}", call_id, err));
        self.deliver(&ToolCallResult::failed(&call_id, &err));
    }

    fn is_declared(&self, name: &str) -> bool {
        self.active_config
            .as_ref()
            .is_some_and(|config| config.tool_names().any(|declared| declared == name))
    }

    fn deliver(&mut self, result: &ToolCallResult) {
        if let Err(e) = self.send_tool_result(result) {
            self.audit.error(format!(
                "Result for call {} not delivered: {}",
                result.call_id, e
            ));
        }
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    /// A failed send means the channel is gone and ends the session.
    fn send_all(&mut self, messages: &[Value]) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::ChannelClosed);
        }
        let channel = self.channel.as_mut().ok_or(SessionError::ChannelClosed)?;
        let sent = messages
            .iter()
            .try_for_each(|msg| channel.send_text(&msg.to_string()));
        if let Err(e) = sent {
            self.channel_failed(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Send a tool result keyed by its call id. Not retried on failure.
    pub fn send_tool_result(&mut self, result: &ToolCallResult) -> Result<(), SessionError> {
        self.send_all(&websocket::tool_result_messages(result))
    }

    /// Send a typed user message and ask for a response.
    pub fn send_user_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.send_all(&websocket::user_text_messages(text))?;
        self.audit.info(format!("User: {}", text));
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}
