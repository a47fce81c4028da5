//! Scripted in-memory transport for driving the session controller in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use realtime_car_demo::config::SessionConfig;
use realtime_car_demo::session::{ConnectionSettings, RealtimeChannel, Transport};
use realtime_car_demo::SessionError;

#[derive(Clone, Default)]
pub struct Script {
    inbound: Arc<Mutex<VecDeque<Result<Option<String>, SessionError>>>>,
    outbound: Arc<Mutex<Vec<String>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_open: Arc<Mutex<Option<SessionError>>>,
    fail_send: Arc<AtomicBool>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(ScriptedTransport {
            script: self.clone(),
        })
    }

    pub fn push_event(&self, event: Value) {
        self.inbound
            .lock()
            .unwrap()
            .push_back(Ok(Some(event.to_string())));
    }

    pub fn push_raw(&self, raw: &str) {
        self.inbound.lock().unwrap().push_back(Ok(Some(raw.to_string())));
    }

    pub fn push_failure(&self, err: SessionError) {
        self.inbound.lock().unwrap().push_back(Err(err));
    }

    pub fn fail_next_open(&self, err: SessionError) {
        *self.fail_open.lock().unwrap() = Some(err);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Value> {
        self.outbound
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent().into_iter().filter(|m| m["type"] == kind).collect()
    }

    /// `function_call_output` items, in send order
    pub fn tool_outputs(&self) -> Vec<Value> {
        self.sent_of_type("conversation.item.create")
            .into_iter()
            .filter(|m| m["item"]["type"] == "function_call_output")
            .map(|m| m["item"].clone())
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport {
    script: Script,
}

impl Transport for ScriptedTransport {
    fn open(
        &self,
        _settings: &ConnectionSettings,
        _config: &SessionConfig,
    ) -> Result<Box<dyn RealtimeChannel>, SessionError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.script.fail_open.lock().unwrap().take() {
            return Err(err);
        }
        Ok(Box::new(ScriptedChannel {
            script: self.script.clone(),
            closed: false,
        }))
    }
}

struct ScriptedChannel {
    script: Script,
    closed: bool,
}

impl RealtimeChannel for ScriptedChannel {
    fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ChannelClosed);
        }
        if self.script.fail_send.load(Ordering::SeqCst) {
            return Err(SessionError::Channel("broken pipe".to_string()));
        }
        self.script.outbound.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<String>, SessionError> {
        self.script
            .inbound
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings::new("wss://realtime.example.com/v1/realtime", "test-key")
}
