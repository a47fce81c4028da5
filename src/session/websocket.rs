//! WebSocket channel to the realtime API and the outbound message builders.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::types::ConnectionSettings;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::tools::ToolCallResult;

/// Read timeout once the session is live, keeps the event loop responsive
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A bidirectional text channel carrying JSON events.
pub trait RealtimeChannel: Send {
    fn send_text(&mut self, text: &str) -> Result<(), SessionError>;

    /// Next inbound text message. `Ok(None)` when nothing arrived within the
    /// poll window.
    fn recv(&mut self) -> Result<Option<String>, SessionError>;

    /// Close the channel. Closing twice is a no-op.
    fn close(&mut self);
}

/// Opens channels. The controller only ever talks to this seam.
pub trait Transport: Send {
    fn open(
        &self,
        settings: &ConnectionSettings,
        config: &SessionConfig,
    ) -> Result<Box<dyn RealtimeChannel>, SessionError>;
}

// ============================================================================
// URL
// ============================================================================

/// Endpoint URL with the model (or deployment) query parameter filled in.
pub fn build_url(
    settings: &ConnectionSettings,
    config: &SessionConfig,
) -> Result<url::Url, SessionError> {
    let mut url = url::Url::parse(settings.endpoint.trim())
        .map_err(|e| SessionError::Configuration(format!("invalid endpoint: {}", e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(SessionError::Configuration(format!(
                "endpoint scheme must be ws or wss, got '{}'",
                other
            )))
        }
    }

    let has_deployment = url.query_pairs().any(|(k, _)| k == "deployment");
    let has_model = url.query_pairs().any(|(k, _)| k == "model");
    match &settings.deployment {
        Some(deployment) if !has_deployment => {
            url.query_pairs_mut().append_pair("deployment", deployment);
        }
        None if !has_model => {
            url.query_pairs_mut().append_pair("model", &config.model);
        }
        _ => {}
    }

    Ok(url)
}

// ============================================================================
// CONNECTION
// ============================================================================

fn channel_err(context: &str, e: impl std::fmt::Display) -> SessionError {
    SessionError::Channel(format!("{}: {}", context, e))
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Blocking tungstenite client over native-tls.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(
        &self,
        settings: &ConnectionSettings,
        config: &SessionConfig,
    ) -> Result<Box<dyn RealtimeChannel>, SessionError> {
        let socket = connect_realtime_websocket(settings, config)?;
        Ok(Box::new(WsChannel {
            socket,
            closed: false,
        }))
    }
}

/// Create the WebSocket connection. Resolution, TCP connect, TLS and the
/// upgrade handshake share one deadline of `settings.connect_timeout`.
pub fn connect_realtime_websocket(
    settings: &ConnectionSettings,
    config: &SessionConfig,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, SessionError> {
    let timeout = settings.connect_timeout;
    let deadline = Instant::now() + timeout;
    let url = build_url(settings, config)?;
    let host = url
        .host_str()
        .ok_or_else(|| SessionError::Configuration("no host in endpoint".to_string()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    let addr = resolve(&host, port, remaining(deadline, timeout)?, timeout)?;

    let tcp_stream =
        TcpStream::connect_timeout(&addr, remaining(deadline, timeout)?).map_err(|e| {
            if is_timeout(e.kind()) {
                SessionError::ConnectionTimeout(timeout)
            } else {
                channel_err("connect", e)
            }
        })?;
    tcp_stream
        .set_nodelay(true)
        .map_err(|e| channel_err("socket options", e))?;
    set_stream_timeouts(&tcp_stream, remaining(deadline, timeout)?)
        .map_err(|e| channel_err("socket options", e))?;

    let stream = if url.scheme() == "wss" {
        let connector = native_tls::TlsConnector::new().map_err(|e| channel_err("tls", e))?;
        let tls_stream = connector.connect(&host, tcp_stream).map_err(|e| match e {
            native_tls::HandshakeError::WouldBlock(_) => SessionError::ConnectionTimeout(timeout),
            native_tls::HandshakeError::Failure(e) => channel_err("tls handshake", e),
        })?;
        MaybeTlsStream::NativeTls(tls_stream)
    } else {
        MaybeTlsStream::Plain(tcp_stream)
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| channel_err("request", e))?;
    let key = HeaderValue::from_str(&settings.api_key)
        .map_err(|_| SessionError::Configuration("api key is not a valid header".to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
        .map_err(|_| SessionError::Configuration("api key is not a valid header".to_string()))?;
    let headers = request.headers_mut();
    headers.insert("api-key", key);
    headers.insert("Authorization", bearer);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    if let Some(tcp) = inner_tcp(&stream) {
        set_stream_timeouts(tcp, remaining(deadline, timeout)?)
            .map_err(|e| channel_err("socket options", e))?;
    }

    let (socket, _response) = tungstenite::client::client(request, stream).map_err(|e| match e {
        HandshakeError::Interrupted(_) => SessionError::ConnectionTimeout(timeout),
        HandshakeError::Failure(tungstenite::Error::Io(ref io)) if is_timeout(io.kind()) => {
            SessionError::ConnectionTimeout(timeout)
        }
        HandshakeError::Failure(e) => channel_err("handshake", e),
    })?;

    if let Some(tcp) = inner_tcp(socket.get_ref()) {
        tcp.set_read_timeout(Some(POLL_READ_TIMEOUT))
            .and_then(|_| tcp.set_write_timeout(Some(WRITE_TIMEOUT)))
            .map_err(|e| channel_err("socket options", e))?;
    }
    Ok(socket)
}

/// Time left before `deadline`, or a timeout error once it has passed
fn remaining(deadline: Instant, timeout: Duration) -> Result<Duration, SessionError> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or(SessionError::ConnectionTimeout(timeout))
}

/// Resolve on a helper thread so a stuck resolver cannot outlive `wait`.
fn resolve(
    host: &str,
    port: u16,
    wait: Duration,
    timeout: Duration,
) -> Result<SocketAddr, SessionError> {
    let (tx, rx) = mpsc::channel();
    let target = host.to_string();
    std::thread::spawn(move || {
        let result = (target.as_str(), port)
            .to_socket_addrs()
            .map(|mut addrs| addrs.next());
        let _ = tx.send(result);
    });

    match rx.recv_timeout(wait) {
        Ok(Ok(Some(addr))) => Ok(addr),
        Ok(Ok(None)) => Err(SessionError::Channel(format!(
            "failed to resolve hostname: {}",
            host
        ))),
        Ok(Err(e)) => Err(channel_err("resolve", e)),
        Err(RecvTimeoutError::Timeout) => Err(SessionError::ConnectionTimeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(SessionError::Channel(format!(
            "resolver for {} stopped",
            host
        ))),
    }
}

fn set_stream_timeouts(tcp: &TcpStream, limit: Duration) -> std::io::Result<()> {
    tcp.set_read_timeout(Some(limit))?;
    tcp.set_write_timeout(Some(limit))
}

fn inner_tcp(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(tcp) => Some(tcp),
        MaybeTlsStream::NativeTls(tls) => Some(tls.get_ref()),
        _ => None,
    }
}

pub struct WsChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl RealtimeChannel for WsChannel {
    fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ChannelClosed);
        }
        self.socket
            .send(Message::Text(text.to_string().into()))
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    SessionError::ChannelClosed
                }
                other => channel_err("send", other),
            })
    }

    fn recv(&mut self) -> Result<Option<String>, SessionError> {
        if self.closed {
            return Err(SessionError::ChannelClosed);
        }
        match self.socket.read() {
            Ok(Message::Text(msg)) => Ok(Some(msg.as_str().to_string())),
            // Some gateways deliver JSON events as binary frames
            Ok(Message::Binary(data)) => Ok(String::from_utf8(data.to_vec()).ok()),
            Ok(Message::Close(frame)) => {
                self.closed = true;
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "no reason given".to_string());
                Err(SessionError::Channel(format!("closed by server: {}", reason)))
            }
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(ref e)) if is_timeout(e.kind()) => Ok(None),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.closed = true;
                Err(SessionError::ChannelClosed)
            }
            Err(e) => {
                self.closed = true;
                Err(channel_err("read", e))
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

// ============================================================================
// OUTBOUND MESSAGES
// ============================================================================

/// `session.update` carrying the whole config, tools included.
pub fn session_update(config: &SessionConfig) -> Value {
    let tools: Vec<Value> = config
        .tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters
            })
        })
        .collect();

    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": config.instructions,
            "voice": config.voice,
            "input_audio_format": config.input_audio_format,
            "output_audio_format": config.output_audio_format,
            "turn_detection": {
                "type": config.turn_detection.kind,
                "threshold": config.turn_detection.threshold,
                "prefix_padding_ms": config.turn_detection.prefix_padding_ms,
                "silence_duration_ms": config.turn_detection.silence_duration_ms
            },
            "tools": tools,
            "tool_choice": "auto"
        }
    })
}

/// The function output item followed by a request to continue the response.
pub fn tool_result_messages(result: &ToolCallResult) -> [Value; 2] {
    [
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": result.call_id,
                "output": result.payload.to_string()
            }
        }),
        json!({ "type": "response.create" }),
    ]
}

/// A typed user message followed by a response request.
pub fn user_text_messages(text: &str) -> [Value; 2] {
    [
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }]
            }
        }),
        json!({ "type": "response.create" }),
    ]
}
