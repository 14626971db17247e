//! First-party relay connection over a websocket.
//!
//! Inbound frames are JSON objects tagged by `type` (`chat`, `follow`, `sub`,
//! `raid`). Anything else, including malformed JSON, is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BackendKind, InboundEvent, InboundSender, StateCell, Transport, TransportState};
use crate::error::TransportError;
use crate::normalize::normalize_shared;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct FollowEvent {
    #[serde(default)]
    user: String,
}

#[derive(Debug, Deserialize)]
struct SubEvent {
    #[serde(default)]
    user: String,
    #[serde(default = "default_tier")]
    tier: i64,
}

#[derive(Debug, Deserialize)]
struct RaidEvent {
    #[serde(default)]
    raider: String,
    #[serde(default)]
    viewers: i64,
}

fn default_tier() -> i64 {
    1
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundEvent<'a> {
    Chat { message: &'a str },
}

/// Decode one inbound text frame.
pub fn decode_event(text: &str) -> Option<InboundEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping inbound frame: {}", TransportError::Malformed(e));
            return None;
        }
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "chat" => Some(InboundEvent::Chat(normalize_shared(
            Arc::new(value),
            BackendKind::Native,
        ))),
        "follow" => typed::<FollowEvent>(value).map(|e| InboundEvent::Follow { user: e.user }),
        "sub" => typed::<SubEvent>(value).map(|e| InboundEvent::Subscription {
            user: e.user,
            tier: e.tier.clamp(1, 3) as u8,
        }),
        "raid" => typed::<RaidEvent>(value).map(|e| InboundEvent::Raid {
            raider: e.raider,
            viewers: u32::try_from(e.viewers.max(0)).unwrap_or(u32::MAX),
        }),
        other => {
            warn!("Dropping inbound event with unknown type '{}'", other);
            None
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                "Dropping inbound event: {}",
                TransportError::Protocol(e.to_string())
            );
            None
        }
    }
}

/// Serialize outbound chat text for the relay.
pub fn encode_chat(text: &str) -> Result<String, TransportError> {
    Ok(serde_json::to_string(&OutboundEvent::Chat { message: text })?)
}

/// Relay URL with the channel id appended as a query parameter.
pub fn endpoint_url(url: &str, channel_id: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}channel={}", url.trim(), separator, channel_id.trim())
}

pub struct NativeTransport {
    state: StateCell,
    inbound: InboundSender,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl NativeTransport {
    pub fn new(inbound: InboundSender) -> Self {
        Self {
            state: StateCell::new(),
            inbound,
            writer: Mutex::new(None),
            io_task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Open the relay socket for `channel_id`, waiting at most `timeout`.
    ///
    /// Never fails loudly: every failure is logged and reported as `false`.
    pub async fn connect(&self, url: &str, channel_id: &str, timeout: Duration) -> bool {
        if self.cancel.is_cancelled() {
            debug!("Native transport already shut down, not connecting");
            return false;
        }

        let target = endpoint_url(url, channel_id);
        info!("Connecting to relay: {}", url);
        self.state.set(TransportState::Connecting);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            attempt = tokio::time::timeout(timeout, connect_async(target.as_str())) => match attempt {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(TransportError::from(e)),
                Err(_) => Err(TransportError::ConnectTimeout(timeout)),
            },
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(TransportError::Cancelled) => {
                info!("Relay connect cancelled");
                self.state.set(TransportState::Idle);
                return false;
            }
            Err(e) => {
                warn!("Relay connect failed: {}", e);
                self.state.set(TransportState::Failed);
                return false;
            }
        };

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        *self.writer.lock().await = Some(write_tx);
        self.state.set(TransportState::Connected);

        let task = tokio::spawn(run_connection(
            stream,
            write_rx,
            self.inbound.clone(),
            self.state.clone(),
            self.cancel.child_token(),
        ));
        *self.io_task.lock().await = Some(task);

        info!("Connected to relay channel {}", channel_id);
        true
    }
}

#[async_trait]
impl Transport for NativeTransport {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn send(&self, text: &str) -> bool {
        if !self.is_connected() {
            debug!("Relay socket not open, dropping outbound message");
            return false;
        }
        let json = match encode_chat(text) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode outbound message: {}", e);
                return false;
            }
        };
        match self.writer.lock().await.as_ref() {
            Some(writer) => writer.send(json).is_ok(),
            None => false,
        }
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.writer.lock().await.take();
        if let Some(task) = self.io_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Relay connection task ended abnormally: {}", e);
            }
        }
        self.state.set(TransportState::Idle);
        debug!("Native transport shut down");
    }
}

/// Pump frames both ways until the socket closes or `cancel` fires.
async fn run_connection(
    stream: WsStream,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    inbound: InboundSender,
    state: StateCell,
    cancel: CancellationToken,
) {
    let (mut sink, mut reader) = stream.split();

    let result: Result<(), TransportError> = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break Ok(());
            }
            outgoing = write_rx.recv() => match outgoing {
                Some(json) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_event(text.as_str()) {
                        if inbound.send(event).is_err() {
                            debug!("Inbound receiver dropped, closing relay connection");
                            break Ok(());
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    break Err(TransportError::Closed(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Err(TransportError::Closed("stream ended".to_string())),
            },
        }
    };

    match result {
        Ok(()) => {
            debug!("Relay connection closed");
            state.set(TransportState::Idle);
        }
        Err(e) => {
            warn!("Relay connection lost: {}", e);
            state.set(TransportState::Failed);
        }
    }
}
