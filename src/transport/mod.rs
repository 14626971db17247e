pub mod bridge;
pub mod native;
pub mod sdk;
pub mod supervisor;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::ChatMessage;

/// Which backend currently carries chat traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    #[default]
    None,
    Native,
    Bridged,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::None => write!(f, "none"),
            BackendKind::Native => write!(f, "native"),
            BackendKind::Bridged => write!(f, "bridged"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Lock-free state shared between a transport and its background tasks.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    pub(crate) fn get(&self) -> TransportState {
        match self.0.load(Ordering::Acquire) {
            1 => TransportState::Connecting,
            2 => TransportState::Connected,
            3 => TransportState::Failed,
            _ => TransportState::Idle,
        }
    }

    pub(crate) fn set(&self, state: TransportState) {
        let raw = match state {
            TransportState::Idle => 0,
            TransportState::Connecting => 1,
            TransportState::Connected => 2,
            TransportState::Failed => 3,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// One event delivered by whichever transport is active.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Chat(ChatMessage),
    Follow { user: String },
    Subscription { user: String, tier: u8 },
    Raid { raider: String, viewers: u32 },
}

pub type InboundSender = tokio::sync::mpsc::UnboundedSender<InboundEvent>;
pub type InboundReceiver = tokio::sync::mpsc::UnboundedReceiver<InboundEvent>;

/// A chat backend the supervisor can activate.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn state(&self) -> TransportState;

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Best-effort send. Returns whether the text was handed to the backend.
    async fn send(&self, text: &str) -> bool;

    /// Stop all background work and release backend resources.
    async fn shutdown(&self);
}
