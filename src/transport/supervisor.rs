use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bridge::BridgedTransport;
use super::native::NativeTransport;
use super::sdk::HostModules;
use super::{BackendKind, InboundSender, Transport};
use crate::config::{BridgeConfig, NativeConfig};
use crate::outbound::{split_message, ChatOutbound, MAX_MESSAGE_LEN};

/// Picks the chat backend and owns it for the lifetime of a run.
///
/// Native relay first, then the host's chat SDK if fallback is allowed.
/// When both fail the active backend stays `None` until [`restart`] is
/// called; nothing is retried automatically.
///
/// [`restart`]: TransportSupervisor::restart
pub struct TransportSupervisor {
    native: NativeConfig,
    bridge: BridgeConfig,
    host: Option<Arc<dyn HostModules>>,
    inbound: InboundSender,
    active: RwLock<Option<Arc<dyn Transport>>>,
    /// Transport being brought up, so shutdown can abort it
    pending: Mutex<Option<Arc<dyn Transport>>>,
    /// Cancelled by shutdown to abandon the current startup sequence
    run: Mutex<CancellationToken>,
}

impl TransportSupervisor {
    pub fn new(
        native: NativeConfig,
        bridge: BridgeConfig,
        host: Option<Arc<dyn HostModules>>,
        inbound: InboundSender,
    ) -> Self {
        Self {
            native,
            bridge,
            host,
            inbound,
            active: RwLock::new(None),
            pending: Mutex::new(None),
            run: Mutex::new(CancellationToken::new()),
        }
    }

    pub async fn active_backend(&self) -> BackendKind {
        self.active
            .read()
            .await
            .as_ref()
            .map(|t| t.kind())
            .unwrap_or(BackendKind::None)
    }

    /// Select and bring up a backend. Never fails; `BackendKind::None` means
    /// no backend could be started.
    pub async fn start(&self) -> BackendKind {
        if let Some(current) = self.active.read().await.as_ref() {
            warn!("Transport supervisor already running on {}", current.kind());
            return current.kind();
        }
        let run = CancellationToken::new();
        *self.run.lock().await = run.clone();

        if self.native.is_configured() {
            let native = Arc::new(NativeTransport::new(self.inbound.clone()));
            self.set_pending(Some(native.clone())).await;
            let connected = native
                .connect(
                    &self.native.url,
                    &self.native.channel_id,
                    self.native.connect_timeout(),
                )
                .await;
            self.set_pending(None).await;
            if connected {
                return self.activate(native, &run).await;
            }
            // Fully tear the loser down before trying anything else
            native.shutdown().await;
            if run.is_cancelled() {
                info!("Transport startup cancelled");
                return BackendKind::None;
            }
            info!("Native transport unavailable");
        } else {
            debug!("Native relay not configured, skipping");
        }

        match (&self.host, self.bridge.enabled) {
            (Some(host), true) => {
                let bridge = Arc::new(BridgedTransport::new(
                    host.clone(),
                    self.bridge.clone(),
                    self.inbound.clone(),
                ));
                self.set_pending(Some(bridge.clone())).await;
                let ready = bridge
                    .poll_until_ready(self.bridge.max_attempts, self.bridge.poll_interval())
                    .await;
                let bound = ready && bridge.bind().await;
                self.set_pending(None).await;
                if bound {
                    return self.activate(bridge, &run).await;
                }
                bridge.shutdown().await;
                if run.is_cancelled() {
                    info!("Transport startup cancelled");
                    return BackendKind::None;
                }
                info!("Bridged transport unavailable");
            }
            (None, true) => debug!("No host chat SDK available, fallback skipped"),
            (_, false) => debug!("Fallback to the host chat SDK is disabled"),
        }

        warn!("No chat backend available; chat commands are disabled until restart");
        BackendKind::None
    }

    /// Install `transport` unless `run` was cancelled meanwhile. Checked
    /// under the write lock so a concurrent shutdown either sees it installed
    /// or prevents the install.
    async fn activate(
        &self,
        transport: Arc<dyn Transport>,
        run: &CancellationToken,
    ) -> BackendKind {
        let kind = transport.kind();
        {
            let mut active = self.active.write().await;
            if !run.is_cancelled() {
                *active = Some(transport);
                info!("Active chat backend: {}", kind);
                return kind;
            }
        }
        info!("Transport startup cancelled, discarding {} transport", kind);
        transport.shutdown().await;
        BackendKind::None
    }

    async fn set_pending(&self, transport: Option<Arc<dyn Transport>>) {
        *self.pending.lock().await = transport;
    }

    /// Send through the active backend. Dropped (and logged) when there is
    /// no backend or it is not connected.
    pub async fn send(&self, text: &str) -> bool {
        let active = self.active.read().await;
        let Some(transport) = active.as_ref() else {
            warn!("No active chat backend, dropping outbound message");
            return false;
        };
        if !transport.is_connected() {
            warn!(
                "Chat backend {} is not connected, dropping outbound message",
                transport.kind()
            );
            return false;
        }
        transport.send(text).await
    }

    /// Abort any startup in progress and tear down the active backend.
    pub async fn shutdown(&self) {
        self.run.lock().await.cancel();
        let pending = self.pending.lock().await.take();
        if let Some(pending) = pending {
            pending.shutdown().await;
        }
        let active = self.active.write().await.take();
        if let Some(active) = active {
            info!("Shutting down {} transport", active.kind());
            active.shutdown().await;
        }
    }

    /// The only way out of the `None` state.
    pub async fn restart(&self) -> BackendKind {
        self.shutdown().await;
        self.start().await
    }
}

#[async_trait]
impl ChatOutbound for TransportSupervisor {
    async fn send_chat_message(&self, text: &str) {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            if !self.send(&chunk).await {
                break;
            }
        }
    }
}
