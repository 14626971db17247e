//! Transport over the host's own chat SDK, bound at runtime.
//!
//! Readiness means: the SDK module is loaded, its service type can be found,
//! and the service exposes the message-received event. Binding then looks
//! up three capabilities independently (send, message-received, loading
//! state); any of them may be missing without affecting the others.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sdk::{EventCallback, HostModules, ParamKind, SdkEvent, SdkMember, SdkMethod, SdkService};
use super::{BackendKind, InboundEvent, InboundSender, StateCell, Transport, TransportState};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::normalize::normalize_shared;

/// Which capabilities ended up bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeCapabilities {
    pub send: bool,
    pub receive: bool,
    pub loading_state: bool,
}

struct SendCapability {
    name: String,
    method: Arc<dyn SdkMethod>,
}

impl SendCapability {
    /// Arguments for the method: the text in its `Text` slot, `null` for a
    /// channel (broadcast to all).
    fn args(&self, text: &str) -> Vec<Value> {
        self.method
            .params()
            .iter()
            .map(|p| match p {
                ParamKind::Text => Value::String(text.to_string()),
                _ => Value::Null,
            })
            .collect()
    }
}

struct Subscription {
    event: Arc<dyn SdkEvent>,
    token: u64,
}

#[derive(Default)]
struct Bindings {
    send: Option<SendCapability>,
    message: Option<Subscription>,
    loading: Option<Subscription>,
}

pub struct BridgedTransport {
    host: Arc<dyn HostModules>,
    config: BridgeConfig,
    inbound: InboundSender,
    state: StateCell,
    cancel: CancellationToken,
    service: Mutex<Option<Arc<dyn SdkService>>>,
    bindings: Mutex<Bindings>,
}

impl BridgedTransport {
    pub fn new(host: Arc<dyn HostModules>, config: BridgeConfig, inbound: InboundSender) -> Self {
        Self {
            host,
            config,
            inbound,
            state: StateCell::new(),
            cancel: CancellationToken::new(),
            service: Mutex::new(None),
            bindings: Mutex::new(Bindings::default()),
        }
    }

    /// Check the three readiness conditions once.
    fn probe(&self) -> Result<Arc<dyn SdkService>, BridgeError> {
        if !self.host.is_loaded(&self.config.module_id) {
            return Err(BridgeError::ModuleNotLoaded(self.config.module_id.clone()));
        }
        let service = self
            .host
            .find_service(&self.config.module_id, &self.config.service_type)
            .ok_or_else(|| BridgeError::ServiceNotFound(self.config.service_type.clone()))?;
        match service.member(&self.config.message_capability) {
            Some(SdkMember::Event(_)) => Ok(service),
            Some(other) => Err(BridgeError::ShapeMismatch {
                name: self.config.message_capability.clone(),
                detail: format!("expected an event, found a {}", other.kind_name()),
            }),
            None => Err(BridgeError::CapabilityNotFound(
                self.config.message_capability.clone(),
            )),
        }
    }

    /// Poll for the SDK up to `max_attempts` times, `interval` apart.
    ///
    /// Once ready, waits the configured grace period so the SDK can finish
    /// its own startup. Running out of attempts is terminal for this
    /// transport.
    pub async fn poll_until_ready(&self, max_attempts: u32, interval: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.state.set(TransportState::Connecting);
        info!(
            "Waiting for chat SDK '{}' (up to {} attempts)",
            self.config.module_id, max_attempts
        );

        for attempt in 1..=max_attempts {
            match self.probe() {
                Ok(service) => {
                    *self.service.lock().await = Some(service);
                    info!("Chat SDK ready after {} attempt(s)", attempt);
                    return self.wait(self.config.ready_grace()).await;
                }
                Err(e) => debug!(
                    "Chat SDK not ready (attempt {}/{}): {}",
                    attempt, max_attempts, e
                ),
            }
            if attempt < max_attempts && !self.wait(interval).await {
                return false;
            }
        }

        warn!(
            "Timed out waiting for chat SDK '{}' after {} attempts",
            self.config.module_id, max_attempts
        );
        self.state.set(TransportState::Failed);
        false
    }

    /// Sleep for `delay`; `false` if cancelled meanwhile.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Chat SDK readiness wait cancelled");
                self.state.set(TransportState::Idle);
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Discover and attach every capability. Succeeds when at least sending
    /// or receiving is available.
    pub async fn bind(&self) -> bool {
        let Some(service) = self.service.lock().await.clone() else {
            warn!("Cannot bind chat SDK before it is ready");
            return false;
        };

        let send = match discover_send(service.as_ref(), &self.config.send_capability) {
            Ok(capability) => {
                info!("Bound outbound chat via '{}'", capability.name);
                Some(capability)
            }
            Err(e) => {
                warn!("Outbound chat unavailable: {}", e);
                None
            }
        };

        let message = match bind_message_received(
            service.as_ref(),
            &self.config.message_capability,
            self.inbound.clone(),
        ) {
            Ok(subscription) => {
                info!("Subscribed to '{}'", self.config.message_capability);
                Some(subscription)
            }
            Err(e) => {
                warn!("Inbound chat unavailable: {}", e);
                None
            }
        };

        let loading = match bind_loading_state(service.as_ref(), &self.config.loading_capability) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                debug!("Loading-state notifications unavailable: {}", e);
                None
            }
        };

        let bound = send.is_some() || message.is_some();
        *self.bindings.lock().await = Bindings {
            send,
            message,
            loading,
        };

        if bound {
            self.state.set(TransportState::Connected);
        } else {
            warn!("Chat SDK exposes neither sending nor receiving");
            self.state.set(TransportState::Failed);
        }
        bound
    }

    pub async fn capabilities(&self) -> BridgeCapabilities {
        let bindings = self.bindings.lock().await;
        BridgeCapabilities {
            send: bindings.send.is_some(),
            receive: bindings.message.is_some(),
            loading_state: bindings.loading.is_some(),
        }
    }
}

#[async_trait]
impl Transport for BridgedTransport {
    fn kind(&self) -> BackendKind {
        BackendKind::Bridged
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn send(&self, text: &str) -> bool {
        let bindings = self.bindings.lock().await;
        let Some(capability) = bindings.send.as_ref() else {
            debug!("Chat SDK has no send capability, dropping outbound message");
            return false;
        };
        match capability.method.invoke(capability.args(text)) {
            Ok(_) => true,
            Err(source) => {
                let e = BridgeError::Invocation {
                    name: capability.name.clone(),
                    source,
                };
                warn!("Outbound chat failed: {:#}", anyhow::Error::from(e));
                false
            }
        }
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let bindings = std::mem::take(&mut *self.bindings.lock().await);
        for subscription in [bindings.message, bindings.loading].into_iter().flatten() {
            subscription.event.unsubscribe(subscription.token);
        }
        self.service.lock().await.take();
        self.state.set(TransportState::Idle);
        debug!("Bridged transport shut down");
    }
}

fn find_event(service: &dyn SdkService, name: &str) -> Result<Arc<dyn SdkEvent>, BridgeError> {
    match service.member(name) {
        Some(SdkMember::Event(event)) => Ok(event),
        Some(other) => Err(BridgeError::ShapeMismatch {
            name: name.to_string(),
            detail: format!("expected an event, found a {}", other.kind_name()),
        }),
        None => Err(BridgeError::CapabilityNotFound(name.to_string())),
    }
}

fn discover_send(service: &dyn SdkService, name: &str) -> Result<SendCapability, BridgeError> {
    let method = match service.member(name) {
        Some(SdkMember::Method(method)) => method,
        Some(other) => {
            return Err(BridgeError::ShapeMismatch {
                name: name.to_string(),
                detail: format!("expected a method, found a {}", other.kind_name()),
            })
        }
        None => return Err(BridgeError::CapabilityNotFound(name.to_string())),
    };

    let params = method.params();
    let texts = params.iter().filter(|p| **p == ParamKind::Text).count();
    let fillable = params
        .iter()
        .all(|p| matches!(p, ParamKind::Text | ParamKind::Channel));
    if texts != 1 || !fillable {
        return Err(BridgeError::ShapeMismatch {
            name: name.to_string(),
            detail: format!("cannot call with parameters {:?}", params),
        });
    }

    Ok(SendCapability {
        name: name.to_string(),
        method,
    })
}

/// Subscribe to the message event with a callback built for the event's
/// runtime parameter list.
fn bind_message_received(
    service: &dyn SdkService,
    name: &str,
    inbound: InboundSender,
) -> Result<Subscription, BridgeError> {
    let event = find_event(service, name)?;
    let params = event.params();
    let Some(index) = params.iter().position(|p| *p == ParamKind::Message) else {
        return Err(BridgeError::ShapeMismatch {
            name: name.to_string(),
            detail: format!("no message parameter in {:?}", params),
        });
    };
    let arity = params.len();

    let callback: EventCallback = Arc::new(move |args: Vec<Value>| {
        if args.len() != arity {
            warn!(
                "Chat SDK delivered {} argument(s), expected {}; dropping message",
                args.len(),
                arity
            );
            return;
        }
        let raw = args.into_iter().nth(index).unwrap_or(Value::Null);
        let message = normalize_shared(Arc::new(raw), BackendKind::Bridged);
        if inbound.send(InboundEvent::Chat(message)).is_err() {
            debug!("Inbound receiver dropped, ignoring chat SDK message");
        }
    });

    let token = event.subscribe(callback).map_err(|source| BridgeError::Invocation {
        name: name.to_string(),
        source,
    })?;
    Ok(Subscription { event, token })
}

fn bind_loading_state(service: &dyn SdkService, name: &str) -> Result<Subscription, BridgeError> {
    let event = find_event(service, name)?;
    let Some(index) = event.params().iter().position(|p| *p == ParamKind::Bool) else {
        return Err(BridgeError::ShapeMismatch {
            name: name.to_string(),
            detail: format!("no bool parameter in {:?}", event.params()),
        });
    };

    let callback: EventCallback = Arc::new(move |args: Vec<Value>| {
        match args.get(index).and_then(Value::as_bool) {
            Some(true) => info!("Chat SDK is loading"),
            Some(false) => info!("Chat SDK finished loading"),
            None => debug!("Chat SDK loading state changed: {:?}", args),
        }
    });

    let token = event.subscribe(callback).map_err(|source| BridgeError::Invocation {
        name: name.to_string(),
        source,
    })?;
    Ok(Subscription { event, token })
}
