use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::dispatcher::{CommandDispatcher, DispatchOutcome};
use crate::config::Config;
use crate::outbound::ChatOutbound;
use crate::transport::sdk::HostModules;
use crate::transport::supervisor::TransportSupervisor;
use crate::transport::{BackendKind, InboundEvent, InboundReceiver};

/// Receives every inbound event before command dispatch (overlays,
/// follower alerts and the like).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: &InboundEvent);
}

/// Wires the transport supervisor to the command dispatcher.
///
/// All inbound events funnel through one channel and are handled one at a
/// time by [`ChatBot::run`], so dispatch never runs concurrently with itself.
pub struct ChatBot {
    supervisor: Arc<TransportSupervisor>,
    dispatcher: Arc<CommandDispatcher>,
    sink: Option<Arc<dyn EventSink>>,
    inbound: Mutex<Option<InboundReceiver>>,
}

impl ChatBot {
    pub fn new(config: &Config, host: Option<Arc<dyn HostModules>>) -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let supervisor = Arc::new(TransportSupervisor::new(
            config.native.clone(),
            config.bridge.clone(),
            host,
            tx,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            config.dispatch_config(),
            supervisor.clone() as Arc<dyn ChatOutbound>,
        ));
        Self {
            supervisor,
            dispatcher,
            sink: None,
            inbound: Mutex::new(Some(rx)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn supervisor(&self) -> &Arc<TransportSupervisor> {
        &self.supervisor
    }

    pub async fn start(&self) -> BackendKind {
        self.supervisor.start().await
    }

    /// Consume inbound events until `cancel` fires or every sender is gone.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut inbound) = self.inbound.lock().await.take() else {
            warn!("Chat bot event loop is already running");
            return;
        };

        info!("Chat bot event loop started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event).await;
        }

        *self.inbound.lock().await = Some(inbound);
        info!("Chat bot event loop stopped");
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Option<DispatchOutcome> {
        if let Some(sink) = &self.sink {
            sink.on_event(&event).await;
        }

        match event {
            InboundEvent::Chat(message) => {
                let outcome = self.dispatcher.dispatch(&message.text, &message).await;
                debug!("{} from {}: {:?}", message.origin, message.sender, outcome);
                Some(outcome)
            }
            InboundEvent::Follow { user } => {
                info!("New follower: {}", user);
                None
            }
            InboundEvent::Subscription { user, tier } => {
                info!("New tier {} subscription: {}", tier, user);
                None
            }
            InboundEvent::Raid { raider, viewers } => {
                info!("Raid from {} with {} viewers", raider, viewers);
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
