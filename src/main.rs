use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beatchat::bot::ChatBot;
use beatchat::commands::exclusive::ExclusiveGroups;
use beatchat::commands::song_request::parse_song_request;
use beatchat::commands::{CommandContext, CommandDescriptor, CommandHandler, FnHandler};
use beatchat::config::Config;
use beatchat::message::ChatMessage;
use beatchat::scheduler::EffectScheduler;

const SPEED_GROUP: &str = "speed";
const SPEED_EFFECT_DURATION: Duration = Duration::from_secs(30);

/// `!sr <code> [difficulty] [m:ss[-m:ss]]`
struct SongRequestHandler;

#[async_trait]
impl CommandHandler for SongRequestHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        let Some(request) = parse_song_request(ctx.text) else {
            ctx.reply(&format!("!!@{} usage: !sr <code> [difficulty] [m:ss-m:ss]", ctx.message.sender))
                .await;
            return Ok(false);
        };
        info!("Song request from {}: {:?}", ctx.message.sender, request);
        let difficulty = request
            .difficulty
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        ctx.reply(&format!("!!@{} queued {}{}", ctx.message.sender, request.code, difficulty))
            .await;
        Ok(true)
    }
}

/// Song speed modifiers. Only one may be active at a time; the effect
/// reverts on its own after a fixed duration.
struct SpeedHandler {
    groups: ExclusiveGroups,
    effects: Arc<EffectScheduler>,
}

#[async_trait]
impl CommandHandler for SpeedHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        let group = ctx.exclusive_group.unwrap_or(SPEED_GROUP);
        let lease = match self.groups.try_enter(group, ctx.command) {
            Ok(lease) => lease,
            Err(holder) => {
                ctx.reply(&format!("!!{} is already active", holder)).await;
                return Ok(false);
            }
        };

        info!("Applying {} for {:?}", ctx.command, SPEED_EFFECT_DURATION);
        self.effects
            .schedule(ctx.command, SPEED_EFFECT_DURATION, async move {
                info!("Reverting {}", lease.command());
                drop(lease);
            })
            .await;
        Ok(true)
    }
}

async fn register_commands(bot: &ChatBot, effects: Arc<EffectScheduler>) {
    let dispatcher = bot.dispatcher();
    dispatcher
        .register(CommandDescriptor::new(
            "ping",
            Arc::new(FnHandler(|msg: &ChatMessage, _: &str| {
                info!("Ping from {}", msg.sender);
                true
            })),
        ))
        .await;
    dispatcher
        .register(
            CommandDescriptor::new("sr", Arc::new(SongRequestHandler)).with_aliases(["bsr"]),
        )
        .await;

    let groups = ExclusiveGroups::new();
    for name in ["faster", "slower"] {
        let handler = Arc::new(SpeedHandler {
            groups: groups.clone(),
            effects: effects.clone(),
        });
        dispatcher
            .register(CommandDescriptor::new(name, handler).in_group(SPEED_GROUP))
            .await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,beatchat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Relay configured: {}", config.native.is_configured());
    info!("  Bridge fallback: {}", config.bridge.enabled);
    info!("  Global cooldown: {}s", config.commands.global_cooldown_secs);

    // Standalone runs have no host process to bridge into
    let bot = Arc::new(ChatBot::new(&config, None));
    let effects = Arc::new(EffectScheduler::new());
    register_commands(&bot, effects.clone()).await;

    let backend = bot.start().await;
    info!("Chat bot is running on backend: {}", backend);

    let cancel = CancellationToken::new();
    let event_loop = tokio::spawn({
        let bot = bot.clone();
        let cancel = cancel.clone();
        async move { bot.run(cancel).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down...");

    cancel.cancel();
    event_loop.await.context("Event loop panicked")?;
    effects.shutdown().await;
    bot.shutdown().await;

    Ok(())
}
