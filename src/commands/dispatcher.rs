use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::cooldown::CooldownEngine;
use super::{CommandContext, CommandDescriptor, CommandHandler, CommandRegistry};
use crate::config::DispatchConfig;
use crate::message::ChatMessage;
use crate::outbound::ChatOutbound;

/// Prefix of every command.
pub const COMMAND_PREFIX: char = '!';
/// Prefix reserved for system / echo text; never parsed as a command.
pub const RESERVED_PREFIX: &str = "!!";

/// What happened to one piece of inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not command-shaped (no `!`, or the reserved `!!`).
    NotACommand,
    /// No command registered under this name.
    Unknown(String),
    /// Rejected because the command is still cooling down.
    CoolingDown { command: String, remaining: Duration },
    /// The handler ran but its effect did not take hold.
    Failed { command: String },
    /// The handler succeeded; `cooldown` is what got armed, if anything.
    Executed {
        command: String,
        cooldown: Option<Duration>,
    },
}

/// Routes `!command` text to registered handlers under the cooldown policy.
///
/// The dispatcher exclusively owns the registry and the cooldown map; all
/// callers go through [`CommandDispatcher::dispatch`], and dispatches run one
/// at a time so the cooldown check and arm of one call never interleave with
/// another.
pub struct CommandDispatcher {
    /// Held for a whole dispatch
    gate: Mutex<()>,
    registry: RwLock<CommandRegistry>,
    cooldowns: Mutex<CooldownEngine>,
    config: RwLock<Arc<DispatchConfig>>,
    chat: Arc<dyn ChatOutbound>,
}

impl CommandDispatcher {
    pub fn new(config: DispatchConfig, chat: Arc<dyn ChatOutbound>) -> Self {
        Self {
            gate: Mutex::new(()),
            registry: RwLock::new(CommandRegistry::new()),
            cooldowns: Mutex::new(CooldownEngine::new()),
            config: RwLock::new(Arc::new(config)),
            chat,
        }
    }

    pub async fn register(&self, descriptor: CommandDescriptor) {
        self.registry.write().await.register(descriptor);
    }

    pub async fn register_command(&self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.register(CommandDescriptor::new(name, handler)).await;
    }

    pub async fn command_names(&self) -> Vec<String> {
        self.registry.read().await.names()
    }

    /// Replace the policy snapshot. Existing cooldown entries are kept.
    pub async fn update_config(&self, config: DispatchConfig) {
        *self.config.write().await = Arc::new(config);
        info!("Command configuration updated");
    }

    pub async fn config(&self) -> Arc<DispatchConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// Remaining cooldown for `command`, if it is currently armed.
    pub async fn cooldown_remaining(&self, command: &str) -> Option<Duration> {
        self.cooldowns
            .lock()
            .await
            .remaining(&command.to_lowercase(), Instant::now())
    }

    /// Handle one piece of chat text sent by `message`'s author.
    pub async fn dispatch(&self, text: &str, message: &ChatMessage) -> DispatchOutcome {
        let Some(name) = command_name(text) else {
            return DispatchOutcome::NotACommand;
        };
        let _gate = self.gate.lock().await;

        let config = self.config().await;
        let canonical = config.canonical(&name).to_string();

        let Some(descriptor) = self.registry.read().await.resolve(&canonical) else {
            debug!("Unknown command '!{}' from {}", name, message.sender);
            return DispatchOutcome::Unknown(canonical);
        };
        let command = descriptor.name.as_str();

        let bypass = config.is_admin(&message.sender);
        let exempt = config.is_exempt(command);

        if !bypass && !exempt {
            let remaining = self.cooldowns.lock().await.remaining(command, Instant::now());
            if let Some(remaining) = remaining {
                info!(
                    "Command '!{}' from {} rejected, on cooldown for {:?}",
                    command, message.sender, remaining
                );
                self.chat
                    .send_chat_message(&cooldown_notice(command, remaining))
                    .await;
                return DispatchOutcome::CoolingDown {
                    command: command.to_string(),
                    remaining,
                };
            }
        }

        let ctx = CommandContext {
            message,
            text,
            command,
            exclusive_group: descriptor.exclusive_group.as_deref(),
            chat: self.chat.as_ref(),
        };

        info!("Running command '!{}' for {}", command, message.sender);
        let success = match AssertUnwindSafe(descriptor.handler.handle(&ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                error!("Command '!{}' failed: {:#}", command, e);
                false
            }
            Err(_) => {
                error!("Command '!{}' panicked", command);
                false
            }
        };

        if !success {
            debug!("Command '!{}' did not take effect, no cooldown armed", command);
            return DispatchOutcome::Failed {
                command: command.to_string(),
            };
        }

        let cooldown = if bypass || exempt {
            None
        } else {
            config.cooldown_for(command)
        };
        if let Some(duration) = cooldown {
            self.cooldowns
                .lock()
                .await
                .arm(command, duration, Instant::now());
            debug!("Armed {:?} cooldown for '!{}'", duration, command);
        }

        DispatchOutcome::Executed {
            command: command.to_string(),
            cooldown,
        }
    }
}

/// Lower-cased command name of `text`, or `None` when it is not a command.
pub fn command_name(text: &str) -> Option<String> {
    if text.starts_with(RESERVED_PREFIX) {
        return None;
    }
    let first = text.strip_prefix(COMMAND_PREFIX)?.split_whitespace().next()?;
    // "! bomb" has whitespace straight after the prefix
    if text[1..].starts_with(char::is_whitespace) {
        return None;
    }
    Some(first.to_lowercase())
}

fn cooldown_notice(command: &str, remaining: Duration) -> String {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    format!("!!{} is on cooldown, try again in {}s", command, secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::FnHandler;
    use crate::outbound::testing::RecordingOutbound;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        result: bool,
    }

    impl Counting {
        fn new(result: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandHandler for Counting {
        async fn handle(&self, _ctx: &CommandContext<'_>) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result)
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        async fn handle(&self, _ctx: &CommandContext<'_>) -> Result<bool> {
            anyhow::bail!("not in a session")
        }
    }

    struct Panicking;

    #[async_trait]
    impl CommandHandler for Panicking {
        async fn handle(&self, _ctx: &CommandContext<'_>) -> Result<bool> {
            panic!("handler blew up")
        }
    }

    fn config() -> DispatchConfig {
        let mut config = DispatchConfig {
            admin: Some("Streamer".into()),
            global_cooldown_enabled: true,
            global_cooldown: Duration::from_secs(30),
            per_command_enabled: true,
            ..Default::default()
        };
        config
            .overrides
            .insert("bomb".into(), Duration::from_secs(60));
        config.exempt.insert("sr".into());
        config.aliases.insert("boom".into(), "bomb".into());
        config
    }

    fn dispatcher(config: DispatchConfig) -> (CommandDispatcher, Arc<RecordingOutbound>) {
        let chat = Arc::new(RecordingOutbound::default());
        (CommandDispatcher::new(config, chat.clone()), chat)
    }

    fn viewer(text: &str) -> ChatMessage {
        ChatMessage::test("viewer", text)
    }

    #[test]
    fn test_command_name_gate() {
        assert_eq!(command_name("!Bomb now").as_deref(), Some("bomb"));
        assert_eq!(command_name("  !sr 25f"), None);
        assert_eq!(command_name("!!bomb"), None);
        assert_eq!(command_name("! bomb"), None);
        assert_eq!(command_name("!"), None);
        assert_eq!(command_name("bomb"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_arms_command_cooldown() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        let before = Instant::now();
        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "bomb".into(),
                cooldown: Some(Duration::from_secs(60))
            }
        );
        assert_eq!(bomb.calls(), 1);
        let expiry = dispatcher.cooldowns.lock().await.expiry("bomb").unwrap();
        assert_eq!(expiry, before + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooling_down_rejects_without_invoking() {
        let (dispatcher, chat) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;

        assert_eq!(
            outcome,
            DispatchOutcome::CoolingDown {
                command: "bomb".into(),
                remaining: Duration::from_secs(50)
            }
        );
        assert_eq!(bomb.calls(), 1);
        assert_eq!(
            chat.messages().await,
            vec!["!!bomb is on cooldown, try again in 50s".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(dispatcher.cooldown_remaining("bomb").await, None);
        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert_eq!(bomb.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_bypasses_and_never_arms() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        let admin = ChatMessage::test("streamer", "!bomb");
        let outcome = dispatcher.dispatch("!bomb", &admin).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "bomb".into(),
                cooldown: None
            }
        );
        assert_eq!(bomb.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exempt_command_never_gets_cooldown() {
        let (dispatcher, _) = dispatcher(config());
        let ok = Counting::new(true);
        dispatcher.register_command("sr", ok.clone()).await;

        for _ in 0..3 {
            dispatcher.dispatch("!sr 25f", &viewer("!sr 25f")).await;
        }
        assert_eq!(ok.calls(), 3);
        assert!(dispatcher.cooldowns.lock().await.is_empty());

        let (dispatcher, _) = self::dispatcher(config());
        dispatcher.register_command("sr", Counting::new(false)).await;
        dispatcher.dispatch("!sr 25f", &viewer("!sr 25f")).await;
        assert!(dispatcher.cooldowns.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_disable_wins_over_overrides() {
        let mut cfg = config();
        cfg.global_cooldown_enabled = false;
        let (dispatcher, _) = dispatcher(cfg);
        dispatcher.register_command("bomb", Counting::new(true)).await;
        dispatcher.register_command("rainbow", Counting::new(true)).await;

        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        dispatcher.dispatch("!rainbow", &viewer("!rainbow")).await;
        assert!(dispatcher.cooldowns.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrides_disabled_uses_global_duration() {
        let mut cfg = config();
        cfg.per_command_enabled = false;
        let (dispatcher, _) = dispatcher(cfg);
        dispatcher.register_command("bomb", Counting::new(true)).await;

        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "bomb".into(),
                cooldown: Some(Duration::from_secs(30))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_handler_arms_nothing() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(false);
        dispatcher.register_command("bomb", bomb.clone()).await;

        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                command: "bomb".into()
            }
        );
        assert_eq!(dispatcher.cooldown_remaining("bomb").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rerun_after_expiry_arms_nothing() {
        let (dispatcher, _) = dispatcher(config());
        dispatcher.register_command("bomb", Counting::new(true)).await;
        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert!(dispatcher.cooldowns.lock().await.expiry("bomb").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        let bomb = Counting::new(false);
        dispatcher.register_command("bomb", bomb.clone()).await;
        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                command: "bomb".into()
            }
        );
        assert_eq!(bomb.calls(), 1);
        // The expired entry was pruned and the failure did not re-create it
        assert_eq!(dispatcher.cooldowns.lock().await.expiry("bomb"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rerun_leaves_expiry_unchanged() {
        let (dispatcher, _) = dispatcher(config());
        dispatcher.register_command("rainbow", Counting::new(true)).await;
        dispatcher.dispatch("!rainbow", &viewer("!rainbow")).await;
        let armed = dispatcher.cooldowns.lock().await.expiry("rainbow");
        assert!(armed.is_some());

        let rainbow = Counting::new(false);
        dispatcher.register_command("rainbow", rainbow.clone()).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let other = ChatMessage::test("another_viewer", "!rainbow");
        let outcome = dispatcher.dispatch("!rainbow", &other).await;

        assert!(matches!(outcome, DispatchOutcome::CoolingDown { .. }));
        assert_eq!(rainbow.calls(), 0);
        assert_eq!(dispatcher.cooldowns.lock().await.expiry("rainbow"), armed);
    }

    struct Replying;

    #[async_trait]
    impl CommandHandler for Replying {
        async fn handle(&self, ctx: &CommandContext<'_>) -> Result<bool> {
            ctx.reply(&format!("!!{} applied", ctx.command)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_command_runs_while_one_cools_down() {
        let (dispatcher, chat) = dispatcher(config());
        dispatcher.register_command("bomb", Counting::new(true)).await;
        dispatcher.register_command("rainbow", Arc::new(Replying)).await;

        dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        let bomb_expiry = dispatcher.cooldowns.lock().await.expiry("bomb");
        tokio::time::advance(Duration::from_secs(5)).await;

        let outcome = dispatcher.dispatch("!rainbow", &viewer("!rainbow")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "rainbow".into(),
                cooldown: Some(Duration::from_secs(30))
            }
        );
        assert_eq!(chat.messages().await, vec!["!!rainbow applied".to_string()]);
        assert_eq!(dispatcher.cooldowns.lock().await.expiry("bomb"), bomb_expiry);
    }

    struct Slow {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandHandler for Slow {
        async fn handle(&self, _ctx: &CommandContext<'_>) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dispatch_runs_handler_once() {
        let (dispatcher, _) = dispatcher(config());
        let slow = Arc::new(Slow {
            calls: AtomicUsize::new(0),
        });
        dispatcher.register_command("bomb", slow.clone()).await;

        let first = viewer("!bomb");
        let second = ChatMessage::test("another_viewer", "!bomb");
        let (a, b) = tokio::join!(
            dispatcher.dispatch("!bomb", &first),
            dispatcher.dispatch("!bomb", &second)
        );

        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
        let executed = [&a, &b]
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Executed { .. }))
            .count();
        let cooling = [&a, &b]
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::CoolingDown { .. }))
            .count();
        assert_eq!((executed, cooling), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_errors_and_panics_count_as_failure() {
        let (dispatcher, _) = dispatcher(config());
        dispatcher.register_command("err", Arc::new(Failing)).await;
        dispatcher.register_command("boom2", Arc::new(Panicking)).await;

        assert_eq!(
            dispatcher.dispatch("!err", &viewer("!err")).await,
            DispatchOutcome::Failed {
                command: "err".into()
            }
        );
        assert_eq!(
            dispatcher.dispatch("!boom2", &viewer("!boom2")).await,
            DispatchOutcome::Failed {
                command: "boom2".into()
            }
        );
        assert!(dispatcher.cooldowns.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_prefix_is_never_a_command() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        let outcome = dispatcher.dispatch("!!bomb", &viewer("!!bomb")).await;
        assert_eq!(outcome, DispatchOutcome::NotACommand);
        assert_eq!(bomb.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_is_silent() {
        let (dispatcher, chat) = dispatcher(config());
        let outcome = dispatcher.dispatch("!nope", &viewer("!nope")).await;
        assert_eq!(outcome, DispatchOutcome::Unknown("nope".into()));
        assert!(chat.messages().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_alias_remaps_before_lookup() {
        let (dispatcher, _) = dispatcher(config());
        let bomb = Counting::new(true);
        dispatcher.register_command("bomb", bomb.clone()).await;

        let outcome = dispatcher.dispatch("!BOOM", &viewer("!BOOM")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "bomb".into(),
                cooldown: Some(Duration::from_secs(60))
            }
        );
        assert_eq!(bomb.calls(), 1);
    }

    #[tokio::test]
    async fn test_handler_receives_full_text() {
        let (dispatcher, _) = dispatcher(config());
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let sink = seen.clone();
        dispatcher
            .register_command(
                "sr",
                Arc::new(FnHandler(move |_: &ChatMessage, text: &str| {
                    *sink.lock().unwrap() = text.to_string();
                    true
                })),
            )
            .await;

        dispatcher
            .dispatch("!sr 25f ex 1:20-2:10", &viewer("!sr 25f ex 1:20-2:10"))
            .await;
        assert_eq!(*seen.lock().unwrap(), "!sr 25f ex 1:20-2:10");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_applies_to_next_dispatch() {
        let (dispatcher, _) = dispatcher(config());
        dispatcher.register_command("bomb", Counting::new(true)).await;

        let mut cfg = config();
        cfg.global_cooldown_enabled = false;
        dispatcher.update_config(cfg).await;

        let outcome = dispatcher.dispatch("!bomb", &viewer("!bomb")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Executed {
                command: "bomb".into(),
                cooldown: None
            }
        );
    }

    #[test]
    fn test_cooldown_notice_rounds_up() {
        assert_eq!(
            cooldown_notice("bomb", Duration::from_millis(49_200)),
            "!!bomb is on cooldown, try again in 50s"
        );
        assert_eq!(
            cooldown_notice("bomb", Duration::from_millis(10)),
            "!!bomb is on cooldown, try again in 1s"
        );
    }
}
