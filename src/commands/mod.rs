pub mod cooldown;
pub mod dispatcher;
pub mod exclusive;
pub mod song_request;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::message::ChatMessage;
use crate::outbound::ChatOutbound;

/// Everything a handler gets for one invocation.
pub struct CommandContext<'a> {
    pub message: &'a ChatMessage,
    /// The full chat text, including the command token
    pub text: &'a str,
    /// Canonical (post-alias) command name
    pub command: &'a str,
    pub exclusive_group: Option<&'a str>,
    pub chat: &'a dyn ChatOutbound,
}

impl CommandContext<'_> {
    /// Whitespace separated tokens after the command name.
    pub fn args(&self) -> Vec<&str> {
        self.text.split_whitespace().skip(1).collect()
    }

    pub async fn reply(&self, text: &str) {
        self.chat.send_chat_message(text).await;
    }
}

/// An effect triggered by a chat command.
///
/// `Ok(true)` means the effect actually took hold; `Ok(false)` is a normal
/// rejection (not in a session, exclusivity group busy...) and arms no
/// cooldown. Errors are logged by the dispatcher and count as `false`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<bool>;
}

/// Adapts a plain closure `(message, full text) -> bool` into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&ChatMessage, &str) -> bool + Send + Sync,
{
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<bool> {
        Ok((self.0)(ctx.message, ctx.text))
    }
}

/// A registered command.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Lower-cased command name
    pub name: String,
    pub handler: Arc<dyn CommandHandler>,
    pub aliases: Vec<String>,
    pub exclusive_group: Option<String>,
}

impl CommandDescriptor {
    pub fn new(name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            name: name.to_lowercase(),
            handler,
            aliases: Vec::new(),
            exclusive_group: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.aliases = aliases
            .into_iter()
            .map(|a| a.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.exclusive_group = Some(group.to_lowercase());
        self
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("exclusive_group", &self.exclusive_group)
            .finish()
    }
}

/// Registry of all known commands, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandDescriptor>>,
    aliases: HashMap<String, String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command, replacing any previous one with the same name.
    pub fn register(&mut self, descriptor: CommandDescriptor) {
        let descriptor = Arc::new(descriptor);
        if self.commands.contains_key(&descriptor.name) {
            warn!("Replacing handler for command '{}'", descriptor.name);
        }
        for alias in &descriptor.aliases {
            self.aliases.insert(alias.clone(), descriptor.name.clone());
        }
        match &descriptor.exclusive_group {
            Some(group) => info!("Registered command: !{} (group {})", descriptor.name, group),
            None => info!("Registered command: !{}", descriptor.name),
        }
        self.commands.insert(descriptor.name.clone(), descriptor);
    }

    /// Look up a command by name or descriptor alias.
    pub fn resolve(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        let name = name.to_lowercase();
        self.commands
            .get(&name)
            .or_else(|| {
                self.aliases
                    .get(&name)
                    .and_then(|canonical| self.commands.get(canonical))
            })
            .cloned()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
