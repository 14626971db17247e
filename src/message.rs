use std::sync::Arc;

use serde_json::Value;

use crate::transport::BackendKind;

/// Role flags of the sender of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Roles {
    pub moderator: bool,
    pub vip: bool,
    pub subscriber: bool,
    pub broadcaster: bool,
}

/// A chat message in the backend-agnostic shape handed to command handlers.
///
/// Built once by the normalizer and only ever shared by reference; the raw
/// backend payload is kept for handlers that need backend-specific extras.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Display name of the sender
    pub sender: String,
    /// The message text
    pub text: String,
    pub roles: Roles,
    /// Bits / cheer amount attached to the message
    pub bits: u32,
    /// Transport the message arrived through
    pub origin: BackendKind,
    pub raw: Arc<Value>,
}

impl ChatMessage {
    /// Moderators and the broadcaster.
    pub fn is_privileged(&self) -> bool {
        self.roles.moderator || self.roles.broadcaster
    }
}

#[cfg(test)]
impl ChatMessage {
    pub(crate) fn test(sender: &str, text: &str) -> Self {
        Self {
            sender: sender.to_string(),
            text: text.to_string(),
            roles: Roles::default(),
            bits: 0,
            origin: BackendKind::Native,
            raw: Arc::new(Value::Null),
        }
    }
}
