use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub native: NativeConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

/// First-party relay endpoint. Both `url` and `channel_id` must be set for
/// the native transport to be attempted.
#[derive(Debug, Deserialize, Clone)]
pub struct NativeConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Whether falling back to the host's chat SDK is permitted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_module_id")]
    pub module_id: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_send_capability")]
    pub send_capability: String,
    #[serde(default = "default_message_capability")]
    pub message_capability: String,
    #[serde(default = "default_loading_capability")]
    pub loading_capability: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ready_grace_ms")]
    pub ready_grace_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    /// Display name whose commands skip every cooldown check.
    #[serde(default)]
    pub admin: Option<String>,
    #[serde(default = "default_true")]
    pub global_cooldown_enabled: bool,
    #[serde(default = "default_global_cooldown_secs")]
    pub global_cooldown_secs: u64,
    #[serde(default)]
    pub per_command_cooldowns: bool,
    /// Per-command cooldown overrides in seconds.
    #[serde(default)]
    pub cooldowns: HashMap<String, u64>,
    #[serde(default)]
    pub exempt: Vec<String>,
    /// User keyword -> canonical command name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_module_id() -> String {
    "ChatPlexSDK".to_string()
}

fn default_service_type() -> String {
    "ChatService".to_string()
}

fn default_send_capability() -> String {
    "BroadcastMessage".to_string()
}

fn default_message_capability() -> String {
    "OnTextMessageReceived".to_string()
}

fn default_loading_capability() -> String {
    "OnLoadingStateChanged".to_string()
}

fn default_max_attempts() -> u32 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_ready_grace_ms() -> u64 {
    500
}

fn default_global_cooldown_secs() -> u64 {
    60
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            channel_id: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            module_id: default_module_id(),
            service_type: default_service_type(),
            send_capability: default_send_capability(),
            message_capability: default_message_capability(),
            loading_capability: default_loading_capability(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            ready_grace_ms: default_ready_grace_ms(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            admin: None,
            global_cooldown_enabled: true,
            global_cooldown_secs: default_global_cooldown_secs(),
            per_command_cooldowns: false,
            cooldowns: HashMap::new(),
            exempt: Vec::new(),
            aliases: HashMap::new(),
        }
    }
}

impl NativeConfig {
    /// True when both the endpoint and a cached channel id are present.
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.channel_id.trim().is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_grace(&self) -> Duration {
        Duration::from_millis(self.ready_grace_ms)
    }
}

/// Immutable snapshot of the command policy handed to the dispatcher.
/// All keys are lower-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchConfig {
    pub admin: Option<String>,
    pub global_cooldown_enabled: bool,
    pub global_cooldown: Duration,
    pub per_command_enabled: bool,
    pub overrides: HashMap<String, Duration>,
    pub exempt: HashSet<String>,
    pub aliases: HashMap<String, String>,
}

impl DispatchConfig {
    pub fn is_admin(&self, sender: &str) -> bool {
        self.admin
            .as_deref()
            .map(|admin| !admin.is_empty() && admin.eq_ignore_ascii_case(sender))
            .unwrap_or(false)
    }

    pub fn is_exempt(&self, command: &str) -> bool {
        self.exempt.contains(command)
    }

    /// Canonical name for a user keyword, if one is configured.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Cooldown to arm after a successful run, `None` when nothing is armed.
    pub fn cooldown_for(&self, command: &str) -> Option<Duration> {
        if !self.global_cooldown_enabled || self.is_exempt(command) {
            return None;
        }
        let duration = if self.per_command_enabled {
            self.overrides
                .get(command)
                .copied()
                .unwrap_or(self.global_cooldown)
        } else {
            self.global_cooldown
        };
        if duration.is_zero() {
            None
        } else {
            Some(duration)
        }
    }
}

impl From<&CommandsConfig> for DispatchConfig {
    fn from(c: &CommandsConfig) -> Self {
        Self {
            admin: c
                .admin
                .as_ref()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            global_cooldown_enabled: c.global_cooldown_enabled,
            global_cooldown: Duration::from_secs(c.global_cooldown_secs),
            per_command_enabled: c.per_command_cooldowns,
            overrides: c
                .cooldowns
                .iter()
                .map(|(k, v)| (k.to_lowercase(), Duration::from_secs(*v)))
                .collect(),
            exempt: c.exempt.iter().map(|e| e.to_lowercase()).collect(),
            aliases: c
                .aliases
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
                .collect(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::from(&self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(!config.native.is_configured());
        assert_eq!(config.native.connect_timeout(), Duration::from_secs(5));
        assert!(config.bridge.enabled);
        assert_eq!(config.bridge.max_attempts, 60);
        assert_eq!(config.bridge.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.bridge.ready_grace(), Duration::from_millis(500));
        assert!(config.commands.global_cooldown_enabled);
    }

    #[test]
    fn test_commands_section_lowercases_keys() {
        let config = Config::parse(
            r#"
            [native]
            url = "ws://localhost:9000/ws"
            channel_id = "1234"

            [commands]
            admin = "Streamer"
            global_cooldown_secs = 30
            per_command_cooldowns = true
            exempt = ["SR"]

            [commands.cooldowns]
            Bomb = 60

            [commands.aliases]
            Boom = "Bomb"
            "#,
        )
        .unwrap();

        assert!(config.native.is_configured());
        let dispatch = config.dispatch_config();
        assert!(dispatch.is_admin("streamer"));
        assert!(!dispatch.is_admin("viewer"));
        assert!(dispatch.is_exempt("sr"));
        assert_eq!(dispatch.canonical("boom"), "bomb");
        assert_eq!(dispatch.canonical("other"), "other");
        assert_eq!(dispatch.cooldown_for("bomb"), Some(Duration::from_secs(60)));
        assert_eq!(dispatch.cooldown_for("rainbow"), Some(Duration::from_secs(30)));
        assert_eq!(dispatch.cooldown_for("sr"), None);
    }

    #[test]
    fn test_overrides_ignored_when_per_command_disabled() {
        let mut commands = CommandsConfig::default();
        commands.global_cooldown_secs = 20;
        commands.cooldowns.insert("bomb".into(), 90);
        let dispatch = DispatchConfig::from(&commands);
        assert_eq!(dispatch.cooldown_for("bomb"), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_disabled_or_zero_cooldown_arms_nothing() {
        let mut commands = CommandsConfig::default();
        commands.per_command_cooldowns = true;
        commands.cooldowns.insert("bomb".into(), 90);
        commands.global_cooldown_enabled = false;
        assert_eq!(DispatchConfig::from(&commands).cooldown_for("bomb"), None);

        commands.global_cooldown_enabled = true;
        commands.cooldowns.insert("bomb".into(), 0);
        assert_eq!(DispatchConfig::from(&commands).cooldown_for("bomb"), None);
    }

    #[test]
    fn test_blank_admin_matches_nobody() {
        let mut commands = CommandsConfig::default();
        commands.admin = Some("  ".into());
        assert!(!DispatchConfig::from(&commands).is_admin(""));
    }
}
