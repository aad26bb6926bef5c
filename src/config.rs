use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CAPABILITIES: [&str; 3] = ["commands", "tags", "membership"];

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub bot_nick: String,
    pub tmi_token: String,
    pub channel: String,
    pub request_capabilities: bool,
    pub capabilities: Vec<String>,
    pub client_id: Option<String>,
    pub api_base: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            bot_nick: String::new(),
            tmi_token: String::new(),
            channel: String::new(),
            request_capabilities: false,
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            client_id: None,
            api_base: "https://api.twitch.tv/helix".to_string(),
        }
    }
}

// The token is the bot's login secret, keep it out of the startup log.
struct RedactedToken<'a>(&'a str);

impl std::fmt::Debug for RedactedToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("<unset>")
        } else {
            f.write_str("<redacted>")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server_addr: String,
    pub connect_timeout_secs: u64,
    pub receive_timeout_ms: u64,
    pub join_drain_window_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_addr: "irc.chat.twitch.tv:6667".to_string(),
            connect_timeout_secs: 15,
            receive_timeout_ms: 1000,
            join_drain_window_secs: 5,
        }
    }
}

impl ChatConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn join_drain_window(&self) -> Duration {
        Duration::from_secs(self.join_drain_window_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    pub announcement: String,
    /// Number of ticks between two standing announcements. Zero disables them.
    pub announcement_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            announcement: "Hello! Welcome to the channel!".to_string(),
            announcement_threshold: 5 * 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 2,
            max_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FollowsConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl FollowsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for FollowsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub privileged_nicks: Vec<String>,
    /// Program and arguments used to speak a line, e.g. `["espeak", "-a", "{volume}"]`.
    pub command: Vec<String>,
}

#[derive(Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub follows: FollowsConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

impl std::fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSettings")
            .field("twitch.bot_nick", &self.twitch.bot_nick)
            .field("twitch.tmi_token", &RedactedToken(&self.twitch.tmi_token))
            .field("twitch.channel", &self.twitch.channel)
            .field("twitch.request_capabilities", &self.twitch.request_capabilities)
            .field("twitch.capabilities", &self.twitch.capabilities)
            .field("twitch.client_id", &self.twitch.client_id)
            .field("twitch.api_base", &self.twitch.api_base)
            .field("chat", &self.chat)
            .field("scheduler", &self.scheduler)
            .field("backoff", &self.backoff)
            .field("follows", &self.follows)
            .field("speech", &self.speech)
            .finish()
    }
}

impl AppSettings {
    /// Rejects settings the bot cannot start with. Runs before any connection attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("twitch.bot_nick", &self.twitch.bot_nick),
            ("twitch.tmi_token", &self.twitch.tmi_token),
            ("twitch.channel", &self.twitch.channel),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key.to_string()));
            }
        }
        if self.backoff.base_secs < 1 {
            return Err(ConfigError::InvalidValue(
                "backoff.base_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.tick_ms must be greater than 0".to_string(),
            ));
        }
        if self.follows.enabled && self.follows.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "follows.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.chat.receive_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "chat.receive_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("FOLLOWBOT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("twitch.capabilities")
                .with_list_parse_key("speech.privileged_nicks")
                .with_list_parse_key("speech.command")
                .try_parsing(true),
        )
        .build()?;
    settings_from(settings)
}

fn settings_from(settings: Config) -> AppResult<AppSettings> {
    let app_settings: AppSettings = settings.try_deserialize()?;
    app_settings.validate()?;
    Ok(app_settings)
}
