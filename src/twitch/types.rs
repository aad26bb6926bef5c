use serde::Serialize;
use std::time::Duration;

use crate::config::TwitchConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting {
        attempt: u32,
    },
    Authenticating {
        attempt: u32,
    },
    Joining,
    Listening,
    Backoff {
        reason: String,
        attempt: u32,
        retry_in: Duration,
    },
    Terminated,
}

/// One PRIVMSG from a user to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub channel: String,
    pub body: String,
}

/// Login material for the chat service. Fixed for the lifetime of the process.
#[derive(Clone)]
pub struct Credentials {
    pub bot_nick: String,
    tmi_token: String,
    pub channel: String,
    pub capabilities: Option<Vec<String>>,
}

impl Credentials {
    pub fn new(
        bot_nick: impl Into<String>,
        tmi_token: impl Into<String>,
        channel: impl Into<String>,
        capabilities: Option<Vec<String>>,
    ) -> Self {
        let tmi_token = tmi_token.into();
        let tmi_token = if tmi_token.starts_with("oauth:") {
            tmi_token
        } else {
            format!("oauth:{}", tmi_token)
        };
        Self {
            bot_nick: bot_nick.into(),
            tmi_token,
            channel: channel.into().trim_start_matches('#').to_lowercase(),
            capabilities,
        }
    }

    pub fn from_config(config: &TwitchConfig) -> Self {
        let capabilities = config
            .request_capabilities
            .then(|| config.capabilities.clone());
        Self::new(
            config.bot_nick.trim(),
            config.tmi_token.trim(),
            config.channel.trim(),
            capabilities,
        )
    }

    /// The token as sent in `PASS`, always carrying the `oauth:` prefix.
    pub fn pass_token(&self) -> &str {
        &self.tmi_token
    }

    /// The bare access token, as the Helix API expects it in a bearer header.
    pub fn bearer_token(&self) -> &str {
        self.tmi_token.trim_start_matches("oauth:")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_nick", &self.bot_nick)
            .field("tmi_token", &"<redacted>")
            .field("channel", &self.channel)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_gets_oauth_prefix() {
        let credentials = Credentials::new("bot", "abc123", "chan", None);
        assert_eq!(credentials.pass_token(), "oauth:abc123");
        assert_eq!(credentials.bearer_token(), "abc123");

        let prefixed = Credentials::new("bot", "oauth:abc123", "chan", None);
        assert_eq!(prefixed.pass_token(), "oauth:abc123");
    }

    #[test]
    fn test_channel_is_normalized_for_the_wire() {
        let credentials = Credentials::new("bot", "t", "#MountainRider", None);
        assert_eq!(credentials.channel, "mountainrider");
    }

    #[test]
    fn test_capabilities_only_when_requested() {
        let mut config = TwitchConfig {
            bot_nick: "bot".to_string(),
            tmi_token: "t".to_string(),
            channel: "c".to_string(),
            ..Default::default()
        };
        assert_eq!(Credentials::from_config(&config).capabilities, None);

        config.request_capabilities = true;
        assert_eq!(
            Credentials::from_config(&config).capabilities,
            Some(vec![
                "commands".to_string(),
                "tags".to_string(),
                "membership".to_string()
            ])
        );
    }
}
