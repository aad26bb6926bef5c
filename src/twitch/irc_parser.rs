use super::types::ChatMessage;

pub const CMD_PASS: &str = "PASS";
pub const CMD_NICK: &str = "NICK";
pub const CMD_JOIN: &str = "JOIN";
pub const CMD_CAP: &str = "CAP";
pub const CMD_PING: &str = "PING";
pub const CMD_PONG: &str = "PONG";
pub const CMD_PRIVMSG: &str = "PRIVMSG";
pub const CMD_NOTICE: &str = "NOTICE";
pub const CMD_RECONNECT: &str = "RECONNECT";

const AUTH_ERROR_LOGIN_FAILED: &str = "Login authentication failed";
const AUTH_ERROR_IMPROPERLY_FORMATTED: &str = "Improperly formatted auth";

/// Borrowed view of one IRC line split into its tags, prefix, command and params.
#[derive(Debug, Default)]
pub struct IrcMessage<'a> {
    tags: Option<&'a str>,
    prefix: Option<&'a str>,
    command: Option<&'a str>,
    params: Vec<&'a str>,
}

impl<'a> IrcMessage<'a> {
    pub fn command(&self) -> Option<&'a str> {
        self.command
    }

    pub fn prefix(&self) -> Option<&'a str> {
        self.prefix
    }

    pub fn tags(&self) -> Option<&'a str> {
        self.tags
    }

    pub fn params(&self) -> &[&'a str] {
        &self.params
    }

    pub fn parse(line: &'a str) -> Self {
        let mut message = IrcMessage::default();
        let mut remainder = line.trim_end_matches(['\r', '\n']);

        if remainder.starts_with('@') {
            if let Some(space_idx) = remainder.find(' ') {
                message.tags = Some(&remainder[1..space_idx]);
                remainder = &remainder[space_idx + 1..];
            } else {
                message.tags = Some(&remainder[1..]);
                return message;
            }
        }
        if remainder.starts_with(':') {
            if let Some(space_idx) = remainder.find(' ') {
                message.prefix = Some(&remainder[1..space_idx]);
                remainder = &remainder[space_idx + 1..];
            } else {
                message.prefix = Some(&remainder[1..]);
                return message;
            }
        }
        let (middle, trailing) = match remainder.find(" :") {
            Some(idx) => (&remainder[..idx], Some(&remainder[idx + 2..])),
            None => (remainder, None),
        };
        let mut parts = middle.split(' ').filter(|s| !s.is_empty());
        message.command = parts.next();
        message.params.extend(parts);
        message.params.extend(trailing);
        message
    }

    /// True for a server NOTICE rejecting our PASS/NICK pair.
    pub fn is_auth_failure(&self) -> bool {
        self.command == Some(CMD_NOTICE)
            && self.params.last().is_some_and(|text| {
                text.contains(AUTH_ERROR_LOGIN_FAILED)
                    || text.contains(AUTH_ERROR_IMPROPERLY_FORMATTED)
            })
    }
}

/// Parses a `:nick!user@host PRIVMSG #channel :body` line.
///
/// The `PRIVMSG` marker must be the command field that directly follows the
/// source. A body that merely mentions the word is not enough. Lines that do
/// not follow the grammar, including pings and capability replies, yield `None`.
/// A leading IRCv3 tag block is skipped when the server sends one.
pub fn parse_chat_message(line: &str) -> Option<ChatMessage> {
    let mut line = line.trim_end_matches(['\r', '\n']);
    if line.starts_with('@') {
        line = line.split_once(' ')?.1;
    }
    let line = line.strip_prefix(':').unwrap_or(line);

    let (source, rest) = line.split_once(' ')?;
    let payload = rest.strip_prefix(CMD_PRIVMSG)?.strip_prefix(' ')?;

    let (nick, identity) = source.split_once('!')?;
    let (user, host) = identity.split_once('@')?;
    let (channel, body) = payload.split_once(" :")?;

    Some(ChatMessage {
        nick: nick.to_string(),
        user: user.to_string(),
        host: host.to_string(),
        channel: channel.strip_prefix('#').unwrap_or(channel).to_string(),
        body: body.to_string(),
    })
}

/// Builds the PONG for a server PING, echoing its payload verbatim.
pub fn keep_alive_reply(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix(CMD_PING)?;
    if payload.is_empty() {
        Some(CMD_PONG.to_string())
    } else if payload.starts_with(' ') {
        Some(format!("{}{}", CMD_PONG, payload))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg_fields() {
        let msg = parse_chat_message(
            ":alice!alice@alice.tmi.twitch.tv PRIVMSG #mountainrider :hello there\r\n",
        )
        .unwrap();
        assert_eq!(msg.nick, "alice");
        assert_eq!(msg.user, "alice");
        assert_eq!(msg.host, "alice.tmi.twitch.tv");
        assert_eq!(msg.channel, "mountainrider");
        assert_eq!(msg.body, "hello there");
    }

    #[test]
    fn test_body_keeps_colons_and_spaces() {
        let msg = parse_chat_message(":n!u@h PRIVMSG #c :time is 12:30 :) ok  ").unwrap();
        assert_eq!(msg.body, "time is 12:30 :) ok  ");
    }

    #[test]
    fn test_no_case_normalization() {
        let msg = parse_chat_message(":Alice!Alice@Host PRIVMSG #Chan :!Speech").unwrap();
        assert_eq!(msg.nick, "Alice");
        assert_eq!(msg.channel, "Chan");
        assert_eq!(msg.body, "!Speech");
    }

    #[test]
    fn test_tagged_privmsg() {
        let line = "@badge-info=;badges=broadcaster/1;display-name=Alice;mod=0 :alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :hi";
        let msg = parse_chat_message(line).unwrap();
        assert_eq!(msg.nick, "alice");
        assert_eq!(msg.body, "hi");
    }

    #[test]
    fn test_marker_inside_body_is_not_a_privmsg() {
        assert!(parse_chat_message(":tmi.twitch.tv NOTICE #chan :someone said PRIVMSG here").is_none());
        assert!(parse_chat_message(":n!u@h WHISPER bot : PRIVMSG #c :x").is_none());
    }

    #[test]
    fn test_marker_must_be_exact_and_case_sensitive() {
        assert!(parse_chat_message(":n!u@h privmsg #c :hi").is_none());
        assert!(parse_chat_message(":n!u@h PRIVMSGX #c :hi").is_none());
    }

    #[test]
    fn test_non_chat_lines_are_rejected() {
        assert!(parse_chat_message("PING :tmi.twitch.tv").is_none());
        assert!(parse_chat_message(":tmi.twitch.tv CAP * ACK :twitch.tv/tags").is_none());
        assert!(parse_chat_message(":tmi.twitch.tv 001 bot :Welcome, GLHF!").is_none());
        assert!(parse_chat_message("").is_none());
    }

    #[test]
    fn test_missing_delimiters_are_rejected() {
        // no '!'
        assert!(parse_chat_message(":nick@host PRIVMSG #c :hi").is_none());
        // no '@'
        assert!(parse_chat_message(":nick!user PRIVMSG #c :hi").is_none());
        // no ' :'
        assert!(parse_chat_message(":n!u@h PRIVMSG #c hi").is_none());
        // no source
        assert!(parse_chat_message("PRIVMSG #c :hi").is_none());
    }

    #[test]
    fn test_keep_alive_reply_echoes_payload() {
        assert_eq!(
            keep_alive_reply("PING :tmi.twitch.tv\r\n").as_deref(),
            Some("PONG :tmi.twitch.tv")
        );
        assert_eq!(keep_alive_reply("PING").as_deref(), Some("PONG"));
        assert_eq!(keep_alive_reply("PINGS :x"), None);
        assert_eq!(keep_alive_reply(":n!u@h PRIVMSG #c :PING :x"), None);
    }

    #[test]
    fn test_irc_message_tokenizer() {
        let msg = IrcMessage::parse("@id=1 :tmi.twitch.tv CAP * ACK :twitch.tv/tags twitch.tv/commands");
        assert_eq!(msg.tags(), Some("id=1"));
        assert_eq!(msg.prefix(), Some("tmi.twitch.tv"));
        assert_eq!(msg.command(), Some(CMD_CAP));
        assert_eq!(msg.params(), &["*", "ACK", "twitch.tv/tags twitch.tv/commands"]);

        let reconnect = IrcMessage::parse(":tmi.twitch.tv RECONNECT");
        assert_eq!(reconnect.command(), Some(CMD_RECONNECT));
        assert!(reconnect.params().is_empty());
    }

    #[test]
    fn test_auth_failure_notice() {
        assert!(IrcMessage::parse(":tmi.twitch.tv NOTICE * :Login authentication failed").is_auth_failure());
        assert!(IrcMessage::parse(":tmi.twitch.tv NOTICE * :Improperly formatted auth").is_auth_failure());
        assert!(!IrcMessage::parse(":tmi.twitch.tv NOTICE #c :Slow mode is on").is_auth_failure());
    }
}
