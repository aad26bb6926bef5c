use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::connection::{IrcConnection, IrcReader, IrcWriter, Received};
use super::error::{Result as TwitchResult, TwitchError};
use super::handler::{ChatHandler, HandlerEvent, HandlerQueue};
use super::irc_parser::{CMD_RECONNECT, IrcMessage, keep_alive_reply, parse_chat_message};
use super::mailbox::NotificationMailbox;
use crate::config::{ChatConfig, SchedulerConfig};

const HANDLER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub channel: String,
    pub tick: Duration,
    pub receive_timeout: Duration,
    /// `None` disables the standing announcement.
    pub announcement: Option<String>,
    pub announcement_threshold: u32,
}

impl SchedulerSettings {
    pub fn from_config(channel: &str, chat: &ChatConfig, scheduler: &SchedulerConfig) -> Self {
        let announcement = (scheduler.announcement_threshold > 0
            && !scheduler.announcement.trim().is_empty())
        .then(|| scheduler.announcement.clone());
        Self {
            channel: channel.to_string(),
            tick: Duration::from_millis(scheduler.tick_ms),
            receive_timeout: chat.receive_timeout(),
            announcement,
            announcement_threshold: scheduler.announcement_threshold,
        }
    }
}

/// Drives the per-tick duties of a live connection.
///
/// A round runs three duties concurrently: receive and dispatch, the periodic
/// announcement and mailbox delivery. The round completes once all three have,
/// and faults as soon as any of them hits a transport error. Handler hooks run
/// on their own task and never hold up a round.
pub struct TaskScheduler {
    settings: SchedulerSettings,
    handlers: HandlerQueue,
    mailbox: NotificationMailbox,
    announcement_counter: u32,
}

impl TaskScheduler {
    /// Spawns the handler task, so it must be called inside the runtime.
    pub fn new<H: ChatHandler + 'static>(
        settings: SchedulerSettings,
        handler: Arc<H>,
        mailbox: NotificationMailbox,
    ) -> Self {
        Self {
            settings,
            handlers: HandlerQueue::spawn(handler, HANDLER_QUEUE_CAPACITY),
            mailbox,
            announcement_counter: 0,
        }
    }

    #[cfg(test)]
    pub fn announcement_counter(&self) -> u32 {
        self.announcement_counter
    }

    pub async fn run_round(&mut self, connection: &mut IrcConnection) -> TwitchResult<()> {
        let deadline = Instant::now() + self.settings.tick;
        let (reader, writer) = connection.parts_mut();
        let Self {
            settings,
            handlers,
            mailbox,
            announcement_counter,
        } = self;
        let settings = &*settings;
        let handlers = &*handlers;

        tokio::try_join!(
            receive_and_dispatch(reader, writer, handlers, settings, deadline),
            send_periodic_announcement(writer, settings, announcement_counter),
            deliver_notification(writer, mailbox, handlers, &settings.channel),
        )?;
        Ok(())
    }
}

async fn receive_and_dispatch(
    reader: &mut IrcReader,
    writer: &IrcWriter,
    handlers: &HandlerQueue,
    settings: &SchedulerSettings,
    deadline: Instant,
) -> TwitchResult<()> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let wait = settings.receive_timeout.min(deadline - now);
        match reader.receive(wait).await? {
            Received::Line(line) => dispatch_line(&line, writer, handlers).await?,
            Received::Timeout => {}
            Received::Closed => return Err(TwitchError::ConnectionClosed),
        }
    }
}

async fn dispatch_line(
    line: &str,
    writer: &IrcWriter,
    handlers: &HandlerQueue,
) -> TwitchResult<()> {
    tracing::debug!("< {}", line);

    if let Some(reply) = keep_alive_reply(line) {
        tracing::debug!("Answering keep-alive with {}", reply);
        return writer.send(&reply).await;
    }

    if let Some(message) = parse_chat_message(line) {
        match message.body.strip_prefix('!') {
            Some(command) => {
                tracing::debug!(nick = %message.nick, command, "Chat command");
                handlers.submit(HandlerEvent::Command {
                    nick: message.nick.clone(),
                    command: command.to_string(),
                });
            }
            None => handlers.submit(HandlerEvent::Message(message)),
        }
        return Ok(());
    }

    let message = IrcMessage::parse(line);
    if message.command() == Some(CMD_RECONNECT) {
        tracing::info!("Received IRC RECONNECT command. Restarting connection.");
        return Err(TwitchError::ReconnectRequested);
    }

    tracing::debug!(
        tags = ?message.tags(),
        prefix = ?message.prefix(),
        command = ?message.command(),
        "Not a chat message"
    );
    Ok(())
}

async fn send_periodic_announcement(
    writer: &IrcWriter,
    settings: &SchedulerSettings,
    counter: &mut u32,
) -> TwitchResult<()> {
    tokio::time::sleep(settings.tick).await;
    let Some(announcement) = settings.announcement.as_deref() else {
        return Ok(());
    };
    *counter += 1;
    if *counter >= settings.announcement_threshold {
        *counter = 0;
        tracing::info!(channel.name = %settings.channel, "Sending standing announcement");
        writer.send_privmsg(&settings.channel, announcement).await?;
    }
    Ok(())
}

/// A drained notification that goes back into the mailbox when dropped
/// before it was delivered, including when the round is cancelled mid-send.
struct PendingNotification<'a> {
    mailbox: &'a NotificationMailbox,
    text: String,
    delivered: bool,
}

impl Drop for PendingNotification<'_> {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        if !self.mailbox.restore(std::mem::take(&mut self.text)) {
            tracing::debug!("Undelivered notification superseded by a newer one");
        }
    }
}

async fn deliver_notification(
    writer: &IrcWriter,
    mailbox: &NotificationMailbox,
    handlers: &HandlerQueue,
    channel: &str,
) -> TwitchResult<()> {
    let Some(text) = mailbox.drain() else {
        return Ok(());
    };
    let mut pending = PendingNotification {
        mailbox,
        text,
        delivered: false,
    };
    tracing::info!(channel.name = %channel, notification = %pending.text, "Announcing notification");
    writer.send_privmsg(channel, &pending.text).await?;
    pending.delivered = true;
    handlers.submit(HandlerEvent::Notification(std::mem::take(&mut pending.text)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::handler::{HandlerError, HandlerResult};
    use crate::twitch::types::ChatMessage;
    use std::sync::Mutex;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    struct FakeServer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
        }

        /// Everything the client has written so far.
        async fn received(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(Ok(Some(line))) =
                tokio::time::timeout(Duration::from_millis(10), self.lines.next_line()).await
            {
                out.push(line);
            }
            out
        }
    }

    fn connected() -> (IrcConnection, FakeServer) {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, writer) = tokio::io::split(server);
        (
            IrcConnection::new(Box::new(client)),
            FakeServer {
                lines: BufReader::new(read_half).lines(),
                writer,
            },
        )
    }

    #[derive(Default)]
    struct RecordingHandler {
        commands: Mutex<Vec<(String, String)>>,
        messages: Mutex<Vec<String>>,
        notifications: Mutex<Vec<String>>,
    }

    impl ChatHandler for RecordingHandler {
        async fn on_command(&self, nick: &str, command: &str) -> HandlerResult {
            self.commands
                .lock()
                .unwrap()
                .push((nick.to_string(), command.to_string()));
            if command == "boom" {
                return Err(HandlerError::Speech("boom".to_string()));
            }
            if command == "panic" {
                panic!("handler panicked");
            }
            if command == "slow" {
                tokio::time::sleep(Duration::from_secs(20)).await;
            }
            Ok(())
        }

        async fn on_message(&self, message: &ChatMessage) -> HandlerResult {
            self.messages.lock().unwrap().push(message.body.clone());
            Ok(())
        }

        async fn on_notification(&self, text: &str) -> HandlerResult {
            self.notifications.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn settings(announcement: Option<&str>, threshold: u32) -> SchedulerSettings {
        SchedulerSettings {
            channel: "mountainriderak".to_string(),
            tick: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(250),
            announcement: announcement.map(str::to_string),
            announcement_threshold: threshold,
        }
    }

    fn scheduler(
        settings: SchedulerSettings,
    ) -> (
        TaskScheduler,
        Arc<RecordingHandler>,
        NotificationMailbox,
    ) {
        let handler = Arc::new(RecordingHandler::default());
        let mailbox = NotificationMailbox::new();
        (
            TaskScheduler::new(settings, Arc::clone(&handler), mailbox.clone()),
            handler,
            mailbox,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_answered_within_the_round() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, _, _) = scheduler(settings(None, 0));

        server.send("PING :tmi.twitch.tv").await;
        scheduler.run_round(&mut connection).await.unwrap();

        assert_eq!(server.received().await, vec!["PONG :tmi.twitch.tv"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announcement_every_threshold_ticks() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, _, _) = scheduler(settings(Some("Hello!"), 5));

        let start = Instant::now();
        for _ in 0..4 {
            scheduler.run_round(&mut connection).await.unwrap();
        }
        assert_eq!(scheduler.announcement_counter(), 4);
        scheduler.run_round(&mut connection).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(scheduler.announcement_counter(), 0);
        assert_eq!(
            server.received().await,
            vec!["PRIVMSG #mountainriderak :Hello!"]
        );

        for _ in 0..5 {
            scheduler.run_round(&mut connection).await.unwrap();
        }
        assert_eq!(server.received().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_announcement_never_sends() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, _, _) = scheduler(settings(None, 0));
        for _ in 0..3 {
            scheduler.run_round(&mut connection).await.unwrap();
        }
        assert!(server.received().await.is_empty());
        assert_eq!(scheduler.announcement_counter(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mailbox_notification_is_announced_once() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, handler, mailbox) = scheduler(settings(None, 0));

        mailbox.post("Alice is now following MountainRiderAK");
        scheduler.run_round(&mut connection).await.unwrap();
        scheduler.run_round(&mut connection).await.unwrap();

        assert_eq!(
            server.received().await,
            vec!["PRIVMSG #mountainriderak :Alice is now following MountainRiderAK"]
        );
        assert_eq!(mailbox.drain(), None);
        assert_eq!(
            *handler.notifications.lock().unwrap(),
            vec!["Alice is now following MountainRiderAK"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_and_messages_are_dispatched() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, handler, _) = scheduler(settings(None, 0));

        server
            .send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #mountainriderak :!speech")
            .await;
        server
            .send(":bob!bob@bob.tmi.twitch.tv PRIVMSG #mountainriderak :hello :)")
            .await;
        server.send(":tmi.twitch.tv CAP * ACK :twitch.tv/tags").await;
        scheduler.run_round(&mut connection).await.unwrap();

        assert_eq!(
            *handler.commands.lock().unwrap(),
            vec![("alice".to_string(), "speech".to_string())]
        );
        assert_eq!(*handler.messages.lock().unwrap(), vec!["hello :)"]);
        assert!(server.received().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_faults_do_not_fault_the_round() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, handler, _) = scheduler(settings(None, 0));

        server
            .send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #mountainriderak :!boom")
            .await;
        server
            .send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #mountainriderak :!panic")
            .await;
        server.send("PING :tmi.twitch.tv").await;
        scheduler.run_round(&mut connection).await.unwrap();

        assert_eq!(handler.commands.lock().unwrap().len(), 2);
        assert_eq!(server.received().await, vec!["PONG :tmi.twitch.tv"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_faults_the_round() {
        let (mut connection, server) = connected();
        let (mut scheduler, _, mailbox) = scheduler(settings(Some("Hello!"), 1));
        drop(server);

        mailbox.post("pending");
        assert!(matches!(
            scheduler.run_round(&mut connection).await,
            Err(TwitchError::ConnectionClosed)
        ));
        // a faulted round never loses the pending notification
        assert_eq!(mailbox.drain().as_deref(), Some("pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_request_faults_the_round() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, _, _) = scheduler(settings(None, 0));

        server.send(":tmi.twitch.tv RECONNECT").await;
        assert!(matches!(
            scheduler.run_round(&mut connection).await,
            Err(TwitchError::ReconnectRequested)
        ));
    }

    #[tokio::test]
    async fn test_failed_delivery_restores_notification() {
        let (client, server) = tokio::io::duplex(64);
        let (_reader, writer) = IrcConnection::new(Box::new(client)).split();
        drop(server);
        let mailbox = NotificationMailbox::new();
        let handlers = HandlerQueue::spawn(Arc::new(RecordingHandler::default()), 1);
        mailbox.post("Alice is now following Bot");

        let result = deliver_notification(&writer, &mailbox, &handlers, "bot").await;

        assert!(result.is_err());
        assert_eq!(mailbox.drain().as_deref(), Some("Alice is now following Bot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_faulted_during_a_stalled_send_keeps_the_notification() {
        // The server never reads, so the notification send blocks on a full pipe.
        let (client, server) = tokio::io::duplex(8);
        let (_server_reader, mut server_writer) = tokio::io::split(server);
        let mut connection = IrcConnection::new(Box::new(client));
        let (mut scheduler, handler, mailbox) = scheduler(settings(None, 0));
        mailbox.post("Alice is now following Bot");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            server_writer
                .write_all(b":tmi.twitch.tv RECONNECT\r\n")
                .await
                .unwrap();
        });

        assert!(matches!(
            scheduler.run_round(&mut connection).await,
            Err(TwitchError::ReconnectRequested)
        ));
        assert_eq!(mailbox.drain().as_deref(), Some("Alice is now following Bot"));
        assert!(handler.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_post_wins_over_an_undelivered_notification() {
        let (client, server) = tokio::io::duplex(8);
        let (_server_reader, _server_writer) = tokio::io::split(server);
        let (_reader, writer) = IrcConnection::new(Box::new(client)).split();
        let mailbox = NotificationMailbox::new();
        let handlers = HandlerQueue::spawn(Arc::new(RecordingHandler::default()), 1);
        mailbox.post("Alice is now following Bot");

        let mut delivery = Box::pin(deliver_notification(&writer, &mailbox, &handlers, "bot"));
        assert!(
            tokio::time::timeout(Duration::from_secs(1), &mut delivery)
                .await
                .is_err()
        );
        mailbox.post("Bob is now following Bot");
        drop(delivery);

        assert_eq!(mailbox.drain().as_deref(), Some("Bob is now following Bot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_does_not_stall_the_round() {
        let (mut connection, mut server) = connected();
        let (mut scheduler, handler, _) = scheduler(settings(Some("Hello!"), 5));

        server
            .send(":alice!alice@alice.tmi.twitch.tv PRIVMSG #mountainriderak :!slow")
            .await;
        server.send("PING :tmi.twitch.tv").await;

        let start = Instant::now();
        for _ in 0..5 {
            scheduler.run_round(&mut connection).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(
            server.received().await,
            vec!["PONG :tmi.twitch.tv", "PRIVMSG #mountainriderak :Hello!"]
        );
        assert_eq!(
            *handler.commands.lock().unwrap(),
            vec![("alice".to_string(), "slow".to_string())]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let chat = ChatConfig::default();
        let mut scheduler = SchedulerConfig::default();
        let settings = SchedulerSettings::from_config("chan", &chat, &scheduler);
        assert_eq!(settings.tick, Duration::from_secs(1));
        assert_eq!(settings.announcement.as_deref(), Some("Hello! Welcome to the channel!"));

        scheduler.announcement_threshold = 0;
        assert!(SchedulerSettings::from_config("chan", &chat, &scheduler)
            .announcement
            .is_none());
    }
}
