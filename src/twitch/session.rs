use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};

use super::backoff::Backoff;
use super::connection::{Connector, IrcConnection, Received};
use super::error::{Result as TwitchResult, TwitchError};
use super::irc_parser::{CMD_CAP, CMD_JOIN, CMD_NICK, CMD_PASS, IrcMessage, keep_alive_reply};
use super::scheduler::TaskScheduler;
use super::types::{Credentials, SessionState};
use crate::config::ChatConfig;

/// Owns the connect, handshake, listen and backoff loop for one channel.
///
/// Transport faults are never returned. The session keeps reconnecting until
/// the shutdown flag flips to `true`, then closes the live connection and
/// publishes `Terminated`.
pub struct Session<C> {
    credentials: Credentials,
    connector: C,
    scheduler: TaskScheduler,
    backoff: Backoff,
    receive_timeout: Duration,
    join_drain_window: Duration,
    state_tx: watch::Sender<SessionState>,
}

impl<C: Connector> Session<C> {
    pub fn new(
        credentials: Credentials,
        connector: C,
        scheduler: TaskScheduler,
        backoff: Backoff,
        chat: &ChatConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            credentials,
            connector,
            scheduler,
            backoff,
            receive_timeout: chat.receive_timeout(),
            join_drain_window: chat.join_drain_window(),
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(channel.name = %self.credentials.channel, "Chat session starting");

        loop {
            let established = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                result = self.establish() => result,
            };

            let fault = match established {
                Ok(mut connection) => {
                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => None,
                        fault = self.listen(&mut connection) => Some(fault),
                    };
                    connection.close().await;
                    match outcome {
                        Some(fault) => fault,
                        None => break,
                    }
                }
                Err(e) => e,
            };

            if !self.back_off(fault, &mut shutdown).await {
                break;
            }
        }

        tracing::info!(channel.name = %self.credentials.channel, "Chat session terminated");
        self.set_state(SessionState::Terminated);
    }

    async fn establish(&mut self) -> TwitchResult<IrcConnection> {
        let attempt = self.backoff.attempt() + 1;
        self.set_state(SessionState::Connecting { attempt });
        let mut connection = self.connector.connect().await?;
        tracing::info!(
            connection.id = %connection.id(),
            attempt,
            "Connected to chat server"
        );

        self.set_state(SessionState::Authenticating { attempt });
        if let Err(e) = self.handshake(&mut connection).await {
            connection.close().await;
            return Err(e);
        }

        self.set_state(SessionState::Listening);
        Ok(connection)
    }

    async fn handshake(&self, connection: &mut IrcConnection) -> TwitchResult<()> {
        connection
            .send(&format!("{} {}", CMD_PASS, self.credentials.pass_token()))
            .await?;
        connection
            .send(&format!("{} {}", CMD_NICK, self.credentials.bot_nick))
            .await?;

        if let Some(capabilities) = &self.credentials.capabilities {
            for capability in capabilities {
                connection
                    .send(&format!("{} REQ :twitch.tv/{}", CMD_CAP, capability))
                    .await?;
            }
        }

        self.set_state(SessionState::Joining);
        connection
            .send(&format!("{} #{}", CMD_JOIN, self.credentials.channel))
            .await?;
        tracing::info!(
            connection.id = %connection.id(),
            channel.name = %self.credentials.channel,
            "Joined channel"
        );

        self.drain_join_replies(connection).await
    }

    /// Logs whatever the server sends right after JOIN. Stops at the first
    /// receive timeout or when the drain window runs out.
    async fn drain_join_replies(&self, connection: &mut IrcConnection) -> TwitchResult<()> {
        let deadline = Instant::now() + self.join_drain_window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match connection
                .receive(self.receive_timeout.min(remaining))
                .await?
            {
                Received::Line(line) => {
                    tracing::debug!(connection.id = %connection.id(), "{}", line);
                    let message = IrcMessage::parse(&line);
                    if message.is_auth_failure() {
                        let notice = message.params().last().copied().unwrap_or_default();
                        return Err(TwitchError::TwitchAuth(notice.to_string()));
                    }
                    if let Some(reply) = keep_alive_reply(&line) {
                        connection.send(&reply).await?;
                    }
                }
                Received::Timeout => return Ok(()),
                Received::Closed => return Err(TwitchError::ConnectionClosed),
            }
        }
    }

    /// Runs scheduler rounds until one faults.
    async fn listen(&mut self, connection: &mut IrcConnection) -> TwitchError {
        loop {
            if let Err(e) = self.scheduler.run_round(connection).await {
                return e;
            }
            self.backoff.on_stable_round();
        }
    }

    /// Waits out the reconnect delay. Returns `false` if shutdown arrived first.
    async fn back_off(&mut self, fault: TwitchError, shutdown: &mut watch::Receiver<bool>) -> bool {
        let stable_rounds = self.backoff.consecutive_successes();
        let retry_in = self.backoff.on_fault();
        let attempt = self.backoff.attempt();
        tracing::warn!(
            error = %fault,
            attempt,
            stable_rounds,
            retry_in = ?retry_in,
            "Chat connection lost, reconnecting after backoff"
        );
        self.set_state(SessionState::Backoff {
            reason: fault.to_string(),
            attempt,
            retry_in,
        });

        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => false,
            _ = sleep(retry_in) => true,
        }
    }

    fn set_state(&self, state: SessionState) {
        tracing::trace!(state = ?state, "Session state changed");
        self.state_tx.send_replace(state);
    }
}

/// Resolves once the flag is `true`. A dropped sender never triggers shutdown.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
