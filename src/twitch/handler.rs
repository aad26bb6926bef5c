use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::types::ChatMessage;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Speech output failed: {0}")]
    Speech(String),
}

pub type HandlerResult = Result<(), HandlerError>;

/// Reactions to what the bot sees in chat and from the event ingress.
///
/// Every hook defaults to doing nothing. Faults are contained by the scheduler
/// and never take the connection down.
pub trait ChatHandler: Send + Sync {
    /// `command` is the message body without its leading `!`.
    fn on_command(&self, _nick: &str, _command: &str) -> impl Future<Output = HandlerResult> + Send {
        async { Ok(()) }
    }

    fn on_message(&self, _message: &ChatMessage) -> impl Future<Output = HandlerResult> + Send {
        async { Ok(()) }
    }

    fn on_notification(&self, _text: &str) -> impl Future<Output = HandlerResult> + Send {
        async { Ok(()) }
    }
}

/// The default bot: announces, answers pings, and only logs what it observes.
#[derive(Debug, Default, Clone)]
pub struct PlainBot;

impl ChatHandler for PlainBot {
    async fn on_message(&self, message: &ChatMessage) -> HandlerResult {
        tracing::debug!("Received \"{}\" from {}", message.body, message.nick);
        Ok(())
    }

    async fn on_notification(&self, text: &str) -> HandlerResult {
        tracing::debug!(notification = %text, "Announced notification");
        Ok(())
    }
}

/// Nicks allowed to run privileged commands. Compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    nicks: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(nicks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            nicks: nicks
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.nicks.iter().any(|n| n.eq_ignore_ascii_case(nick))
    }
}

/// Runs one handler hook, logging an error or a panic instead of propagating it.
pub async fn run_guarded<F>(hook: &'static str, reaction: F)
where
    F: Future<Output = HandlerResult>,
{
    match AssertUnwindSafe(reaction).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(hook, error = %e, "Chat handler failed"),
        Err(_) => tracing::warn!(hook, "Chat handler panicked"),
    }
}

/// One piece of work for a [`ChatHandler`].
#[derive(Debug, Clone)]
pub enum HandlerEvent {
    Command { nick: String, command: String },
    Message(ChatMessage),
    Notification(String),
}

/// Queue in front of a handler task, so slow hooks never stall the connection.
///
/// Events run one at a time in the order they were submitted. When the queue
/// is full new events are dropped with a warning.
#[derive(Debug)]
pub struct HandlerQueue {
    sender: mpsc::Sender<HandlerEvent>,
}

impl HandlerQueue {
    /// Spawns the handler task. It runs until the queue is dropped and drained.
    pub fn spawn<H: ChatHandler + 'static>(handler: Arc<H>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        tokio::spawn(run_handler_task(handler, receiver));
        Self { sender }
    }

    pub fn submit(&self, event: HandlerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "Chat handler is busy, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(?event, "Chat handler task is gone, dropping event");
            }
        }
    }
}

async fn run_handler_task<H: ChatHandler>(
    handler: Arc<H>,
    mut receiver: mpsc::Receiver<HandlerEvent>,
) {
    tracing::debug!("Chat handler task started");
    while let Some(event) = receiver.recv().await {
        match &event {
            HandlerEvent::Command { nick, command } => {
                run_guarded("on_command", handler.on_command(nick, command)).await
            }
            HandlerEvent::Message(message) => {
                run_guarded("on_message", handler.on_message(message)).await
            }
            HandlerEvent::Notification(text) => {
                run_guarded("on_notification", handler.on_notification(text)).await
            }
        }
    }
    tracing::debug!("Chat handler task stopped");
}
