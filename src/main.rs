// src/main.rs

use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Module Declarations ---
mod config;
mod error;
mod follows;
mod twitch;

// --- Imports ---
use crate::config::{AppSettings, load_settings};
use crate::error::Result as AppResult;
use crate::follows::FollowPoller;
use crate::twitch::{
    AllowList, Backoff, ChatHandler, ConfiguredSpeaker, Credentials, DirectoryClient,
    NotificationMailbox, PlainBot, SchedulerSettings, Session, SpeechBot, TaskScheduler,
    TcpConnector,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Setup tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_PKG_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    // Load Configuration
    let settings = load_settings()
        .inspect_err(|e| tracing::error!(error = %e, "Unable to start with this configuration"))?;
    tracing::info!("Configuration loaded: {:?}", settings);

    let credentials = Credentials::from_config(&settings.twitch);
    let mailbox = NotificationMailbox::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Unable to listen for the interrupt signal");
            return;
        }
        tracing::info!("Interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    // Event ingress
    let poller = match settings.twitch.client_id.as_deref().map(str::trim) {
        Some(client_id) if settings.follows.enabled && !client_id.is_empty() => {
            let directory = DirectoryClient::new(
                &settings.twitch.api_base,
                client_id,
                credentials.bearer_token(),
            );
            let poller = FollowPoller::new(
                directory,
                credentials.channel.clone(),
                mailbox.clone(),
                settings.follows.poll_interval(),
            );
            Some(tokio::spawn(poller.run(shutdown_rx.clone())))
        }
        _ if settings.follows.enabled => {
            tracing::warn!("twitch.client_id is not set, follower notifications are disabled");
            None
        }
        _ => {
            tracing::info!("Follower polling disabled");
            None
        }
    };

    if settings.speech.enabled {
        let speaker = ConfiguredSpeaker::from_config(&settings.speech);
        tracing::info!(?speaker, "Speech output enabled");
        let bot = SpeechBot::new(speaker, AllowList::new(&settings.speech.privileged_nicks));
        run_chat(&settings, credentials, bot, mailbox, shutdown_rx).await;
    } else {
        run_chat(&settings, credentials, PlainBot, mailbox, shutdown_rx).await;
    }

    if let Some(poller) = poller
        && let Err(e) = poller.await
    {
        tracing::warn!(error = %e, "Follower poller task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_chat<H: ChatHandler + 'static>(
    settings: &AppSettings,
    credentials: Credentials,
    handler: H,
    mailbox: NotificationMailbox,
    shutdown: watch::Receiver<bool>,
) {
    let scheduler = TaskScheduler::new(
        SchedulerSettings::from_config(&credentials.channel, &settings.chat, &settings.scheduler),
        Arc::new(handler),
        mailbox,
    );
    let connector = TcpConnector {
        addr: settings.chat.server_addr.clone(),
        connect_timeout: settings.chat.connect_timeout(),
    };
    let session = Session::new(
        credentials,
        connector,
        scheduler,
        Backoff::from_config(&settings.backoff),
        &settings.chat,
    );

    let mut state = session.subscribe_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            tracing::info!(state = ?current, "Chat session state");
        }
    });

    session.run(shutdown).await;
}
