use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::twitch::directory::{ChannelInfo, Follower, FollowerDirectory, new_followers};
use crate::twitch::error::Result as TwitchResult;
use crate::twitch::mailbox::NotificationMailbox;
use crate::twitch::session::shutdown_requested;

/// Event ingress that turns new channel follows into mailbox notifications.
///
/// The first successful poll only records the follower baseline. Every later
/// poll posts one notification per new follower, oldest first, so the mailbox
/// ends up holding the most recent one.
pub struct FollowPoller<D> {
    directory: D,
    channel_login: String,
    mailbox: NotificationMailbox,
    interval: Duration,
    channel: Option<ChannelInfo>,
    /// `None` until the first successful poll.
    known: Option<Vec<Follower>>,
}

impl<D: FollowerDirectory> FollowPoller<D> {
    pub fn new(
        directory: D,
        channel_login: impl Into<String>,
        mailbox: NotificationMailbox,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            channel_login: channel_login.into(),
            mailbox,
            interval,
            channel: None,
            known: None,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            channel.name = %self.channel_login,
            interval = ?self.interval,
            "Follower poller started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match self.poll_once().await {
                Ok(posted) if !posted.is_empty() => {
                    tracing::info!(count = posted.len(), "New followers posted to mailbox");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Follower poll failed, retrying next interval");
                }
            }
        }
        tracing::info!(channel.name = %self.channel_login, "Follower poller stopped");
    }

    /// Fetches the follower list once and posts a notification per new follower.
    pub async fn poll_once(&mut self) -> TwitchResult<Vec<String>> {
        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => {
                let channel = self.directory.resolve_channel(&self.channel_login).await?;
                tracing::debug!(channel.id = %channel.id, "Resolved channel for follower polling");
                self.channel = Some(channel.clone());
                channel
            }
        };

        let current = self.directory.fetch_followers(&channel.id).await?;
        let mut fresh = new_followers(self.known.as_deref(), &current);
        fresh.sort_by_key(|f| f.followed_at);

        let posted: Vec<String> = fresh
            .iter()
            .map(|f| format!("{} is now following {}", f.user_name, channel.display_name))
            .collect();
        for notification in &posted {
            tracing::debug!(notification = %notification, "Posting follow notification");
            self.mailbox.post(notification.as_str());
        }

        self.known = Some(current);
        Ok(posted)
    }
}
