use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;

use super::error::{Result as TwitchResult, TwitchError};

const FOLLOWERS_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub login: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Follower {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub followed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

/// Channel and follower lookups. Plain request/response, no retries.
pub trait FollowerDirectory: Send + Sync {
    fn resolve_channel(&self, login: &str) -> impl Future<Output = TwitchResult<ChannelInfo>> + Send;

    fn fetch_followers(
        &self,
        broadcaster_id: &str,
    ) -> impl Future<Output = TwitchResult<Vec<Follower>>> + Send;
}

/// Helix API client authenticated with the bot's own chat token.
#[derive(Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    bearer_token: String,
}

impl DirectoryClient {
    pub fn new(
        api_base: impl Into<String>,
        client_id: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            bearer_token: bearer_token.into(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> TwitchResult<String> {
        let url = format!("{}/{}", self.api_base, path);
        tracing::debug!(url = %url, ?query, "[TWITCH_API] GET");
        let response = self
            .http
            .get(&url)
            .query(query)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error body".to_string());
            tracing::error!(
                "[TWITCH_API] Request to {} failed (HTTP {}): {}",
                path,
                status,
                error_body
            );
            return Err(TwitchError::TwitchAuth(format!(
                "{} failed (HTTP {}): {}",
                path, status, error_body
            )));
        }
        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("api_base", &self.api_base)
            .field("client_id", &self.client_id)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

impl FollowerDirectory for DirectoryClient {
    async fn resolve_channel(&self, login: &str) -> TwitchResult<ChannelInfo> {
        let body = self.get("users", &[("login", login)]).await?;
        parse_channel(&body, login)
    }

    async fn fetch_followers(&self, broadcaster_id: &str) -> TwitchResult<Vec<Follower>> {
        let body = self
            .get(
                "channels/followers",
                &[
                    ("broadcaster_id", broadcaster_id),
                    ("first", FOLLOWERS_PAGE_SIZE),
                ],
            )
            .await?;
        parse_followers(&body)
    }
}

fn parse_page<T: DeserializeOwned>(body: &str) -> TwitchResult<Vec<T>> {
    Ok(serde_json::from_str::<HelixPage<T>>(body)?.data)
}

pub fn parse_channel(body: &str, login: &str) -> TwitchResult<ChannelInfo> {
    parse_page::<ChannelInfo>(body)?
        .into_iter()
        .next()
        .ok_or_else(|| TwitchError::ChannelNotFound(login.to_string()))
}

pub fn parse_followers(body: &str) -> TwitchResult<Vec<Follower>> {
    parse_page(body)
}

/// Followers in `current` that were not in `previous`, in `current` order.
///
/// Without a `previous` snapshot `current` is only the baseline, not a burst of
/// new follows, so it yields nothing. A taken but empty snapshot is a real
/// baseline: everyone in `current` is new.
pub fn new_followers(previous: Option<&[Follower]>, current: &[Follower]) -> Vec<Follower> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let known: HashSet<&str> = previous.iter().map(|f| f.user_id.as_str()).collect();
    current
        .iter()
        .filter(|f| !known.contains(f.user_id.as_str()))
        .cloned()
        .collect()
}
