//! Twitch Helix adapter.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{oauth, read_json, ChannelRef, LiveNow, RawItem, SourceError, VideoSource};
use crate::models::{Credentials, Platform};

pub const API_BASE_URL: &str = "https://api.twitch.tv/helix";

const MAX_PAGE_SIZE: usize = 100;
/// Floor for the followed-live listing, which is short next to the follow list.
const MIN_LIVE_CAP: usize = 1000;

struct Listing<T> {
    items: Vec<T>,
    /// More results existed past the cap.
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: HelixPagination,
}

#[derive(Debug, Default, Deserialize)]
struct HelixPagination {
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowedChannel {
    broadcaster_id: String,
    broadcaster_name: String,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
    #[serde(default)]
    profile_image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchVideo {
    pub id: String,
    pub user_login: String,
    pub user_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    pub published_at: Option<String>,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    /// Human-readable length, e.g. `3h8m33s`.
    pub duration: String,
    #[serde(rename = "type", default)]
    pub video_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchStream {
    pub id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    /// `live`, or empty when the stream errored.
    #[serde(rename = "type", default)]
    pub stream_type: String,
    pub title: String,
    pub started_at: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

#[derive(Debug, Clone)]
pub struct TwitchProfile {
    pub user_id: String,
    pub login: String,
    pub display_name: String,
    pub avatar_url: String,
}

#[derive(Clone)]
pub struct Twitch {
    http_client: Client,
    oauth_client: BasicClient,
    client_id: String,
    base_url: String,
    recent_per_channel: usize,
    max_subscriptions: usize,
}

impl Twitch {
    pub fn new(
        oauth_client: BasicClient,
        client_id: String,
        recent_per_channel: usize,
        max_subscriptions: usize,
    ) -> Self {
        Self {
            http_client: Client::new(),
            oauth_client,
            client_id,
            base_url: API_BASE_URL.to_string(),
            recent_per_channel: recent_per_channel.clamp(1, MAX_PAGE_SIZE),
            max_subscriptions,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.http_client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Client-Id", &self.client_id)
    }

    /// Follows `pagination.cursor` until exhausted or `cap` items collected.
    async fn paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
        cap: usize,
    ) -> Result<Listing<T>, SourceError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.get(path, token).query(query).query(&[("first", "100")]);
            if let Some(after) = &cursor {
                request = request.query(&[("after", after)]);
            }

            let page: HelixPage<T> = read_json(request.send().await?).await?;
            let fetched = page.data.len();
            items.extend(page.data);
            let next = page.pagination.cursor.filter(|c| !c.is_empty() && fetched > 0);

            if items.len() >= cap {
                let truncated = items.len() > cap || next.is_some();
                if truncated {
                    tracing::warn!("Result cap of {} reached for {}", cap, path);
                }
                items.truncate(cap);
                return Ok(Listing { items, truncated });
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(Listing {
            items,
            truncated: false,
        })
    }

    #[tracing::instrument(name = "Fetch Twitch profile", skip(self, access_token))]
    pub async fn profile(&self, access_token: &str) -> Result<TwitchProfile, SourceError> {
        let response = self.get("/users", access_token).send().await?;
        let page: HelixPage<HelixUser> = read_json(response).await?;
        let user = page.data.into_iter().next().ok_or_else(|| {
            SourceError::MalformedPayload("token is not bound to a Twitch user".to_string())
        })?;

        Ok(TwitchProfile {
            user_id: user.id,
            login: user.login,
            display_name: user.display_name,
            avatar_url: user.profile_image_url,
        })
    }
}

#[async_trait]
impl VideoSource for Twitch {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    #[tracing::instrument(name = "Refresh Twitch credentials", skip_all)]
    async fn refresh_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, SourceError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or(SourceError::AuthExpired)?;
        let grant = oauth::refresh(&self.oauth_client, refresh_token).await?;
        Ok(grant.merge_into(credentials))
    }

    #[tracing::instrument(name = "List Twitch follows", skip_all)]
    async fn list_subscriptions(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<ChannelRef>, SourceError> {
        let follows: Vec<FollowedChannel> = self
            .paged(
                "/channels/followed",
                &[("user_id", credentials.channel_id.as_str())],
                &credentials.access_token,
                self.max_subscriptions,
            )
            .await?
            .items;

        tracing::info!("Retrieved {} Twitch follows", follows.len());
        Ok(follows
            .into_iter()
            .map(|f| ChannelRef {
                id: f.broadcaster_id,
                name: f.broadcaster_name,
            })
            .collect())
    }

    #[tracing::instrument(name = "List recent Twitch videos", skip(self, credentials), fields(channel_id = %channel.id))]
    async fn list_recent_videos(
        &self,
        credentials: &Credentials,
        channel: &ChannelRef,
    ) -> Result<Vec<RawItem>, SourceError> {
        let first = self.recent_per_channel.to_string();
        let response = self
            .get("/videos", &credentials.access_token)
            .query(&[
                ("user_id", channel.id.as_str()),
                ("first", first.as_str()),
                ("type", "all"),
            ])
            .send()
            .await?;

        let page: HelixPage<TwitchVideo> = read_json(response).await?;
        Ok(page.data.into_iter().map(RawItem::TwitchVideo).collect())
    }

    #[tracing::instrument(name = "List live Twitch streams", skip_all)]
    async fn list_live_now(
        &self,
        credentials: &Credentials,
        _tracked: &[String],
    ) -> Result<LiveNow, SourceError> {
        let streams: Listing<TwitchStream> = self
            .paged(
                "/streams/followed",
                &[("user_id", credentials.channel_id.as_str())],
                &credentials.access_token,
                self.max_subscriptions.max(MIN_LIVE_CAP),
            )
            .await?;

        tracing::debug!("{} followed channels are live", streams.items.len());
        Ok(LiveNow {
            items: streams.items.into_iter().map(RawItem::TwitchStream).collect(),
            complete: !streams.truncated,
        })
    }
}
