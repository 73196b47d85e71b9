//! YouTube Data API v3 adapter.
//!
//! Quota-efficient: per channel, one `playlistItems.list` call on the uploads
//! playlist plus one `videos.list` call for details, instead of `search.list`.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{oauth, read_json, ChannelRef, LiveNow, RawItem, SourceError, VideoSource};
use crate::models::{Credentials, Platform};

pub const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeVideoListResponse {
    #[serde(default)]
    pub items: Vec<YoutubeVideoItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeVideoItem {
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub content_details: Option<ContentDetails>,
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub published_at: String,
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    #[serde(default)]
    pub channel_title: String,
    /// `none`, `upcoming` or `live`.
    #[serde(default)]
    pub live_broadcast_content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
    pub standard: Option<Thumbnail>,
    pub maxres: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available rendition.
    pub fn best(&self) -> Option<&Thumbnail> {
        self.maxres
            .as_ref()
            .or(self.standard.as_ref())
            .or(self.high.as_ref())
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDetails {
    pub duration: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamingDetails {
    pub actual_start_time: Option<String>,
    pub actual_end_time: Option<String>,
    pub scheduled_start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionItem {
    snippet: SubscriptionSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionSnippet {
    title: String,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    snippet: ChannelSnippet,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

/// Identity of the account that completed the OAuth login.
#[derive(Debug, Clone)]
pub struct YoutubeProfile {
    pub channel_id: String,
    pub display_name: String,
    pub avatar_url: String,
}

#[derive(Clone)]
pub struct YouTube {
    http_client: Client,
    oauth_client: BasicClient,
    base_url: String,
    recent_per_channel: usize,
    max_subscriptions: usize,
}

impl YouTube {
    pub fn new(oauth_client: BasicClient, recent_per_channel: usize, max_subscriptions: usize) -> Self {
        Self {
            http_client: Client::new(),
            oauth_client,
            base_url: API_BASE_URL.to_string(),
            recent_per_channel: recent_per_channel.clamp(1, MAX_PAGE_SIZE),
            max_subscriptions,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Looks up the channel owned by the token's account.
    #[tracing::instrument(name = "Fetch YouTube profile", skip(self, access_token))]
    pub async fn profile(&self, access_token: &str) -> Result<YoutubeProfile, SourceError> {
        let response = self
            .http_client
            .get(format!("{}/channels", self.base_url))
            .query(&[("part", "snippet"), ("mine", "true")])
            .bearer_auth(access_token)
            .send()
            .await?;

        let data: ChannelListResponse = read_json(response).await?;
        let channel = data.items.into_iter().next().ok_or_else(|| {
            SourceError::MalformedPayload("account has no YouTube channel".to_string())
        })?;

        Ok(YoutubeProfile {
            channel_id: channel.id,
            display_name: channel.snippet.title,
            avatar_url: channel
                .snippet
                .thumbnails
                .best()
                .map(|t| t.url.clone())
                .unwrap_or_default(),
        })
    }

    /// Fetch video IDs from the channel's uploads playlist (1 quota unit)
    async fn fetch_uploads_playlist(
        &self,
        channel_id: &str,
        token: &str,
    ) -> Result<Vec<String>, SourceError> {
        // Channel uploads playlist ID is "UU" + channel_id (without "UC" prefix)
        let uploads_playlist_id = match channel_id.strip_prefix("UC") {
            Some(rest) => format!("UU{rest}"),
            None => format!("UU{channel_id}"),
        };

        let max_results = self.recent_per_channel.to_string();

        let response = self
            .http_client
            .get(format!("{}/playlistItems", self.base_url))
            .query(&[
                ("playlistId", uploads_playlist_id.as_str()),
                ("part", "contentDetails"),
                ("maxResults", max_results.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await?;

        // Channels that never uploaded have no uploads playlist
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("No uploads playlist for channel {}", channel_id);
            return Ok(Vec::new());
        }

        let data: PlaylistItemsResponse = read_json(response).await?;
        Ok(data
            .items
            .into_iter()
            .map(|i| i.content_details.video_id)
            .collect())
    }

    /// Fetch video details by IDs (1 quota unit per 50 videos)
    async fn fetch_video_details(
        &self,
        video_ids: &[String],
        token: &str,
    ) -> Result<Vec<YoutubeVideoItem>, SourceError> {
        let mut items = Vec::with_capacity(video_ids.len());

        for chunk in video_ids.chunks(MAX_PAGE_SIZE) {
            let ids = chunk.join(",");
            let response = self
                .http_client
                .get(format!("{}/videos", self.base_url))
                .query(&[
                    ("id", ids.as_str()),
                    ("part", "snippet,contentDetails,liveStreamingDetails"),
                ])
                .bearer_auth(token)
                .send()
                .await?;

            let data: YoutubeVideoListResponse = read_json(response).await?;
            items.extend(data.items);
        }

        Ok(items)
    }
}

#[async_trait]
impl VideoSource for YouTube {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    #[tracing::instrument(name = "Refresh YouTube credentials", skip_all)]
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

    #[tracing::instrument(name = "List YouTube subscriptions", skip_all)]
    async fn list_subscriptions(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<ChannelRef>, SourceError> {
        let mut channels = Vec::new();
        let mut next_page_token: Option<String> = None;
        let mut page_count = 0;

        loop {
            page_count += 1;
            tracing::debug!("Processing page {} of YouTube subscriptions", page_count);

            let mut request = self
                .http_client
                .get(format!("{}/subscriptions", self.base_url))
                .query(&[
                    ("mine", "true"),
                    ("part", "snippet"),
                    ("maxResults", "50"),
                ])
                .bearer_auth(&credentials.access_token);

            if let Some(token) = &next_page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: SubscriptionListResponse = read_json(request.send().await?).await?;
            channels.extend(page.items.into_iter().map(|item| ChannelRef {
                id: item.snippet.resource_id.channel_id,
                name: item.snippet.title,
            }));

            if channels.len() >= self.max_subscriptions {
                tracing::warn!(
                    "Subscription cap of {} reached, ignoring the rest",
                    self.max_subscriptions
                );
                channels.truncate(self.max_subscriptions);
                break;
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        tracing::info!(
            "Retrieved {} YouTube subscriptions in {} pages",
            channels.len(),
            page_count
        );
        Ok(channels)
    }

    #[tracing::instrument(name = "List recent YouTube videos", skip(self, credentials), fields(channel_id = %channel.id))]
    async fn list_recent_videos(
        &self,
        credentials: &Credentials,
        channel: &ChannelRef,
    ) -> Result<Vec<RawItem>, SourceError> {
        let video_ids = self
            .fetch_uploads_playlist(&channel.id, &credentials.access_token)
            .await?;

        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let items = self
            .fetch_video_details(&video_ids, &credentials.access_token)
            .await?;
        Ok(items.into_iter().map(RawItem::YouTube).collect())
    }

    #[tracing::instrument(name = "Check YouTube live videos", skip_all, fields(tracked = tracked.len()))]
    async fn list_live_now(
        &self,
        credentials: &Credentials,
        tracked: &[String],
    ) -> Result<LiveNow, SourceError> {
        // No followed-live endpoint: look the stored live ids up again
        if tracked.is_empty() {
            return Ok(LiveNow::complete(Vec::new()));
        }

        let items = self
            .fetch_video_details(tracked, &credentials.access_token)
            .await?;
        Ok(LiveNow::complete(
            items.into_iter().map(RawItem::YouTube).collect(),
        ))
    }
}
