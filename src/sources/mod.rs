//! Upstream platform adapters.
//!
//! Every platform is reached through [`VideoSource`]; the sync loop and the
//! normalization layer never see a concrete client.

pub mod oauth;
pub mod twitch;
pub mod youtube;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::models::{Credentials, Platform};

pub use twitch::Twitch;
pub use youtube::YouTube;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("access token expired or revoked")]
    AuthExpired,

    #[error("rate limited by upstream (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("upstream error: {0}")]
    Upstream(#[source] anyhow::Error),

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        let error_type = match &err {
            e if e.is_timeout() => "Request Timeout",
            e if e.is_connect() => "Connection Failed",
            e if e.is_decode() => "Response Decode Failed",
            e if e.is_request() => "Invalid Request",
            _ => "Unknown HTTP Error",
        };

        tracing::warn!(
            error = %err,
            url = ?err.url(),
            status = ?err.status(),
            error_type,
            "Upstream HTTP request failed"
        );

        if err.is_decode() {
            return SourceError::MalformedPayload(err.to_string());
        }
        SourceError::Upstream(anyhow::Error::new(err).context(error_type))
    }
}

/// A subscribed channel on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
}

/// Unnormalized upstream item, tagged with the payload shape it came from.
#[derive(Debug, Clone)]
pub enum RawItem {
    YouTube(youtube::YoutubeVideoItem),
    TwitchVideo(twitch::TwitchVideo),
    TwitchStream(twitch::TwitchStream),
}

impl RawItem {
    /// Platform id of the video or stream.
    pub fn upstream_id(&self) -> &str {
        match self {
            RawItem::YouTube(item) => &item.id,
            RawItem::TwitchVideo(video) => &video.id,
            RawItem::TwitchStream(stream) => &stream.id,
        }
    }
}

/// Answer of [`VideoSource::list_live_now`].
#[derive(Debug, Default)]
pub struct LiveNow {
    pub items: Vec<RawItem>,
    /// False when a result cap cut the listing short. An id missing from a
    /// truncated listing says nothing about whether its stream ended.
    pub complete: bool,
}

impl LiveNow {
    pub fn complete(items: Vec<RawItem>) -> Self {
        Self {
            items,
            complete: true,
        }
    }
}

/// Uniform capability every platform adapter provides.
///
/// Calls may fail with [`SourceError::AuthExpired`]; the caller refreshes
/// via [`VideoSource::refresh_credentials`], persists the result and retries
/// once.
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn platform(&self) -> Platform;

    async fn refresh_credentials(&self, credentials: &Credentials)
        -> Result<Credentials, SourceError>;

    async fn list_subscriptions(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<ChannelRef>, SourceError>;

    async fn list_recent_videos(
        &self,
        credentials: &Credentials,
        channel: &ChannelRef,
    ) -> Result<Vec<RawItem>, SourceError>;

    /// Currently live or announced items. `tracked` holds the upstream ids
    /// of the user's stored live rows, for platforms that can only look them up by id.
    async fn list_live_now(
        &self,
        credentials: &Credentials,
        tracked: &[String],
    ) -> Result<LiveNow, SourceError>;
}

/// Maps the status of an upstream response to the error taxonomy and
/// decodes the JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let response = check_status(response).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SourceError::MalformedPayload(e.to_string()))
}

pub(crate) async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(SourceError::AuthExpired);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();

    // YouTube reports exhausted quota as 403 with a reason in the body
    if status == StatusCode::FORBIDDEN
        && (body.contains("quotaExceeded") || body.contains("rateLimitExceeded"))
    {
        return Err(SourceError::RateLimited { retry_after });
    }

    Err(SourceError::Upstream(anyhow::anyhow!(
        "HTTP {}: {}",
        status.as_u16(),
        body
    )))
}
