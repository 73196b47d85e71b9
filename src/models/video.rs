use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upstream video platform a record was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Twitch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Twitch => "twitch",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(Platform::YouTube),
            "twitch" => Ok(Platform::Twitch),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Type tag of a stored video. The meaning of `Video::event_at` depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoKind {
    /// Recorded video; `event_at` is the publish time.
    Vod,
    /// Stream in progress; `event_at` is the actual start time.
    Live,
    /// Announced stream; `event_at` is the scheduled start time.
    ScheduledLive,
}

impl VideoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoKind::Vod => "vod",
            VideoKind::Live => "live",
            VideoKind::ScheduledLive => "scheduled-live",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, VideoKind::Live | VideoKind::ScheduledLive)
    }
}

impl fmt::Display for VideoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vod" => Ok(VideoKind::Vod),
            "live" => Ok(VideoKind::Live),
            "scheduled-live" => Ok(VideoKind::ScheduledLive),
            other => Err(format!("unknown video kind: {other}")),
        }
    }
}

/// Canonical "subvideo" record, unique per `(user_id, url)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: Option<i64>,
    pub user_id: i64,
    pub url: String,
    /// Upstream id, used to detect streams that ended without leaving a VOD.
    pub video_id: Option<String>,
    pub platform: Platform,
    pub kind: VideoKind,
    pub title: String,
    pub channel: String,
    pub channel_id: String,
    pub category: String,
    pub description: String,
    pub thumb_url: String,
    /// Seconds; 0 when indeterminate. Last known value for live rows.
    pub duration_secs: i32,
    pub event_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Row shape of the `videos` table (the search vector is never selected).
#[derive(Debug, FromRow)]
pub struct VideoRow {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub video_id: Option<String>,
    pub platform: String,
    pub kind: String,
    pub title: String,
    pub channel: String,
    pub channel_id: String,
    pub category: String,
    pub description: String,
    pub thumb_url: String,
    pub duration_secs: i32,
    pub event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<VideoRow> for Video {
    type Error = String;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        Ok(Video {
            id: Some(row.id),
            user_id: row.user_id,
            url: row.url,
            video_id: row.video_id,
            platform: row.platform.parse()?,
            kind: row.kind.parse()?,
            title: row.title,
            channel: row.channel,
            channel_id: row.channel_id,
            category: row.category,
            description: row.description,
            thumb_url: row.thumb_url,
            duration_secs: row.duration_secs,
            event_at: row.event_at,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}
