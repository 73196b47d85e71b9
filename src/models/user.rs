use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::Platform;

/// OAuth linkage of a user to one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// External channel (YouTube) or broadcaster (Twitch) id of the user.
    pub channel_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// True when the access token is past (or within `leeway` of) its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - leeway <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
    /// IANA zone name; falls back to UTC at presentation time when invalid.
    pub time_zone: String,
    #[serde(skip)]
    pub youtube: Option<Credentials>,
    #[serde(skip)]
    pub twitch: Option<Credentials>,
    pub created_at: DateTime<Utc>,
    /// Doubles as the session rotation nonce.
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn credentials(&self, platform: Platform) -> Option<&Credentials> {
        match platform {
            Platform::YouTube => self.youtube.as_ref(),
            Platform::Twitch => self.twitch.as_ref(),
        }
    }

    pub fn linked_platforms(&self) -> Vec<Platform> {
        [Platform::YouTube, Platform::Twitch]
            .into_iter()
            .filter(|p| self.credentials(*p).is_some())
            .collect()
    }
}

/// Fields supplied by a login or a preference change; keyed by `username`.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub username: String,
    pub avatar_url: String,
    pub time_zone: Option<String>,
    pub youtube: Option<Credentials>,
    pub twitch: Option<Credentials>,
}

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
    pub time_zone: String,
    pub yt_channel_id: Option<String>,
    pub yt_access_token: Option<String>,
    pub yt_refresh_token: Option<String>,
    pub yt_expires_at: Option<DateTime<Utc>>,
    pub tw_channel_id: Option<String>,
    pub tw_access_token: Option<String>,
    pub tw_refresh_token: Option<String>,
    pub tw_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn linked(
    channel_id: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Option<Credentials> {
    match (channel_id, access_token) {
        (Some(channel_id), Some(access_token)) if !access_token.is_empty() => Some(Credentials {
            channel_id,
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        }),
        _ => None,
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            avatar_url: row.avatar_url,
            time_zone: row.time_zone,
            youtube: linked(
                row.yt_channel_id,
                row.yt_access_token,
                row.yt_refresh_token,
                row.yt_expires_at,
            ),
            twitch: linked(
                row.tw_channel_id,
                row.tw_access_token,
                row.tw_refresh_token,
                row.tw_expires_at,
            ),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
