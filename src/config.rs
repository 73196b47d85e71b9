//! Process configuration, read once at startup from the environment
//! (optionally seeded from a `.env` file).

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::normalize::Rules;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Client id and secret of one OAuth application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformApp {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,
    pub public_url: String,
    pub session_secret: String,
    pub youtube: Option<PlatformApp>,
    pub twitch: Option<PlatformApp>,
    pub video_retention_days: i64,
    pub user_inactivity_days: i64,
    pub sync_tick: Duration,
    pub sync_every_minutes: u32,
    pub sync_concurrency: usize,
    pub page_size: i64,
    pub youtube_min_vod_secs: i32,
    pub twitch_min_vod_secs: i32,
    pub recent_videos_per_channel: usize,
    pub max_subscriptions: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let app = |id: &'static str, secret: &'static str| match (get(id), get(secret)) {
            (Some(client_id), Some(client_secret)) => Some(PlatformApp {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let settings = Settings {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8181".to_string()),
            public_url: get("PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8181".to_string())
                .trim_end_matches('/')
                .to_string(),
            session_secret: required("SESSION_SECRET")?,
            youtube: app("YOUTUBE_CLIENT_ID", "YOUTUBE_CLIENT_SECRET"),
            twitch: app("TWITCH_CLIENT_ID", "TWITCH_CLIENT_SECRET"),
            video_retention_days: parse_or(&get, "VIDEO_RETENTION_DAYS", 10)?,
            user_inactivity_days: parse_or(&get, "USER_INACTIVITY_DAYS", 30)?,
            sync_tick: Duration::from_secs(parse_or(&get, "SYNC_TICK_SECONDS", 30)?),
            sync_every_minutes: parse_or(&get, "SYNC_EVERY_MINUTES", 30)?,
            sync_concurrency: parse_or(&get, "SYNC_CONCURRENCY", 1)?,
            page_size: parse_or(&get, "PAGE_SIZE", 42)?,
            youtube_min_vod_secs: parse_or(&get, "YOUTUBE_MIN_VOD_SECONDS", 0)?,
            twitch_min_vod_secs: parse_or(&get, "TWITCH_MIN_VOD_SECONDS", 300)?,
            recent_videos_per_channel: parse_or(&get, "RECENT_VIDEOS_PER_CHANNEL", 5)?,
            max_subscriptions: parse_or(&get, "MAX_SUBSCRIPTIONS", 500)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.youtube.is_none() && self.twitch.is_none() {
            return Err(ConfigError::Missing(
                "YOUTUBE_CLIENT_ID/SECRET or TWITCH_CLIENT_ID/SECRET",
            ));
        }
        if !(1..=60).contains(&self.sync_every_minutes) {
            return Err(invalid("SYNC_EVERY_MINUTES", "must be between 1 and 60"));
        }
        if self.sync_tick.is_zero() {
            return Err(invalid("SYNC_TICK_SECONDS", "must be positive"));
        }
        if self.sync_concurrency == 0 {
            return Err(invalid("SYNC_CONCURRENCY", "must be positive"));
        }
        if self.page_size < 1 {
            return Err(invalid("PAGE_SIZE", "must be positive"));
        }
        if self.video_retention_days < 1 || self.user_inactivity_days < 1 {
            return Err(invalid("VIDEO_RETENTION_DAYS/USER_INACTIVITY_DAYS", "must be positive"));
        }
        Ok(())
    }

    pub fn rules(&self) -> Rules {
        Rules {
            youtube_min_vod_secs: self.youtube_min_vod_secs,
            twitch_min_vod_secs: self.twitch_min_vod_secs,
        }
    }

    pub fn redirect_url(&self, path: &str) -> String {
        format!("{}{}", self.public_url, path)
    }
}

fn invalid(var: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
