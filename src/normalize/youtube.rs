use chrono::{DateTime, Utc};

use super::{elapsed_secs, is_clip, parse_duration, parse_timestamp, Rules};
use crate::models::{Platform, Video, VideoKind};
use crate::sources::youtube::YoutubeVideoItem;
use crate::sources::SourceError;

pub(super) fn normalize(
    user_id: i64,
    item: &YoutubeVideoItem,
    rules: &Rules,
    now: DateTime<Utc>,
) -> Result<Option<Video>, SourceError> {
    let snippet = item.snippet.as_ref().ok_or_else(|| {
        SourceError::MalformedPayload(format!("video {} has no snippet", item.id))
    })?;
    let live = item.live_streaming_details.clone().unwrap_or_default();

    let missing = |field: &str| {
        SourceError::MalformedPayload(format!("video {} has no {}", item.id, field))
    };

    let (kind, event_at, duration_secs) = match snippet.live_broadcast_content.as_deref() {
        Some("upcoming") => {
            let scheduled = live
                .scheduled_start_time
                .as_deref()
                .ok_or_else(|| missing("scheduledStartTime"))?;
            (VideoKind::ScheduledLive, parse_timestamp(scheduled)?, 0)
        }
        Some("live") => {
            let started = live
                .actual_start_time
                .as_deref()
                .ok_or_else(|| missing("actualStartTime"))?;
            let started = parse_timestamp(started)?;
            (VideoKind::Live, started, elapsed_secs(started, now))
        }
        _ => {
            let duration = match &item.content_details {
                Some(details) => parse_duration(&details.duration)?,
                None => 0,
            };
            if is_clip(duration, rules.youtube_min_vod_secs) {
                tracing::debug!("Discarding short YouTube video {} ({}s)", item.id, duration);
                return Ok(None);
            }
            (VideoKind::Vod, parse_timestamp(&snippet.published_at)?, duration)
        }
    };

    Ok(Some(Video {
        id: None,
        user_id,
        url: format!("https://www.youtube.com/watch?v={}", item.id),
        video_id: Some(item.id.clone()),
        platform: Platform::YouTube,
        kind,
        title: snippet.title.clone(),
        channel: snippet.channel_title.clone(),
        channel_id: snippet.channel_id.clone(),
        category: String::new(),
        description: snippet.description.clone(),
        thumb_url: snippet
            .thumbnails
            .best()
            .map(|t| t.url.clone())
            .unwrap_or_default(),
        duration_secs,
        event_at,
        created_at: None,
        updated_at: None,
    }))
}
