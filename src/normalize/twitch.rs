use chrono::{DateTime, Utc};

use super::{elapsed_secs, is_clip, parse_duration, parse_timestamp, Rules};
use crate::models::{Platform, Video, VideoKind};
use crate::sources::twitch::{TwitchStream, TwitchVideo};
use crate::sources::SourceError;

const THUMB_WIDTH: &str = "640";
const THUMB_HEIGHT: &str = "360";

/// Expands Helix thumbnail templates (`{width}x{height}` for streams,
/// `%{width}x%{height}` for videos).
fn expand_thumbnail(template: &str) -> String {
    template
        .replace("%{width}", THUMB_WIDTH)
        .replace("%{height}", THUMB_HEIGHT)
        .replace("{width}", THUMB_WIDTH)
        .replace("{height}", THUMB_HEIGHT)
}

pub(super) fn normalize_video(
    user_id: i64,
    video: &TwitchVideo,
    rules: &Rules,
) -> Result<Option<Video>, SourceError> {
    let duration_secs = parse_duration(&video.duration)?;
    if is_clip(duration_secs, rules.twitch_min_vod_secs) {
        tracing::debug!("Discarding short Twitch video {} ({}s)", video.id, duration_secs);
        return Ok(None);
    }

    let published = video
        .published_at
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&video.created_at);

    Ok(Some(Video {
        id: None,
        user_id,
        url: video.url.clone(),
        video_id: Some(video.id.clone()),
        platform: Platform::Twitch,
        kind: VideoKind::Vod,
        title: video.title.clone(),
        channel: video.user_name.clone(),
        channel_id: video.user_login.clone(),
        category: String::new(),
        description: video.description.clone(),
        thumb_url: expand_thumbnail(&video.thumbnail_url),
        duration_secs,
        event_at: parse_timestamp(published)?,
        created_at: None,
        updated_at: None,
    }))
}

pub(super) fn normalize_stream(
    user_id: i64,
    stream: &TwitchStream,
    now: DateTime<Utc>,
) -> Result<Option<Video>, SourceError> {
    if stream.stream_type != "live" {
        tracing::debug!("Skipping Twitch stream {} of type {:?}", stream.id, stream.stream_type);
        return Ok(None);
    }

    let started = parse_timestamp(&stream.started_at)?;

    Ok(Some(Video {
        id: None,
        user_id,
        url: format!("https://www.twitch.tv/{}", stream.user_login),
        video_id: Some(stream.id.clone()),
        platform: Platform::Twitch,
        kind: VideoKind::Live,
        title: stream.title.clone(),
        channel: stream.user_name.clone(),
        channel_id: stream.user_login.clone(),
        category: stream.game_name.clone(),
        description: String::new(),
        thumb_url: expand_thumbnail(&stream.thumbnail_url),
        duration_secs: elapsed_secs(started, now),
        event_at: started,
        created_at: None,
        updated_at: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn video(id: &str, duration: &str) -> TwitchVideo {
        serde_json::from_value(json!({
            "id": id,
            "user_id": "77",
            "user_login": "streamer",
            "user_name": "Streamer",
            "title": format!("video {id}"),
            "description": "",
            "created_at": "2024-02-01T08:00:00Z",
            "published_at": "2024-02-01T09:00:00Z",
            "url": format!("https://www.twitch.tv/videos/{id}"),
            "thumbnail_url": "https://static/%{width}x%{height}.jpg",
            "duration": duration,
            "type": "archive"
        }))
        .unwrap()
    }

    #[test]
    fn long_video_is_kept() {
        let v = normalize_video(3, &video("1", "1h0m0s"), &Rules::default())
            .unwrap()
            .unwrap();
        assert_eq!(v.kind, VideoKind::Vod);
        assert_eq!(v.duration_secs, 3600);
        assert_eq!(v.url, "https://www.twitch.tv/videos/1");
        assert_eq!(v.channel_id, "streamer");
        assert_eq!(v.thumb_url, "https://static/640x360.jpg");
        assert_eq!(v.event_at, Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn clip_length_video_is_discarded() {
        assert!(normalize_video(3, &video("2", "5m0s"), &Rules::default())
            .unwrap()
            .is_none());
        assert!(normalize_video(3, &video("3", "5m1s"), &Rules::default())
            .unwrap()
            .is_some());
    }

    #[test]
    fn live_stream_reports_elapsed_time() {
        let stream: TwitchStream = serde_json::from_value(json!({
            "id": "s9",
            "user_login": "caster",
            "user_name": "Caster",
            "game_name": "Go",
            "type": "live",
            "title": "tournament",
            "started_at": "2024-02-01T10:00:00Z",
            "thumbnail_url": "https://static/live_{width}x{height}.jpg"
        }))
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 10, 15, 0).unwrap();

        let v = normalize_stream(3, &stream, now).unwrap().unwrap();
        assert_eq!(v.kind, VideoKind::Live);
        assert_eq!(v.duration_secs, 900);
        assert_eq!(v.url, "https://www.twitch.tv/caster");
        assert_eq!(v.video_id.as_deref(), Some("s9"));
        assert_eq!(v.category, "Go");
        assert_eq!(v.thumb_url, "https://static/live_640x360.jpg");
    }

    #[test]
    fn errored_stream_is_skipped() {
        let stream: TwitchStream = serde_json::from_value(json!({
            "id": "s1",
            "user_login": "c",
            "user_name": "C",
            "type": "",
            "title": "",
            "started_at": "2024-02-01T10:00:00Z"
        }))
        .unwrap();
        assert!(normalize_stream(1, &stream, Utc::now()).unwrap().is_none());
    }
}
