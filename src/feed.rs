//! Per-user view of stored videos: local times, pagination metadata and
//! human-readable lengths. Storage stays in UTC; conversion happens here only.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::models::{Platform, User, Video, VideoKind};
use crate::normalize::elapsed_secs;
use crate::store::{Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    /// 0 on the first page.
    pub previous: i64,
    /// 0 on the last page.
    pub next: i64,
    pub last: i64,
    pub total: i64,
}

impl Pagination {
    pub fn new(page: i64, total: i64, size: i64) -> Self {
        let page = page.max(1);
        let size = size.max(1);
        let last = (total + size - 1) / size;

        Self {
            page,
            previous: if page > 1 { page - 1 } else { 0 },
            next: if page < last { page + 1 } else { 0 },
            last,
            total,
        }
    }
}

/// Resolves an IANA zone name, falling back to UTC.
pub fn resolve_time_zone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown time zone {:?}, using UTC", name);
        chrono_tz::UTC
    })
}

pub fn is_valid_time_zone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

/// `1h 02m 03s`, `4m 05s` or `12s`.
pub fn length_label(secs: i32) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s:02}s"),
        _ => format!("{h}h {m:02}m {s:02}s"),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedVideo {
    pub id: Option<i64>,
    pub url: String,
    pub video_id: Option<String>,
    pub platform: Platform,
    pub kind: VideoKind,
    pub title: String,
    pub channel: String,
    pub channel_id: String,
    pub category: String,
    pub description: String,
    pub thumb_url: String,
    pub duration_secs: i32,
    pub length: String,
    /// Event time in the viewer's zone, RFC 3339.
    pub event_at: String,
}

impl FeedVideo {
    pub fn new(video: Video, tz: &Tz, now: DateTime<Utc>) -> Self {
        // the stored duration of a live row is only the value at its last sync
        let duration_secs = match video.kind {
            VideoKind::Live => elapsed_secs(video.event_at, now),
            _ => video.duration_secs,
        };

        Self {
            event_at: video.event_at.with_timezone(tz).to_rfc3339(),
            length: length_label(duration_secs),
            duration_secs,
            id: video.id,
            url: video.url,
            video_id: video.video_id,
            platform: video.platform,
            kind: video.kind,
            title: video.title,
            channel: video.channel,
            channel_id: video.channel_id,
            category: video.category,
            description: video.description,
            thumb_url: video.thumb_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub videos: Vec<FeedVideo>,
    pub pagination: Pagination,
    pub time_zone: String,
    /// Set when the requested page lies past the end; the caller should
    /// navigate here instead.
    pub redirect_page: Option<i64>,
}

pub fn present_page(user: &User, page: Page<Video>, request: PageRequest, now: DateTime<Utc>) -> FeedPage {
    let tz = resolve_time_zone(&user.time_zone);
    let pagination = Pagination::new(request.page, page.total, request.size);
    let redirect_page =
        (page.items.is_empty() && request.page > 1).then(|| pagination.last.max(1));

    FeedPage {
        videos: page
            .items
            .into_iter()
            .map(|v| FeedVideo::new(v, &tz, now))
            .collect(),
        pagination,
        time_zone: tz.name().to_string(),
        redirect_page,
    }
}

pub fn present_videos(user: &User, videos: Vec<Video>, now: DateTime<Utc>) -> Vec<FeedVideo> {
    let tz = resolve_time_zone(&user.time_zone);
    videos
        .into_iter()
        .map(|v| FeedVideo::new(v, &tz, now))
        .collect()
}
