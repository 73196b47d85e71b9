//! Maps raw adapter payloads to canonical [`Video`] records.
//!
//! Pure: the only inputs are the raw item, the discard rules and the
//! wall-clock instant used for elapsed-time computation.

mod twitch;
mod youtube;

use chrono::{DateTime, Utc};

use crate::models::Video;
use crate::sources::{RawItem, SourceError};

/// Provider-specific discard thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Rules {
    /// VODs of this length or shorter are treated as clips and dropped.
    /// Zero disables the rule.
    pub youtube_min_vod_secs: i32,
    pub twitch_min_vod_secs: i32,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            youtube_min_vod_secs: 0,
            twitch_min_vod_secs: 300,
        }
    }
}

/// `Ok(None)` means the item was deliberately discarded.
pub fn normalize(
    user_id: i64,
    item: &RawItem,
    rules: &Rules,
    now: DateTime<Utc>,
) -> Result<Option<Video>, SourceError> {
    match item {
        RawItem::YouTube(item) => youtube::normalize(user_id, item, rules, now),
        RawItem::TwitchVideo(video) => twitch::normalize_video(user_id, video, rules),
        RawItem::TwitchStream(stream) => twitch::normalize_stream(user_id, stream, now),
    }
}

pub(crate) fn is_clip(duration_secs: i32, min_vod_secs: i32) -> bool {
    min_vod_secs > 0 && duration_secs <= min_vod_secs
}

/// Seconds between `since` and `now`, never negative.
pub fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let secs = (now - since).num_seconds().max(0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SourceError::MalformedPayload(format!("invalid timestamp {value:?}: {e}")))
}

/// Parses ISO-8601 durations (`PT1H2M3S`, `P1DT2H`) and Twitch lengths
/// (`3h8m33s`) into seconds.
pub(crate) fn parse_duration(duration_str: &str) -> Result<i32, SourceError> {
    let malformed = || SourceError::MalformedPayload(format!("invalid duration {duration_str:?}"));

    let body = duration_str.trim();
    let body = body.strip_prefix('P').unwrap_or(body);

    let mut total_seconds = 0i64;
    let mut current_num = String::new();
    let mut in_time = !duration_str.trim().starts_with('P');

    for c in body.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }
        if c == 'T' {
            in_time = true;
            continue;
        }

        let num: i64 = current_num.parse().map_err(|_| malformed())?;
        total_seconds += match c.to_ascii_uppercase() {
            'W' if !in_time => num * 7 * 86_400,
            'D' if !in_time => num * 86_400,
            'H' => num * 3_600,
            'M' if in_time => num * 60,
            'S' => num,
            _ => return Err(malformed()),
        };
        current_num.clear();
    }

    if !current_num.is_empty() {
        return Err(malformed());
    }

    i32::try_from(total_seconds).map_err(|_| malformed())
}
