use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::api::common::page_or_first;
use crate::api::common::utils::require_user;
use crate::errors::AppError;
use crate::feed::{present_page, present_videos, resolve_time_zone, FeedPage, FeedVideo};
use crate::models::Platform;
use crate::store::{PageRequest, VideoStore};
use crate::InnerState;

#[derive(Debug, Deserialize)]
pub struct VideosQuery {
    pub page: Option<i64>,
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub platform: Option<Platform>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveResponse {
    pub count: usize,
    pub videos: Vec<FeedVideo>,
}

/// Newest videos first, optionally limited to one channel.
#[tracing::instrument(name = "List feed videos", skip(inner, cookies))]
pub async fn videos(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(params): Query<VideosQuery>,
) -> Result<Json<FeedPage>, AppError> {
    let user = require_user(&inner, &cookies).await?;
    let request = PageRequest::new(page_or_first(params.page), inner.page_size);
    let channel_id = params.channel_id.as_deref().filter(|c| !c.trim().is_empty());

    let page = inner.store.query(user.id, request, channel_id).await?;
    tracing::debug!("Returning {} of {} videos", page.items.len(), page.total);

    Ok(Json(present_page(&user, page, request, Utc::now())))
}

/// A single video of the signed-in user.
#[tracing::instrument(name = "Get feed video", skip(inner, cookies))]
pub async fn video(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Path(id): Path<i64>,
) -> Result<Json<FeedVideo>, AppError> {
    let user = require_user(&inner, &cookies).await?;
    let video = inner
        .store
        .video_by_id(user.id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))?;

    let tz = resolve_time_zone(&user.time_zone);
    Ok(Json(FeedVideo::new(video, &tz, Utc::now())))
}

#[tracing::instrument(name = "Search feed videos", skip(inner, cookies))]
pub async fn search(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<FeedPage>, AppError> {
    let user = require_user(&inner, &cookies).await?;
    let text = params.q.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::Validation("Search text is required".to_string()));
    }

    let request = PageRequest::new(page_or_first(params.page), inner.page_size);
    let page = inner.store.search(user.id, request, &text).await?;

    Ok(Json(present_page(&user, page, request, Utc::now())))
}

/// Streams the last sync saw in progress or announced.
#[tracing::instrument(name = "List live videos", skip(inner, cookies))]
pub async fn live(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(params): Query<LiveQuery>,
) -> Result<Json<LiveResponse>, AppError> {
    let user = require_user(&inner, &cookies).await?;
    let videos = inner.store.live_videos(user.id, params.platform).await?;
    let videos = present_videos(&user, videos, Utc::now());

    Ok(Json(LiveResponse {
        count: videos.len(),
        videos,
    }))
}
