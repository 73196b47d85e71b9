use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::api::common::utils::{require_user, setup_session_cookies, spawn_user_sync};
use crate::errors::AppError;
use crate::feed::is_valid_time_zone;
use crate::models::{Platform, User};
use crate::store::UserStore;
use crate::InnerState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub username: String,
    pub avatar_url: String,
    pub time_zone: String,
    pub platforms: Vec<Platform>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            time_zone: user.time_zone.clone(),
            platforms: user.linked_platforms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub time_zone: String,
}

#[tracing::instrument(name = "Current user", skip(inner, cookies))]
pub async fn me(
    cookies: Cookies,
    State(inner): State<InnerState>,
) -> Result<Json<UserResponse>, AppError> {
    let user = require_user(&inner, &cookies).await?;
    Ok(Json(UserResponse::from(&user)))
}

/// Stores a new display time zone. The change rotates the session, so fresh
/// cookies go out with the response.
#[tracing::instrument(name = "Update user preferences", skip(inner, cookies))]
pub async fn update(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = require_user(&inner, &cookies).await?;

    let time_zone = payload.time_zone.trim();
    if !is_valid_time_zone(time_zone) {
        return Err(AppError::Validation(format!(
            "Unknown time zone: {}",
            time_zone
        )));
    }

    let user = inner.store.update_time_zone(user.id, time_zone).await?;
    tracing::info!(user_id = user.id, "Time zone set to {}", user.time_zone);

    setup_session_cookies(&inner, &user, &cookies);
    let response = UserResponse::from(&user);
    spawn_user_sync(&inner, user);

    Ok(Json(response))
}
