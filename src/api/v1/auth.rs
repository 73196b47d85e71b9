use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    Json,
};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::api::common::utils::{
    clear_session_cookies, current_user, set_oauth_state_cookie, setup_session_cookies,
    spawn_user_sync, take_oauth_state,
};
use crate::errors::AppError;
use crate::models::{Credentials, Platform, User, UserProfile};
use crate::session::constant_time_eq;
use crate::sources::oauth::{exchange_code, generate_auth_url};
use crate::store::{StoreError, UserStore};
use crate::InnerState;

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub logged_in: bool,
    pub youtube_url: Option<String>,
    pub twitch_url: Option<String>,
}

/// Authorization URLs for every configured platform. Each URL's `state`
/// is pinned in a short-lived cookie for the callback to check.
#[tracing::instrument(name = "Login options", skip(inner, cookies))]
pub async fn login(
    cookies: Cookies,
    State(inner): State<InnerState>,
) -> Result<Json<LoginResponse>, AppError> {
    let logged_in = current_user(&inner, &cookies).await?.is_some();
    let url_for = |platform| {
        inner.oauth_clients.get(platform).map(|client| {
            let (url, state) = generate_auth_url(client, platform);
            set_oauth_state_cookie(&inner, &cookies, platform, state);
            url
        })
    };

    Ok(Json(LoginResponse {
        logged_in,
        youtube_url: url_for(Platform::YouTube),
        twitch_url: url_for(Platform::Twitch),
    }))
}

/// Checks the provider's answer against the pending `state` and returns the
/// authorization code.
fn authorization_code(
    query: AuthRequest,
    expected_state: Option<String>,
    platform: Platform,
) -> Result<String, AppError> {
    if let Some(error) = query.error {
        tracing::warn!("{} authorization denied: {}", platform, error);
        return Err(AppError::Authentication(anyhow::anyhow!(
            "{} authorization denied: {}",
            platform,
            error
        )));
    }

    let state_matches = match (expected_state.as_deref(), query.state.as_deref()) {
        (Some(expected), Some(received)) => constant_time_eq(expected, received),
        _ => false,
    };
    if !state_matches {
        tracing::warn!("{} callback with missing or mismatched state", platform);
        return Err(AppError::Authentication(anyhow::anyhow!(
            "{} login state does not match",
            platform
        )));
    }

    query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))
}

fn not_configured(platform: Platform) -> AppError {
    AppError::NotFound(format!("{} login is not configured", platform))
}

/// Username of an account created by a login. Built from the upstream id,
/// which never changes and never collides across platforms.
fn stable_username(platform: Platform, channel_id: &str) -> String {
    let prefix = match platform {
        Platform::YouTube => "yt",
        Platform::Twitch => "tw",
    };
    format!("{prefix}:{channel_id}")
}

/// Picks the account a login lands on: the one that already linked this
/// upstream account, else the signed-in user, else a new account.
async fn login_username<S>(
    store: &S,
    signed_in: Option<&User>,
    platform: Platform,
    channel_id: &str,
) -> Result<String, StoreError>
where
    S: UserStore + ?Sized,
{
    if let Some(owner) = store.user_by_channel(platform, channel_id).await? {
        return Ok(owner.username);
    }

    Ok(match signed_in {
        Some(user) => {
            tracing::info!("Linking {} account to user {}", platform, user.username);
            user.username.clone()
        }
        None => stable_username(platform, channel_id),
    })
}

/// Saves the profile, starts the session and kicks off a first sync.
async fn complete_login(
    inner: &InnerState,
    cookies: &Cookies,
    platform: Platform,
    avatar_url: String,
    credentials: Credentials,
) -> Result<Redirect, AppError> {
    let signed_in = current_user(inner, cookies).await?;
    let username = login_username(
        inner.store.as_ref(),
        signed_in.as_ref(),
        platform,
        &credentials.channel_id,
    )
    .await?;

    let mut profile = UserProfile {
        username,
        avatar_url,
        ..UserProfile::default()
    };
    match platform {
        Platform::YouTube => profile.youtube = Some(credentials),
        Platform::Twitch => profile.twitch = Some(credentials),
    }

    let user = inner.store.save_user(&profile).await?;
    tracing::info!(user_id = user.id, "User {} logged in", user.username);

    setup_session_cookies(inner, &user, cookies);
    spawn_user_sync(inner, user);

    Ok(Redirect::to("/"))
}

#[tracing::instrument(name = "YouTube OAuth callback", skip(inner, cookies, query))]
pub async fn oauth_youtube(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(query): Query<AuthRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (client, youtube) = match (&inner.oauth_clients.youtube, &inner.youtube) {
        (Some(client), Some(youtube)) => (client, youtube),
        _ => return Err(not_configured(Platform::YouTube)),
    };
    let expected_state = take_oauth_state(&cookies, Platform::YouTube);
    let code = authorization_code(query, expected_state, Platform::YouTube)?;

    let grant = exchange_code(client, code).await?;
    let profile = youtube.profile(&grant.access_token).await?;
    tracing::debug!(
        "YouTube channel {} ({}) authorized",
        profile.channel_id,
        profile.display_name
    );

    complete_login(
        &inner,
        &cookies,
        Platform::YouTube,
        profile.avatar_url,
        grant.into_credentials(profile.channel_id),
    )
    .await
}

#[tracing::instrument(name = "Twitch OAuth callback", skip(inner, cookies, query))]
pub async fn oauth_twitch(
    cookies: Cookies,
    State(inner): State<InnerState>,
    Query(query): Query<AuthRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (client, twitch) = match (&inner.oauth_clients.twitch, &inner.twitch) {
        (Some(client), Some(twitch)) => (client, twitch),
        _ => return Err(not_configured(Platform::Twitch)),
    };
    let expected_state = take_oauth_state(&cookies, Platform::Twitch);
    let code = authorization_code(query, expected_state, Platform::Twitch)?;

    let grant = exchange_code(client, code).await?;
    let profile = twitch.profile(&grant.access_token).await?;
    tracing::debug!("Twitch user {} authorized", profile.login);

    complete_login(
        &inner,
        &cookies,
        Platform::Twitch,
        profile.avatar_url,
        grant.into_credentials(profile.user_id),
    )
    .await
}

#[tracing::instrument(name = "Logout", skip(cookies))]
pub async fn logout(cookies: Cookies) -> Redirect {
    clear_session_cookies(&cookies);
    Redirect::to("/")
}
