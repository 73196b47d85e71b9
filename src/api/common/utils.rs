use cookie::{Cookie, SameSite};
use time::OffsetDateTime;
use tower_cookies::Cookies;

use crate::errors::AppError;
use crate::models::{Platform, User};
use crate::session::{SESSION_COOKIE, USERNAME_COOKIE};
use crate::InnerState;

const SESSION_DAYS: i64 = 30;
const OAUTH_STATE_MINUTES: i64 = 10;

fn oauth_state_cookie_name(platform: Platform) -> String {
    format!("oauth_state_{}", platform)
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    cookie.set_expires(OffsetDateTime::now_utc() + time::Duration::days(SESSION_DAYS));
    cookie
}

/// Issues the username and digest cookies for `user`.
pub fn setup_session_cookies(inner: &InnerState, user: &User, cookies: &Cookies) {
    let token = inner.sessions.token_for(user);
    cookies.add(session_cookie(
        USERNAME_COOKIE,
        user.username.clone(),
        inner.secure_cookies,
    ));
    cookies.add(session_cookie(SESSION_COOKIE, token, inner.secure_cookies));
}

pub fn clear_session_cookies(cookies: &Cookies) {
    for name in [USERNAME_COOKIE, SESSION_COOKIE] {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path("/");
        cookies.remove(cookie);
    }
}

/// Remembers the `state` of an authorization URL until its callback arrives.
pub fn set_oauth_state_cookie(inner: &InnerState, cookies: &Cookies, platform: Platform, state: String) {
    let mut cookie = Cookie::new(oauth_state_cookie_name(platform), state);
    cookie.set_path("/");
    cookie.set_http_only(true);
    // the provider redirect is a top-level navigation, which Lax still carries
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(inner.secure_cookies);
    cookie.set_max_age(time::Duration::minutes(OAUTH_STATE_MINUTES));
    cookies.add(cookie);
}

/// Returns and clears the pending `state` for `platform`. Single use.
pub fn take_oauth_state(cookies: &Cookies, platform: Platform) -> Option<String> {
    let name = oauth_state_cookie_name(platform);
    let state = cookies.get(&name).map(|c| c.value().to_string());

    let mut expired = Cookie::new(name, "");
    expired.set_path("/");
    cookies.remove(expired);

    state.filter(|s| !s.is_empty())
}

/// The logged-in user, or `None` for anonymous requests and stale sessions.
pub async fn current_user(inner: &InnerState, cookies: &Cookies) -> Result<Option<User>, AppError> {
    let value = |name: &str| {
        cookies
            .get(name)
            .map(|c| c.value().to_string())
            .unwrap_or_default()
    };

    let user = inner
        .sessions
        .current_user(inner.store.as_ref(), &value(USERNAME_COOKIE), &value(SESSION_COOKIE))
        .await?;
    Ok(user)
}

pub async fn require_user(inner: &InnerState, cookies: &Cookies) -> Result<User, AppError> {
    current_user(inner, cookies)
        .await?
        .ok_or_else(AppError::unauthenticated)
}

/// Starts a background sync for one user, as after a login or a settings change.
pub fn spawn_user_sync(inner: &InnerState, user: User) {
    let syncer = inner.syncer.clone();
    tokio::spawn(async move {
        let report = syncer.run_user(&user).await;
        tracing::info!(user = %user.username, ?report, "On-demand sync finished");
    });
}
