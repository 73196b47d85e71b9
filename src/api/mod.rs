//! HTTP surface: login flow at the root, JSON feed endpoints under `/api/v1`.

pub mod common;
pub mod v1;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::common::tracing::{make_span, on_failure, on_request, on_response};
use crate::api::v1::auth::{login, logout, oauth_twitch, oauth_youtube};
use crate::InnerState;

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[tracing::instrument(name = "create_router", skip(state))]
pub fn create_router(state: InnerState) -> Router {
    tracing::info!("Creating API router");

    Router::new()
        .route("/health", get(health_check))
        .route("/login", get(login))
        .route("/oauth/youtube", get(oauth_youtube))
        .route("/oauth/twitch", get(oauth_twitch))
        .route("/logout", get(logout))
        .nest("/api/v1", v1::routes::create_v1_routes())
        .layer(CookieManagerLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_span)
                .on_request(on_request)
                .on_response(on_response)
                .on_failure(on_failure),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
