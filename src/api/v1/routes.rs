//! Feed and account endpoints, nested under `/api/v1`.

use axum::routing::get;
use axum::Router;

use crate::api::v1::feed::{live, search, video, videos};
use crate::api::v1::user::{me, update};
use crate::InnerState;

pub fn create_v1_routes() -> Router<InnerState> {
    tracing::info!("Setting up V1 API routes");

    Router::new()
        .route("/videos", get(videos))
        .route("/videos/:id", get(video))
        .route("/search", get(search))
        .route("/live", get(live))
        .route("/user", get(me).post(update))
}
