mod api;
mod config;
mod db;
mod errors;
mod feed;
mod models;
mod normalize;
mod session;
mod sources;
mod store;
mod sync;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Settings;
use crate::db::init_db;
use crate::models::Platform;
use crate::session::SessionSigner;
use crate::sources::oauth::{build_oauth_client, OAuthClients};
use crate::sources::twitch::Twitch;
use crate::sources::youtube::YouTube;
use crate::sources::VideoSource;
use crate::store::{PgStore, Store};
use crate::sync::{scheduler, Retention, Syncer};

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct InnerState {
    pub store: Arc<dyn Store>,
    pub syncer: Arc<Syncer>,
    pub sessions: SessionSigner,
    pub oauth_clients: OAuthClients,
    pub youtube: Option<Arc<YouTube>>,
    pub twitch: Option<Arc<Twitch>>,
    pub page_size: i64,
    pub secure_cookies: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subvideo=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let pool = init_db(&settings.database_url, settings.database_max_connections).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool, QUERY_TIMEOUT));

    let mut oauth_clients = OAuthClients::default();
    let mut sources: Vec<Arc<dyn VideoSource>> = Vec::new();

    let youtube = match &settings.youtube {
        Some(app) => {
            let client = build_oauth_client(
                Platform::YouTube,
                app.client_id.clone(),
                app.client_secret.clone(),
                settings.redirect_url("/oauth/youtube"),
            )?;
            oauth_clients.youtube = Some(client.clone());
            let youtube = Arc::new(YouTube::new(
                client,
                settings.recent_videos_per_channel,
                settings.max_subscriptions,
            ));
            sources.push(youtube.clone());
            Some(youtube)
        }
        None => {
            tracing::warn!("YouTube credentials not configured; YouTube sync disabled");
            None
        }
    };

    let twitch = match &settings.twitch {
        Some(app) => {
            let client = build_oauth_client(
                Platform::Twitch,
                app.client_id.clone(),
                app.client_secret.clone(),
                settings.redirect_url("/oauth/twitch"),
            )?;
            oauth_clients.twitch = Some(client.clone());
            let twitch = Arc::new(Twitch::new(
                client,
                app.client_id.clone(),
                settings.recent_videos_per_channel,
                settings.max_subscriptions,
            ));
            sources.push(twitch.clone());
            Some(twitch)
        }
        None => {
            tracing::warn!("Twitch credentials not configured; Twitch sync disabled");
            None
        }
    };

    let syncer = Arc::new(Syncer::new(
        store.clone(),
        sources,
        settings.rules(),
        Retention {
            video_days: settings.video_retention_days,
            user_inactivity_days: settings.user_inactivity_days,
        },
        settings.sync_concurrency,
    ));

    tokio::spawn(scheduler::run(
        syncer.clone(),
        settings.sync_tick,
        settings.sync_every_minutes,
    ));

    let state = InnerState {
        store,
        syncer,
        sessions: SessionSigner::new(settings.session_secret.clone()),
        oauth_clients,
        youtube,
        twitch,
        page_size: settings.page_size,
        secure_cookies: settings.public_url.starts_with("https://"),
    };

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    tracing::debug!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
