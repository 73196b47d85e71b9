use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Idempotent bootstrap of the two tables and their indexes.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id               BIGSERIAL PRIMARY KEY,
    username         TEXT NOT NULL UNIQUE,
    avatar_url       TEXT NOT NULL DEFAULT '',
    time_zone        TEXT NOT NULL DEFAULT 'UTC',
    yt_channel_id    TEXT,
    yt_access_token  TEXT,
    yt_refresh_token TEXT,
    yt_expires_at    TIMESTAMPTZ,
    tw_channel_id    TEXT,
    tw_access_token  TEXT,
    tw_refresh_token TEXT,
    tw_expires_at    TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS videos (
    id            BIGSERIAL PRIMARY KEY,
    user_id       BIGINT NOT NULL REFERENCES users (id),
    url           TEXT NOT NULL,
    video_id      TEXT,
    platform      TEXT NOT NULL,
    kind          TEXT NOT NULL,
    title         TEXT NOT NULL DEFAULT '',
    channel       TEXT NOT NULL DEFAULT '',
    channel_id    TEXT NOT NULL DEFAULT '',
    category      TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    thumb_url     TEXT NOT NULL DEFAULT '',
    duration_secs INTEGER NOT NULL DEFAULT 0,
    event_at      TIMESTAMPTZ NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    search_vector TSVECTOR GENERATED ALWAYS AS (
        setweight(to_tsvector('simple', coalesce(title, '')), 'A') ||
        setweight(to_tsvector('simple', coalesce(channel, '')), 'B') ||
        setweight(to_tsvector('simple', coalesce(category, '')), 'C') ||
        setweight(to_tsvector('simple', coalesce(description, '')), 'D')
    ) STORED,
    CONSTRAINT videos_user_url_key UNIQUE (user_id, url)
);

CREATE INDEX IF NOT EXISTS videos_search_idx ON videos USING GIN (search_vector);
CREATE INDEX IF NOT EXISTS videos_user_event_idx ON videos (user_id, event_at DESC);
CREATE INDEX IF NOT EXISTS videos_user_video_id_idx ON videos (user_id, video_id);
CREATE UNIQUE INDEX IF NOT EXISTS users_yt_channel_key ON users (yt_channel_id)
    WHERE yt_channel_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS users_tw_channel_key ON users (tw_channel_id)
    WHERE tw_channel_id IS NOT NULL;
"#;

#[tracing::instrument(name = "Initialize database", skip(database_url))]
pub async fn init_db(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .inspect_err(|e| tracing::error!("Failed to connect to database: {:?}", e))?;

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .inspect_err(|e| tracing::error!("Failed to bootstrap schema: {:?}", e))?;

    tracing::info!("Database ready ({} max connections)", max_connections);
    Ok(pool)
}
