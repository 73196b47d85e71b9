use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{Page, PageRequest, StoreError, UpsertOutcome, UserStore, VideoStore};
use crate::models::{Credentials, Platform, User, UserProfile, UserRow, Video, VideoRow};

const VIDEO_COLUMNS: &str = "id, user_id, url, video_id, platform, kind, title, channel, \
     channel_id, category, description, thumb_url, duration_secs, event_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn timeout_query<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(e)) => {
                tracing::error!("Database error: {:?}", e);
                Err(StoreError::from_sqlx(e))
            }
            Err(_) => {
                tracing::error!("Query timeout after {:?}", self.query_timeout);
                Err(StoreError::Timeout(self.query_timeout))
            }
        }
    }
}

fn into_videos(rows: Vec<VideoRow>) -> Result<Vec<Video>, StoreError> {
    rows.into_iter()
        .map(|row| {
            Video::try_from(row).map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))
        })
        .collect()
}

/// Column prefix of a platform's credential group in `users`.
fn credential_prefix(platform: Platform) -> &'static str {
    match platform {
        Platform::YouTube => "yt",
        Platform::Twitch => "tw",
    }
}

#[async_trait]
impl VideoStore for PgStore {
    #[tracing::instrument(name = "Upsert video", skip(self, video), fields(user_id = video.user_id, url = %video.url))]
    async fn upsert(&self, video: &Video) -> Result<UpsertOutcome, StoreError> {
        // xmax is zero only for a freshly inserted tuple
        let query = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO videos (user_id, url, video_id, platform, kind, title, channel,
                                channel_id, category, description, thumb_url, duration_secs, event_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id, url) DO UPDATE SET
                video_id = COALESCE(videos.video_id, EXCLUDED.video_id),
                kind = EXCLUDED.kind,
                title = EXCLUDED.title,
                channel = EXCLUDED.channel,
                channel_id = EXCLUDED.channel_id,
                category = EXCLUDED.category,
                description = EXCLUDED.description,
                thumb_url = EXCLUDED.thumb_url,
                duration_secs = EXCLUDED.duration_secs,
                event_at = EXCLUDED.event_at,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(video.user_id)
        .bind(&video.url)
        .bind(&video.video_id)
        .bind(video.platform.as_str())
        .bind(video.kind.as_str())
        .bind(&video.title)
        .bind(&video.channel)
        .bind(&video.channel_id)
        .bind(&video.category)
        .bind(&video.description)
        .bind(&video.thumb_url)
        .bind(video.duration_secs)
        .bind(video.event_at);

        let inserted = self.timeout_query(query.fetch_one(&self.pool)).await?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    #[tracing::instrument(name = "Query videos", skip(self))]
    async fn query(
        &self,
        user_id: i64,
        page: PageRequest,
        channel_id: Option<&str>,
    ) -> Result<Page<Video>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE user_id = "));
        builder.push_bind(user_id);
        if let Some(channel_id) = channel_id {
            builder.push(" AND channel_id = ");
            builder.push_bind(channel_id);
        }
        builder.push(" ORDER BY event_at DESC, id DESC LIMIT ");
        builder.push_bind(page.size);
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = self
            .timeout_query(builder.build_query_as::<VideoRow>().fetch_all(&self.pool))
            .await?;

        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM videos WHERE user_id = ");
        count_builder.push_bind(user_id);
        if let Some(channel_id) = channel_id {
            count_builder.push(" AND channel_id = ");
            count_builder.push_bind(channel_id);
        }

        let total = self
            .timeout_query(count_builder.build_query_scalar::<i64>().fetch_one(&self.pool))
            .await?;

        Ok(Page {
            items: into_videos(rows)?,
            total,
        })
    }

    #[tracing::instrument(name = "Search videos", skip(self))]
    async fn search(
        &self,
        user_id: i64,
        page: PageRequest,
        text: &str,
    ) -> Result<Page<Video>, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Page::empty());
        }

        let sql = format!(
            r#"
            SELECT {VIDEO_COLUMNS}
            FROM videos, websearch_to_tsquery('simple', $2) AS q
            WHERE user_id = $1 AND search_vector @@ q
            ORDER BY ts_rank(search_vector, q) DESC, event_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let query = sqlx::query_as::<_, VideoRow>(&sql)
            .bind(user_id)
            .bind(text)
            .bind(page.size)
            .bind(page.offset());
        let rows = self.timeout_query(query.fetch_all(&self.pool)).await?;

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM videos
            WHERE user_id = $1 AND search_vector @@ websearch_to_tsquery('simple', $2)
            "#,
        )
        .bind(user_id)
        .bind(text);
        let total = self.timeout_query(count.fetch_one(&self.pool)).await?;

        Ok(Page {
            items: into_videos(rows)?,
            total,
        })
    }

    #[tracing::instrument(name = "Fetch video by id", skip(self))]
    async fn video_by_id(&self, user_id: i64, id: i64) -> Result<Option<Video>, StoreError> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE user_id = $1 AND id = $2");
        let query = sqlx::query_as::<_, VideoRow>(&sql).bind(user_id).bind(id);

        let row = self.timeout_query(query.fetch_optional(&self.pool)).await?;
        Ok(into_videos(row.into_iter().collect())?.pop())
    }

    #[tracing::instrument(name = "List stored live videos", skip(self))]
    async fn live_videos(
        &self,
        user_id: i64,
        platform: Option<Platform>,
    ) -> Result<Vec<Video>, StoreError> {
        let sql = format!(
            r#"
            SELECT {VIDEO_COLUMNS} FROM videos
            WHERE user_id = $1
              AND kind IN ('live', 'scheduled-live')
              AND ($2::text IS NULL OR platform = $2)
            ORDER BY event_at DESC, id DESC
            "#
        );
        let query = sqlx::query_as::<_, VideoRow>(&sql)
            .bind(user_id)
            .bind(platform.map(|p| p.as_str()));

        into_videos(self.timeout_query(query.fetch_all(&self.pool)).await?)
    }

    #[tracing::instrument(name = "Delete video by upstream id", skip(self))]
    async fn delete_by_upstream_id(&self, user_id: i64, video_id: &str) -> Result<u64, StoreError> {
        let query = sqlx::query("DELETE FROM videos WHERE user_id = $1 AND video_id = $2")
            .bind(user_id)
            .bind(video_id);

        let result = self.timeout_query(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "Prune old videos", skip(self))]
    async fn prune_older_than(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let query = sqlx::query("DELETE FROM videos WHERE event_at < $1").bind(cutoff);

        let result = self.timeout_query(query.execute(&self.pool)).await?;
        tracing::info!("Pruned {} videos older than {}", result.rows_affected(), cutoff);
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PgStore {
    #[tracing::instrument(name = "List users", skip(self))]
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let query = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY id");
        let rows = self.timeout_query(query.fetch_all(&self.pool)).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    #[tracing::instrument(name = "Fetch user by id", skip(self))]
    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let query = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1").bind(user_id);
        let row = self.timeout_query(query.fetch_optional(&self.pool)).await?;
        Ok(row.map(User::from))
    }

    #[tracing::instrument(name = "Fetch user by name", skip(self))]
    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let query =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = $1").bind(username);
        let row = self.timeout_query(query.fetch_optional(&self.pool)).await?;
        Ok(row.map(User::from))
    }

    #[tracing::instrument(name = "Fetch user by linked channel", skip(self))]
    async fn user_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let p = credential_prefix(platform);
        let sql = format!("SELECT * FROM users WHERE {p}_channel_id = $1");
        let query = sqlx::query_as::<_, UserRow>(&sql).bind(channel_id);

        let row = self.timeout_query(query.fetch_optional(&self.pool)).await?;
        Ok(row.map(User::from))
    }

    #[tracing::instrument(name = "Saving user in the database", skip(self, profile), fields(username = %profile.username))]
    async fn save_user(&self, profile: &UserProfile) -> Result<User, StoreError> {
        // A credential group is replaced only when the profile carries a new access token.
        let query = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, avatar_url, time_zone,
                               yt_channel_id, yt_access_token, yt_refresh_token, yt_expires_at,
                               tw_channel_id, tw_access_token, tw_refresh_token, tw_expires_at)
            VALUES ($1, $2, COALESCE($3, 'UTC'), $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (username) DO UPDATE SET
                avatar_url = CASE WHEN EXCLUDED.avatar_url = '' THEN users.avatar_url
                                  ELSE EXCLUDED.avatar_url END,
                time_zone = COALESCE($3, users.time_zone),
                yt_channel_id = COALESCE(EXCLUDED.yt_channel_id, users.yt_channel_id),
                yt_access_token = COALESCE(EXCLUDED.yt_access_token, users.yt_access_token),
                yt_refresh_token = COALESCE(EXCLUDED.yt_refresh_token, users.yt_refresh_token),
                yt_expires_at = CASE WHEN EXCLUDED.yt_access_token IS NULL THEN users.yt_expires_at
                                     ELSE EXCLUDED.yt_expires_at END,
                tw_channel_id = COALESCE(EXCLUDED.tw_channel_id, users.tw_channel_id),
                tw_access_token = COALESCE(EXCLUDED.tw_access_token, users.tw_access_token),
                tw_refresh_token = COALESCE(EXCLUDED.tw_refresh_token, users.tw_refresh_token),
                tw_expires_at = CASE WHEN EXCLUDED.tw_access_token IS NULL THEN users.tw_expires_at
                                     ELSE EXCLUDED.tw_expires_at END,
                updated_at = clock_timestamp()
            RETURNING *
            "#,
        )
        .bind(&profile.username)
        .bind(&profile.avatar_url)
        .bind(&profile.time_zone)
        .bind(profile.youtube.as_ref().map(|c| c.channel_id.as_str()))
        .bind(profile.youtube.as_ref().map(|c| c.access_token.as_str()))
        .bind(profile.youtube.as_ref().and_then(|c| c.refresh_token.as_deref()))
        .bind(profile.youtube.as_ref().and_then(|c| c.expires_at))
        .bind(profile.twitch.as_ref().map(|c| c.channel_id.as_str()))
        .bind(profile.twitch.as_ref().map(|c| c.access_token.as_str()))
        .bind(profile.twitch.as_ref().and_then(|c| c.refresh_token.as_deref()))
        .bind(profile.twitch.as_ref().and_then(|c| c.expires_at));

        let row = self.timeout_query(query.fetch_one(&self.pool)).await?;
        tracing::info!("Saved user {} (id {})", row.username, row.id);
        Ok(User::from(row))
    }

    #[tracing::instrument(name = "Persist refreshed credentials", skip(self, credentials))]
    async fn update_credentials(
        &self,
        user_id: i64,
        platform: Platform,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        let p = credential_prefix(platform);
        let sql = format!(
            "UPDATE users SET {p}_channel_id = $2, {p}_access_token = $3, \
             {p}_refresh_token = COALESCE($4, {p}_refresh_token), {p}_expires_at = $5 \
             WHERE id = $1"
        );
        let query = sqlx::query(&sql)
            .bind(user_id)
            .bind(&credentials.channel_id)
            .bind(&credentials.access_token)
            .bind(&credentials.refresh_token)
            .bind(credentials.expires_at);

        let result = self.timeout_query(query.execute(&self.pool)).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[tracing::instrument(name = "Update user time zone", skip(self))]
    async fn update_time_zone(&self, user_id: i64, time_zone: &str) -> Result<User, StoreError> {
        let query = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET time_zone = $2, updated_at = clock_timestamp() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(time_zone);

        self.timeout_query(query.fetch_optional(&self.pool))
            .await?
            .map(User::from)
            .ok_or(StoreError::NotFound)
    }

    #[tracing::instrument(name = "Prune inactive users", skip(self))]
    async fn prune_inactive_users(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let pool = self.pool.clone();

        let (videos, users) = self
            .timeout_query(async move {
                let mut transaction = pool.begin().await?;

                let videos = sqlx::query(
                    "DELETE FROM videos WHERE user_id IN (SELECT id FROM users WHERE updated_at < $1)",
                )
                .bind(cutoff)
                .execute(&mut *transaction)
                .await?
                .rows_affected();

                let users = sqlx::query("DELETE FROM users WHERE updated_at < $1")
                    .bind(cutoff)
                    .execute(&mut *transaction)
                    .await?
                    .rows_affected();

                transaction.commit().await?;
                Ok::<_, sqlx::Error>((videos, users))
            })
            .await?;

        tracing::info!("Pruned {} inactive users and {} of their videos", users, videos);
        Ok(users)
    }
}
