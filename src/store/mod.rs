//! Persistence for users and their videos.
//!
//! `(user_id, url)` is unique in the video table; every write path relies on
//! that constraint instead of application-level locking.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Credentials, Platform, User, UserProfile, Video};

pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("record not found")]
    NotFound,
}

impl StoreError {
    /// Classifies a sqlx error, separating integrity violations (SQLSTATE
    /// class 23) from other failures.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err)
                if db_err.code().is_some_and(|code| code.starts_with("23")) =>
            {
                StoreError::Constraint(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| db_err.message().to_string()),
                )
            }
            _ => StoreError::Database(err),
        }
    }
}

/// One-based page selector. Non-positive pages normalize to the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    /// Pages whose offset would overflow are clamped; they lie far past
    /// any stored row and come back empty.
    pub fn new(page: i64, size: i64) -> Self {
        let size = size.max(1);
        Self {
            page: page.clamp(1, i64::MAX / size),
            size,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

/// A window of results plus the count of everything that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Inserts the video or refreshes the mutable fields of the row that
    /// already holds `(user_id, url)`.
    async fn upsert(&self, video: &Video) -> Result<UpsertOutcome, StoreError>;

    /// Newest first by `event_at`, optionally restricted to one channel.
    async fn query(
        &self,
        user_id: i64,
        page: PageRequest,
        channel_id: Option<&str>,
    ) -> Result<Page<Video>, StoreError>;

    /// Ranked full-text search. Blank input yields an empty page.
    async fn search(
        &self,
        user_id: i64,
        page: PageRequest,
        text: &str,
    ) -> Result<Page<Video>, StoreError>;

    /// One of the user's videos by row id; another user's id finds nothing.
    async fn video_by_id(&self, user_id: i64, id: i64) -> Result<Option<Video>, StoreError>;

    /// Stored live and scheduled rows of one user.
    async fn live_videos(
        &self,
        user_id: i64,
        platform: Option<Platform>,
    ) -> Result<Vec<Video>, StoreError>;

    async fn delete_by_upstream_id(&self, user_id: i64, video_id: &str)
        -> Result<u64, StoreError>;

    /// Removes every video whose `event_at` is older than `days` days.
    async fn prune_older_than(&self, days: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// The user that linked the upstream account `channel_id` on `platform`.
    async fn user_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Creates the user or merges `profile` into the existing row. Always
    /// bumps `updated_at`, which rotates the session digest.
    async fn save_user(&self, profile: &UserProfile) -> Result<User, StoreError>;

    /// Persists refreshed tokens without touching `updated_at`.
    async fn update_credentials(
        &self,
        user_id: i64,
        platform: Platform,
        credentials: &Credentials,
    ) -> Result<(), StoreError>;

    async fn update_time_zone(&self, user_id: i64, time_zone: &str) -> Result<User, StoreError>;

    /// Deletes users not updated within `days` days, their videos first.
    async fn prune_inactive_users(&self, days: i64) -> Result<u64, StoreError>;
}

pub trait Store: VideoStore + UserStore {}

impl<T: VideoStore + UserStore> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_pages_normalize_to_first() {
        assert_eq!(PageRequest::new(0, 42), PageRequest::new(1, 42));
        assert_eq!(PageRequest::new(-3, 42).offset(), 0);
        assert_eq!(PageRequest::new(3, 42).offset(), 84);
        assert_eq!(PageRequest::new(2, 0).size, 1);
    }

    #[test]
    fn huge_pages_do_not_overflow() {
        let request = PageRequest::new(i64::MAX, 42);
        assert!(request.offset() > 0);
        assert_eq!(request.page, i64::MAX / 42);
        assert_eq!(PageRequest::new(i64::MAX, 1).offset(), i64::MAX - 1);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            StoreError::from_sqlx(sqlx::Error::RowNotFound),
            StoreError::NotFound
        ));
    }
}
