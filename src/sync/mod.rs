//! Write path: fetch from every linked platform, normalize, upsert.
//!
//! Nothing here is fatal. Failures are isolated to the item, the platform
//! or the user they occur in, logged, and retried on the next pass.

pub mod scheduler;

use std::collections::HashSet;
use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;

use crate::models::{Credentials, Platform, User};
use crate::normalize::{normalize, Rules};
use crate::sources::{LiveNow, RawItem, SourceError, VideoSource};
use crate::store::{Store, UpsertOutcome, UserStore, VideoStore};

/// Tokens expiring within this window are refreshed before use.
const REFRESH_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: u64,
    pub updated: u64,
    pub discarded: u64,
    pub failed: u64,
    pub ended_streams: u64,
    pub skipped_platforms: u64,
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.discarded += other.discarded;
        self.failed += other.failed;
        self.ended_streams += other.ended_streams;
        self.skipped_platforms += other.skipped_platforms;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub video_days: i64,
    pub user_inactivity_days: i64,
}

pub struct Syncer {
    store: Arc<dyn Store>,
    sources: Vec<Arc<dyn VideoSource>>,
    rules: Rules,
    retention: Retention,
    concurrency: usize,
}

impl Syncer {
    pub fn new(
        store: Arc<dyn Store>,
        sources: Vec<Arc<dyn VideoSource>>,
        rules: Rules,
        retention: Retention,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            sources,
            rules,
            retention,
            concurrency: concurrency.max(1),
        }
    }

    /// Syncs every known user. The user list is reloaded on each pass.
    #[tracing::instrument(name = "Full sync pass", skip(self))]
    pub async fn full_pass(&self) -> SyncReport {
        let users = match self.store.list_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Could not load users for sync pass: {}", e);
                return SyncReport::default();
            }
        };

        let user_count = users.len();
        let total = futures::stream::iter(users)
            .map(|user| async move { self.run_user(&user).await })
            .buffer_unordered(self.concurrency)
            .fold(SyncReport::default(), |mut acc, report| async move {
                acc += report;
                acc
            })
            .await;

        tracing::info!(
            users = user_count,
            inserted = total.inserted,
            updated = total.updated,
            discarded = total.discarded,
            failed = total.failed,
            ended_streams = total.ended_streams,
            skipped_platforms = total.skipped_platforms,
            "Sync pass finished"
        );
        total
    }

    /// Syncs one user across all of their linked platforms.
    #[tracing::instrument(name = "Sync user", skip(self, user), fields(user = %user.username))]
    pub async fn run_user(&self, user: &User) -> SyncReport {
        let mut report = SyncReport::default();

        for source in &self.sources {
            let platform = source.platform();
            let Some(credentials) = user.credentials(platform) else {
                continue;
            };

            match self
                .sync_platform(user.id, source.as_ref(), credentials.clone())
                .await
            {
                Ok(platform_report) => report += platform_report,
                Err(e) => {
                    report.skipped_platforms += 1;
                    match e {
                        SourceError::RateLimited { retry_after } => tracing::warn!(
                            %platform,
                            ?retry_after,
                            "Rate limited, skipping platform until next pass"
                        ),
                        e => tracing::error!(%platform, error = %e, "Platform sync failed"),
                    }
                }
            }
        }

        report
    }

    /// Prunes videos past retention and users past the inactivity window.
    #[tracing::instrument(name = "Store maintenance", skip(self))]
    pub async fn maintenance(&self) {
        match self.store.prune_older_than(self.retention.video_days).await {
            Ok(n) => tracing::info!("Pruned {} expired videos", n),
            Err(e) => tracing::error!("Video pruning failed: {}", e),
        }
        match self
            .store
            .prune_inactive_users(self.retention.user_inactivity_days)
            .await
        {
            Ok(n) => tracing::info!("Pruned {} inactive users", n),
            Err(e) => tracing::error!("User pruning failed: {}", e),
        }
    }

    #[tracing::instrument(name = "Sync platform", skip(self, source, credentials), fields(platform = %source.platform()))]
    async fn sync_platform(
        &self,
        user_id: i64,
        source: &dyn VideoSource,
        credentials: Credentials,
    ) -> Result<SyncReport, SourceError> {
        let platform = source.platform();
        let mut session = Session {
            store: self.store.as_ref(),
            user_id,
            source,
            credentials,
        };
        let mut report = SyncReport::default();

        let leeway = chrono::Duration::seconds(REFRESH_LEEWAY_SECS);
        if session.credentials.is_expired(Utc::now(), leeway)
            && session.credentials.refresh_token.is_some()
        {
            session.refresh().await?;
        }

        let channels = session
            .call(|c| async move { source.list_subscriptions(&c).await })
            .await?;
        tracing::debug!("{} subscriptions", channels.len());

        for channel in &channels {
            let items = match session
                .call(|c| async move { source.list_recent_videos(&c, channel).await })
                .await
            {
                Ok(items) => items,
                Err(SourceError::MalformedPayload(reason)) => {
                    tracing::warn!(channel_id = %channel.id, "Skipping channel: {}", reason);
                    report.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            report += self.ingest(user_id, &items).await;
        }

        report += self.reconcile_live(&mut session, platform).await?;

        Ok(report)
    }

    /// Deletes stored live rows the platform no longer reports, then stores
    /// the fresh live items.
    async fn reconcile_live(
        &self,
        session: &mut Session<'_>,
        platform: Platform,
    ) -> Result<SyncReport, SourceError> {
        let source = session.source;
        let stored = match self.store.live_videos(session.user_id, Some(platform)).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::error!("Could not load stored live rows, skipping reconciliation: {}", e);
                None
            }
        };
        let tracked: Vec<String> = stored
            .iter()
            .flatten()
            .filter_map(|v| v.video_id.clone())
            .collect();

        let tracked_ref = &tracked;
        let live = session
            .call(|c| async move { source.list_live_now(&c, tracked_ref).await })
            .await?;

        let mut report = SyncReport::default();
        if !live.complete {
            tracing::warn!("Live listing was truncated, keeping stored live rows this pass");
        }
        if stored.is_some() && live.complete {
            let seen: HashSet<&str> = live.items.iter().map(RawItem::upstream_id).collect();
            for video_id in tracked.iter().filter(|id| !seen.contains(id.as_str())) {
                match self
                    .store
                    .delete_by_upstream_id(session.user_id, video_id)
                    .await
                {
                    Ok(n) => {
                        tracing::info!(video_id = %video_id, "Stream ended, removed {} rows", n);
                        report.ended_streams += n;
                    }
                    Err(e) => {
                        tracing::error!(video_id = %video_id, "Could not remove ended stream: {}", e);
                        report.failed += 1;
                    }
                }
            }
        }

        report += self.ingest(session.user_id, &live.items).await;
        Ok(report)
    }

    /// Normalizes and upserts a batch. Bad items and failed writes are
    /// counted and skipped.
    async fn ingest(&self, user_id: i64, items: &[RawItem]) -> SyncReport {
        let now = Utc::now();
        let mut report = SyncReport::default();

        for item in items {
            let video = match normalize(user_id, item, &self.rules, now) {
                Ok(Some(video)) => video,
                Ok(None) => {
                    report.discarded += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(id = item.upstream_id(), "Skipping malformed item: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.upsert(&video).await {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => {
                    tracing::error!(url = %video.url, "Upsert failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Credentials of one user on one platform for the duration of a sync.
struct Session<'a> {
    store: &'a dyn Store,
    user_id: i64,
    source: &'a dyn VideoSource,
    credentials: Credentials,
}

impl Session<'_> {
    async fn refresh(&mut self) -> Result<(), SourceError> {
        let platform = self.source.platform();
        let refreshed = self.source.refresh_credentials(&self.credentials).await?;

        if let Err(e) = self
            .store
            .update_credentials(self.user_id, platform, &refreshed)
            .await
        {
            tracing::error!(%platform, "Could not persist refreshed credentials: {}", e);
        }

        tracing::info!(%platform, "Refreshed access token");
        self.credentials = refreshed;
        Ok(())
    }

    /// Runs `op`; on `AuthExpired` refreshes the token once and retries.
    async fn call<T, F, Fut>(&mut self, op: F) -> Result<T, SourceError>
    where
        F: Fn(Credentials) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        match op(self.credentials.clone()).await {
            Err(SourceError::AuthExpired) => {
                tracing::debug!("Access token rejected, refreshing");
                self.refresh().await?;
                op(self.credentials.clone()).await
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserProfile, VideoKind};
    use crate::sources::twitch::{TwitchStream, TwitchVideo};
    use crate::sources::ChannelRef;
    use crate::store::memory::MemoryStore;
    use crate::store::{UserStore, VideoStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn vod(id: &str, login: &str, duration: &str) -> RawItem {
        let video: TwitchVideo = serde_json::from_value(json!({
            "id": id,
            "user_login": login,
            "user_name": login,
            "title": format!("vod {id}"),
            "created_at": Utc::now().to_rfc3339(),
            "url": format!("https://www.twitch.tv/videos/{id}"),
            "duration": duration,
            "type": "archive"
        }))
        .unwrap();
        RawItem::TwitchVideo(video)
    }

    fn stream(id: &str, login: &str) -> RawItem {
        let stream: TwitchStream = serde_json::from_value(json!({
            "id": id,
            "user_login": login,
            "user_name": login,
            "type": "live",
            "title": "live now",
            "started_at": Utc::now().to_rfc3339()
        }))
        .unwrap();
        RawItem::TwitchStream(stream)
    }

    /// Scripted Twitch-like source.
    #[derive(Default)]
    struct FakeSource {
        channels: Vec<ChannelRef>,
        videos: HashMap<String, Vec<RawItem>>,
        live: Mutex<Vec<RawItem>>,
        /// Reports the live listing as cut short by a cap.
        live_truncated: bool,
        /// Broadcaster ids whose calls fail upstream.
        broken_users: HashSet<String>,
        rate_limited: bool,
        /// Number of calls answered with `AuthExpired` before succeeding.
        auth_failures: AtomicUsize,
        subscription_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoSource for FakeSource {
        fn platform(&self) -> Platform {
            Platform::Twitch
        }

        async fn refresh_credentials(
            &self,
            credentials: &Credentials,
        ) -> Result<Credentials, SourceError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials {
                access_token: "refreshed".to_string(),
                ..credentials.clone()
            })
        }

        async fn list_subscriptions(
            &self,
            credentials: &Credentials,
        ) -> Result<Vec<ChannelRef>, SourceError> {
            self.subscription_calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited {
                return Err(SourceError::RateLimited { retry_after: Some(30) });
            }
            if self.broken_users.contains(&credentials.channel_id) {
                return Err(SourceError::Upstream(anyhow::anyhow!("HTTP 500")));
            }
            let pending = self.auth_failures.load(Ordering::SeqCst);
            if pending > 0 {
                self.auth_failures.store(pending - 1, Ordering::SeqCst);
                return Err(SourceError::AuthExpired);
            }
            if credentials.access_token == "expired" {
                return Err(SourceError::AuthExpired);
            }
            Ok(self.channels.clone())
        }

        async fn list_recent_videos(
            &self,
            _credentials: &Credentials,
            channel: &ChannelRef,
        ) -> Result<Vec<RawItem>, SourceError> {
            Ok(self.videos.get(&channel.id).cloned().unwrap_or_default())
        }

        async fn list_live_now(
            &self,
            _credentials: &Credentials,
            _tracked: &[String],
        ) -> Result<LiveNow, SourceError> {
            Ok(LiveNow {
                items: self.live.lock().unwrap().clone(),
                complete: !self.live_truncated,
            })
        }
    }

    fn channel(id: &str) -> ChannelRef {
        ChannelRef {
            id: id.to_string(),
            name: id.to_string(),
        }
    }

    async fn linked_user(store: &MemoryStore, name: &str, token: &str) -> User {
        store
            .save_user(&UserProfile {
                username: name.to_string(),
                twitch: Some(Credentials {
                    channel_id: format!("{name}-id"),
                    access_token: token.to_string(),
                    refresh_token: Some("refresh".to_string()),
                    expires_at: None,
                }),
                ..UserProfile::default()
            })
            .await
            .unwrap()
    }

    fn syncer(store: Arc<MemoryStore>, source: Arc<FakeSource>) -> Syncer {
        Syncer::new(
            store,
            vec![source as Arc<dyn VideoSource>],
            Rules::default(),
            Retention {
                video_days: 10,
                user_inactivity_days: 30,
            },
            2,
        )
    }

    #[tokio::test]
    async fn short_vods_are_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        let source = Arc::new(FakeSource {
            channels: vec![channel("c1")],
            videos: HashMap::from([(
                "c1".to_string(),
                vec![vod("1", "c1", "1h2m3s"), vod("2", "c1", "4m10s"), vod("3", "c1", "20m")],
            )]),
            ..FakeSource::default()
        });

        let report = syncer(store.clone(), source).run_user(&user).await;

        assert_eq!(store.videos().len(), 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.discarded, 1);
    }

    #[tokio::test]
    async fn second_pass_updates_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        linked_user(&store, "alice", "token").await;
        let source = Arc::new(FakeSource {
            channels: vec![channel("c1")],
            videos: HashMap::from([("c1".to_string(), vec![vod("1", "c1", "1h")])]),
            ..FakeSource::default()
        });
        let syncer = syncer(store.clone(), source);

        syncer.full_pass().await;
        let report = syncer.full_pass().await;

        assert_eq!(store.videos().len(), 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn ended_stream_is_removed() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        let source = Arc::new(FakeSource {
            channels: vec![channel("c1")],
            videos: HashMap::from([("c1".to_string(), vec![vod("1", "c1", "1h")])]),
            ..FakeSource::default()
        });
        *source.live.lock().unwrap() = vec![stream("s1", "caster")];
        let syncer = syncer(store.clone(), source.clone());

        syncer.run_user(&user).await;
        let live = store.live_videos(user.id, None).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].kind, VideoKind::Live);

        source.live.lock().unwrap().clear();
        let report = syncer.run_user(&user).await;

        assert_eq!(report.ended_streams, 1);
        assert!(store.live_videos(user.id, None).await.unwrap().is_empty());
        assert_eq!(store.videos().len(), 1);
    }

    #[tokio::test]
    async fn truncated_live_listing_keeps_stored_streams() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        let source = Arc::new(FakeSource {
            live_truncated: true,
            ..FakeSource::default()
        });
        *source.live.lock().unwrap() = vec![stream("s1", "first"), stream("s2", "second")];
        let syncer = syncer(store.clone(), source.clone());
        syncer.run_user(&user).await;
        assert_eq!(store.live_videos(user.id, None).await.unwrap().len(), 2);

        // s2 fell past the cap, not off the air
        *source.live.lock().unwrap() = vec![stream("s1", "first")];
        let report = syncer.run_user(&user).await;

        assert_eq!(report.ended_streams, 0);
        assert_eq!(store.live_videos(user.id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "expired").await;
        let source = Arc::new(FakeSource {
            channels: vec![channel("c1")],
            videos: HashMap::from([("c1".to_string(), vec![vod("1", "c1", "1h")])]),
            ..FakeSource::default()
        });

        let report = syncer(store.clone(), source.clone()).run_user(&user).await;

        assert_eq!(report.inserted, 1);
        assert_eq!(source.refresh_calls.load(Ordering::SeqCst), 1);
        let stored = store.user_by_id(user.id).await.unwrap().unwrap();
        let creds = stored.twitch.unwrap();
        assert_eq!(creds.access_token, "refreshed");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(stored.updated_at, user.updated_at);
    }

    #[tokio::test]
    async fn upstream_failure_is_isolated_to_its_user() {
        let store = Arc::new(MemoryStore::new());
        let broken = linked_user(&store, "broken", "token").await;
        let healthy = linked_user(&store, "healthy", "token").await;
        let source = Arc::new(FakeSource {
            channels: vec![channel("c1")],
            videos: HashMap::from([("c1".to_string(), vec![vod("1", "c1", "1h")])]),
            broken_users: HashSet::from(["broken-id".to_string()]),
            ..FakeSource::default()
        });

        let report = syncer(store.clone(), source).full_pass().await;

        assert_eq!(report.skipped_platforms, 1);
        let videos = store.videos();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].user_id, healthy.id);
        assert_ne!(videos[0].user_id, broken.id);
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        let source = Arc::new(FakeSource {
            rate_limited: true,
            ..FakeSource::default()
        });

        let report = syncer(store.clone(), source.clone()).run_user(&user).await;

        assert_eq!(report.skipped_platforms, 1);
        assert_eq!(source.subscription_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unlinked_platforms_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .save_user(&UserProfile {
                username: "nobody".to_string(),
                ..UserProfile::default()
            })
            .await
            .unwrap();
        let source = Arc::new(FakeSource::default());

        let report = syncer(store, source.clone()).run_user(&user).await;

        assert_eq!(report, SyncReport::default());
        assert_eq!(source.subscription_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn maintenance_prunes_stale_users() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        store.set_user_updated_at(user.id, Utc::now() - chrono::Duration::days(45));

        syncer(store.clone(), Arc::new(FakeSource::default()))
            .maintenance()
            .await;

        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn maintenance_prunes_videos_past_retention() {
        let store = Arc::new(MemoryStore::new());
        let user = linked_user(&store, "alice", "token").await;
        let now = Utc::now();
        for (id, age_days) in [("fresh", 1), ("stale", 11)] {
            let mut video = normalize(user.id, &vod(id, "c1", "1h"), &Rules::default(), now)
                .unwrap()
                .unwrap();
            video.event_at = now - chrono::Duration::days(age_days);
            store.upsert(&video).await.unwrap();
        }

        syncer(store.clone(), Arc::new(FakeSource::default()))
            .maintenance()
            .await;

        let titles: Vec<_> = store.videos().into_iter().map(|v| v.title).collect();
        assert_eq!(titles, vec!["vod fresh"]);
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }
}
