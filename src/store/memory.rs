//! In-memory store used as a test double for the sync loop and web layer.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Page, PageRequest, StoreError, UpsertOutcome, UserStore, VideoStore};
use crate::models::{Credentials, Platform, User, UserProfile, Video};

#[derive(Default)]
struct State {
    users: Vec<User>,
    videos: Vec<Video>,
    next_user_id: i64,
    next_video_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored video, in insertion order.
    pub fn videos(&self) -> Vec<Video> {
        self.state.lock().unwrap().videos.clone()
    }

    /// Overrides `updated_at`, for exercising inactivity pruning.
    pub fn set_user_updated_at(&self, user_id: i64, updated_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.updated_at = updated_at;
        }
    }
}

fn paginate(mut videos: Vec<Video>, page: PageRequest) -> Page<Video> {
    let total = videos.len() as i64;
    let items = videos
        .drain(..)
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(usize::try_from(page.size).unwrap_or(usize::MAX))
        .collect();
    Page { items, total }
}

fn newest_first(a: &Video, b: &Video) -> std::cmp::Ordering {
    b.event_at.cmp(&a.event_at).then(b.id.cmp(&a.id))
}

/// Approximates the weighted search vector: title 8, channel 4, category 2, description 1.
fn rank(video: &Video, terms: &[String]) -> u32 {
    let weighted = [
        (&video.title, 8),
        (&video.channel, 4),
        (&video.category, 2),
        (&video.description, 1),
    ];
    terms
        .iter()
        .map(|term| {
            weighted
                .iter()
                .filter(|(field, _)| field.to_lowercase().contains(term.as_str()))
                .map(|(_, weight)| *weight)
                .sum::<u32>()
        })
        .try_fold(0, |acc, score| (score > 0).then_some(acc + score))
        .unwrap_or(0)
}

fn merge_credentials(current: &mut Option<Credentials>, incoming: &Option<Credentials>) {
    if let Some(incoming) = incoming {
        let refresh_token = incoming
            .refresh_token
            .clone()
            .or_else(|| current.as_ref().and_then(|c| c.refresh_token.clone()));
        *current = Some(Credentials {
            refresh_token,
            ..incoming.clone()
        });
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn upsert(&self, video: &Video) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.users.iter().any(|u| u.id == video.user_id) {
            return Err(StoreError::Constraint("videos_user_id_fkey".to_string()));
        }

        let now = Utc::now();
        if let Some(existing) = state
            .videos
            .iter_mut()
            .find(|v| v.user_id == video.user_id && v.url == video.url)
        {
            *existing = Video {
                id: existing.id,
                user_id: existing.user_id,
                url: existing.url.clone(),
                video_id: existing.video_id.clone().or_else(|| video.video_id.clone()),
                platform: existing.platform,
                created_at: existing.created_at,
                updated_at: Some(now),
                ..video.clone()
            };
            return Ok(UpsertOutcome::Updated);
        }

        state.next_video_id += 1;
        let id = state.next_video_id;
        state.videos.push(Video {
            id: Some(id),
            created_at: Some(now),
            updated_at: Some(now),
            ..video.clone()
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn query(
        &self,
        user_id: i64,
        page: PageRequest,
        channel_id: Option<&str>,
    ) -> Result<Page<Video>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<Video> = state
            .videos
            .iter()
            .filter(|v| v.user_id == user_id)
            .filter(|v| channel_id.map_or(true, |c| v.channel_id == c))
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        Ok(paginate(matching, page))
    }

    async fn search(
        &self,
        user_id: i64,
        page: PageRequest,
        text: &str,
    ) -> Result<Page<Video>, StoreError> {
        let terms: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return Ok(Page::empty());
        }

        let state = self.state.lock().unwrap();
        let mut ranked: Vec<(u32, Video)> = state
            .videos
            .iter()
            .filter(|v| v.user_id == user_id)
            .map(|v| (rank(v, &terms), v.clone()))
            .filter(|(score, _)| *score > 0)
            .collect();
        ranked.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| newest_first(a, b)));
        Ok(paginate(ranked.into_iter().map(|(_, v)| v).collect(), page))
    }

    async fn video_by_id(&self, user_id: i64, id: i64) -> Result<Option<Video>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .videos
            .iter()
            .find(|v| v.user_id == user_id && v.id == Some(id))
            .cloned())
    }

    async fn live_videos(
        &self,
        user_id: i64,
        platform: Option<Platform>,
    ) -> Result<Vec<Video>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut live: Vec<Video> = state
            .videos
            .iter()
            .filter(|v| v.user_id == user_id && v.kind.is_live())
            .filter(|v| platform.map_or(true, |p| v.platform == p))
            .cloned()
            .collect();
        live.sort_by(newest_first);
        Ok(live)
    }

    async fn delete_by_upstream_id(&self, user_id: i64, video_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.videos.len();
        state
            .videos
            .retain(|v| !(v.user_id == user_id && v.video_id.as_deref() == Some(video_id)));
        Ok((before - state.videos.len()) as u64)
    }

    async fn prune_older_than(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut state = self.state.lock().unwrap();
        let before = state.videos.len();
        state.videos.retain(|v| v.event_at >= cutoff);
        Ok((before - state.videos.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.username == username).cloned())
    }

    async fn user_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.credentials(platform).is_some_and(|c| c.channel_id == channel_id))
            .cloned())
    }

    async fn save_user(&self, profile: &UserProfile) -> Result<User, StoreError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some(user) = state
            .users
            .iter_mut()
            .find(|u| u.username == profile.username)
        {
            if !profile.avatar_url.is_empty() {
                user.avatar_url = profile.avatar_url.clone();
            }
            if let Some(tz) = &profile.time_zone {
                user.time_zone = tz.clone();
            }
            merge_credentials(&mut user.youtube, &profile.youtube);
            merge_credentials(&mut user.twitch, &profile.twitch);
            // strictly increasing, so the session digest always rotates
            user.updated_at = now.max(user.updated_at + chrono::Duration::microseconds(1));
            return Ok(user.clone());
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: profile.username.clone(),
            avatar_url: profile.avatar_url.clone(),
            time_zone: profile.time_zone.clone().unwrap_or_else(|| "UTC".to_string()),
            youtube: profile.youtube.clone(),
            twitch: profile.twitch.clone(),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn update_credentials(
        &self,
        user_id: i64,
        platform: Platform,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound)?;
        let slot = match platform {
            Platform::YouTube => &mut user.youtube,
            Platform::Twitch => &mut user.twitch,
        };
        merge_credentials(slot, &Some(credentials.clone()));
        Ok(())
    }

    async fn update_time_zone(&self, user_id: i64, time_zone: &str) -> Result<User, StoreError> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound)?;
        user.time_zone = time_zone.to_string();
        user.updated_at = Utc::now().max(user.updated_at + chrono::Duration::microseconds(1));
        Ok(user.clone())
    }

    async fn prune_inactive_users(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut state = self.state.lock().unwrap();
        let stale: Vec<i64> = state
            .users
            .iter()
            .filter(|u| u.updated_at < cutoff)
            .map(|u| u.id)
            .collect();
        state.videos.retain(|v| !stale.contains(&v.user_id));
        state.users.retain(|u| !stale.contains(&u.id));
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoKind;
    use chrono::Duration;

    async fn user(store: &MemoryStore, name: &str) -> User {
        store
            .save_user(&UserProfile {
                username: name.to_string(),
                ..UserProfile::default()
            })
            .await
            .unwrap()
    }

    fn video(user_id: i64, n: i64, event_at: DateTime<Utc>) -> Video {
        Video {
            id: None,
            user_id,
            url: format!("https://www.youtube.com/watch?v={n}"),
            video_id: Some(n.to_string()),
            platform: Platform::YouTube,
            kind: VideoKind::Vod,
            title: format!("video {n}"),
            channel: "Channel".to_string(),
            channel_id: if n % 2 == 0 { "even" } else { "odd" }.to_string(),
            category: String::new(),
            description: String::new(),
            thumb_url: String::new(),
            duration_secs: 60,
            event_at,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn repeated_upserts_keep_one_row() {
        let store = MemoryStore::new();
        let u = user(&store, "alice").await;
        let v = video(u.id, 1, Utc::now());

        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.upsert(&v).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.videos().len(), 1);
    }

    #[tokio::test]
    async fn query_pages_newest_first_with_total() {
        let store = MemoryStore::new();
        let u = user(&store, "bob").await;
        let now = Utc::now();
        for n in 0..10 {
            store
                .upsert(&video(u.id, n, now - Duration::hours(n)))
                .await
                .unwrap();
        }

        let page = store.query(u.id, PageRequest::new(2, 4), None).await.unwrap();
        assert_eq!(page.total, 10);
        let titles: Vec<_> = page.items.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["video 4", "video 5", "video 6", "video 7"]);

        let beyond = store.query(u.id, PageRequest::new(9, 4), None).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 10);

        let even = store
            .query(u.id, PageRequest::new(1, 42), Some("even"))
            .await
            .unwrap();
        assert_eq!(even.total, 5);
    }

    #[tokio::test]
    async fn huge_page_numbers_are_empty_not_fatal() {
        let store = MemoryStore::new();
        let u = user(&store, "carol").await;
        store.upsert(&video(u.id, 1, Utc::now())).await.unwrap();

        let page = store
            .query(u.id, PageRequest::new(i64::MAX, 42), None)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn pruning_respects_the_cutoff_and_is_idempotent() {
        let store = MemoryStore::new();
        let u = user(&store, "dave").await;
        let now = Utc::now();
        store.upsert(&video(u.id, 1, now)).await.unwrap();
        store
            .upsert(&video(u.id, 2, now - Duration::days(10) + Duration::minutes(5)))
            .await
            .unwrap();
        store
            .upsert(&video(u.id, 3, now - Duration::days(10) - Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(store.prune_older_than(10).await.unwrap(), 1);
        assert_eq!(store.prune_older_than(10).await.unwrap(), 0);
        let mut titles: Vec<_> = store.videos().into_iter().map(|v| v.title).collect();
        titles.sort();
        assert_eq!(titles, vec!["video 1", "video 2"]);
    }

    #[tokio::test]
    async fn search_ranks_title_over_description() {
        let store = MemoryStore::new();
        let u = user(&store, "erin").await;
        let now = Utc::now();
        for n in 0..5 {
            let mut v = video(u.id, n, now - Duration::hours(n));
            v.description = "a speedrun of the whole game".to_string();
            store.upsert(&v).await.unwrap();
        }
        // oldest, but the only title hit
        let mut titled = video(u.id, 9, now - Duration::days(3));
        titled.title = "Speedrun marathon".to_string();
        store.upsert(&titled).await.unwrap();
        store.upsert(&video(u.id, 10, now)).await.unwrap();

        let first = store.search(u.id, PageRequest::new(1, 4), "speedrun").await.unwrap();
        assert_eq!(first.total, 6);
        assert_eq!(first.items.len(), 4);
        assert_eq!(first.items[0].title, "Speedrun marathon");
        assert_eq!(first.items[1].title, "video 0");

        let second = store.search(u.id, PageRequest::new(2, 4), "speedrun").await.unwrap();
        assert_eq!(second.total, 6);
        assert_eq!(second.items.len(), 2);
        assert!(second.items.iter().all(|v| v.title != "video 10"));
    }

    #[tokio::test]
    async fn inactive_users_take_their_videos_with_them() {
        let store = MemoryStore::new();
        let stale = user(&store, "stale").await;
        let active = user(&store, "active").await;
        store.upsert(&video(stale.id, 1, Utc::now())).await.unwrap();
        store.upsert(&video(active.id, 2, Utc::now())).await.unwrap();
        store.set_user_updated_at(stale.id, Utc::now() - Duration::days(31));

        assert_eq!(store.prune_inactive_users(30).await.unwrap(), 1);
        assert_eq!(store.prune_inactive_users(30).await.unwrap(), 0);
        assert!(store.videos().iter().all(|v| v.user_id == active.id));
    }
}
