//! In-memory repository
//!
//! Everything lives behind one mutex, so each trait call is atomic with
//! respect to every other call, the same guarantee the SQLite conditional
//! updates give.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{MetricsSnapshot, PostFilter, PublishRecord, Repository};
use crate::error::{BufferError, FailureKind, Result};
use crate::types::{sort_publish_queue, Platform, Post, PostStatus, SocialAccount};

#[derive(Default)]
struct State {
    posts: HashMap<Uuid, Post>,
    accounts: BTreeMap<i64, SocialAccount>,
    next_account_id: i64,
    publish_records: Vec<PublishRecord>,
    next_record_id: i64,
    snapshots: Vec<MetricsSnapshot>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_post(&self, post: &Post) -> Result<()> {
        let mut state = self.state();
        if state.posts.contains_key(&post.id()) {
            return Err(BufferError::Conflict(format!("post {} already exists", post.id())));
        }
        state.posts.insert(post.id(), post.clone());
        Ok(())
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        Ok(self.state().posts.get(&id).cloned())
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        let mut state = self.state();
        match state.posts.get_mut(&post.id()) {
            Some(stored) => {
                *stored = post.clone();
                Ok(())
            }
            None => Err(BufferError::NotFound(format!("post {}", post.id()))),
        }
    }

    async fn update_post_if_status(&self, post: &Post, expected: PostStatus) -> Result<bool> {
        let mut state = self.state();
        match state.posts.get_mut(&post.id()) {
            Some(stored) if stored.status() == expected => {
                *stored = post.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BufferError::NotFound(format!("post {}", post.id()))),
        }
    }

    async fn delete_post(&self, id: Uuid, expected: PostStatus) -> Result<bool> {
        let mut state = self.state();
        match state.posts.get(&id) {
            Some(stored) if stored.status() == expected => {
                state.posts.remove(&id);
                state.publish_records.retain(|r| r.post_id != id);
                state.snapshots.retain(|s| s.post_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let state = self.state();
        let targets_platform = |post: &Post| {
            filter.platform.map_or(true, |platform| {
                post.social_account_ids().iter().any(|id| {
                    state
                        .accounts
                        .get(id)
                        .is_some_and(|account| account.platform == platform)
                })
            })
        };
        let posts: Vec<Post> = state
            .posts
            .values()
            .filter(|p| filter.matches(p) && targets_platform(p))
            .cloned()
            .collect();
        Ok(filter.arrange(posts))
    }

    async fn find_due_posts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
        let mut due: Vec<Post> = self
            .state()
            .posts
            .values()
            .filter(|p| p.is_due(now))
            .cloned()
            .collect();
        sort_publish_queue(&mut due);
        due.truncate(limit);
        Ok(due)
    }

    async fn find_retry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
        let mut candidates: Vec<Post> = self
            .state()
            .posts
            .values()
            .filter(|p| {
                p.can_be_retried()
                    && p.error_kind() != Some(FailureKind::Permanent)
                    && p.next_retry_at().map_or(true, |at| at <= now)
            })
            .cloned()
            .collect();
        sort_publish_queue(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn transition_status(&self, id: Uuid, from: PostStatus, to: PostStatus) -> Result<bool> {
        let mut state = self.state();
        match state.posts.remove(&id) {
            Some(stored) if stored.status() == from => {
                state.posts.insert(id, stored.with_stored_status(to));
                Ok(true)
            }
            Some(stored) => {
                state.posts.insert(id, stored);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn count_active_posts(&self, user_id: i64) -> Result<usize> {
        Ok(self
            .state()
            .posts
            .values()
            .filter(|p| p.user_id() == user_id && p.is_active())
            .count())
    }

    async fn count_scheduled_in_window(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize> {
        Ok(self
            .state()
            .posts
            .values()
            .filter(|p| Some(p.id()) != exclude)
            .filter(|p| p.status() == PostStatus::Scheduled)
            .filter(|p| p.social_account_ids().contains(&account_id))
            .filter(|p| p.scheduled_at().is_some_and(|at| at >= start && at <= end))
            .count())
    }

    async fn create_account(&self, account: &SocialAccount) -> Result<i64> {
        let mut state = self.state();
        let id = if account.id > 0 {
            if state.accounts.contains_key(&account.id) {
                return Err(BufferError::Conflict(format!("account {} already exists", account.id)));
            }
            account.id
        } else {
            let highest = state.accounts.keys().next_back().copied().unwrap_or(0);
            state.next_account_id = state.next_account_id.max(highest) + 1;
            state.next_account_id
        };
        let mut stored = account.clone();
        stored.id = id;
        state.accounts.insert(id, stored);
        Ok(id)
    }

    async fn find_account(&self, id: i64) -> Result<Option<SocialAccount>> {
        Ok(self.state().accounts.get(&id).cloned())
    }

    async fn find_account_by_external_id(
        &self,
        user_id: i64,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>> {
        Ok(self
            .state()
            .accounts
            .values()
            .find(|a| a.user_id == user_id && a.platform == platform && a.external_id == external_id)
            .cloned())
    }

    async fn update_account(&self, account: &SocialAccount) -> Result<()> {
        let mut state = self.state();
        match state.accounts.get_mut(&account.id) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(BufferError::NotFound(format!("social account {}", account.id))),
        }
    }

    async fn delete_account(&self, id: i64) -> Result<bool> {
        Ok(self.state().accounts.remove(&id).is_some())
    }

    async fn list_accounts(&self, user_id: i64) -> Result<Vec<SocialAccount>> {
        Ok(self
            .state()
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn record_publish_results(&self, records: &[PublishRecord]) -> Result<()> {
        let mut state = self.state();
        for record in records {
            state.next_record_id += 1;
            let mut stored = record.clone();
            stored.id = Some(state.next_record_id);
            state.publish_records.push(stored);
        }
        Ok(())
    }

    async fn list_publish_records(&self, post_id: Uuid) -> Result<Vec<PublishRecord>> {
        Ok(self
            .state()
            .publish_records
            .iter()
            .filter(|r| r.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn record_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        self.state().snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn list_metrics_snapshots(&self, post_id: Uuid) -> Result<Vec<MetricsSnapshot>> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .filter(|s| s.post_id == post_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewPost;
    use chrono::Duration;

    fn scheduled(minutes_from_now: i64, created: DateTime<Utc>) -> Post {
        Post::create_at(
            NewPost {
                user_id: 1,
                content: "hello".to_string(),
                social_account_ids: vec![5],
                scheduled_at: Some(created + Duration::minutes(minutes_from_now)),
                ..Default::default()
            },
            created,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_transition_status_is_compare_and_swap() {
        let repo = MemoryRepository::new();
        let post = scheduled(5, Utc::now());
        repo.create_post(&post).await.unwrap();

        let first = repo
            .transition_status(post.id(), PostStatus::Scheduled, PostStatus::Publishing)
            .await
            .unwrap();
        let second = repo
            .transition_status(post.id(), PostStatus::Scheduled, PostStatus::Publishing)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        let stored = repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), PostStatus::Publishing);
    }

    #[tokio::test]
    async fn test_find_due_posts_respects_time_and_limit() {
        let repo = MemoryRepository::new();
        let past = Utc::now() - Duration::hours(1);
        let due_a = scheduled(10, past);
        let due_b = scheduled(20, past);
        let later = scheduled(600, past);
        for post in [&due_a, &due_b, &later] {
            repo.create_post(post).await.unwrap();
        }

        let due = repo.find_due_posts(Utc::now(), 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![due_a.id(), due_b.id()]);

        let limited = repo.find_due_posts(Utc::now(), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_owned_rows() {
        let repo = MemoryRepository::new();
        let post = scheduled(5, Utc::now());
        repo.create_post(&post).await.unwrap();
        repo.record_metrics_snapshot(&MetricsSnapshot {
            post_id: post.id(),
            metrics: Default::default(),
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();

        assert!(!repo.delete_post(post.id(), PostStatus::Draft).await.unwrap());
        assert!(repo.delete_post(post.id(), PostStatus::Scheduled).await.unwrap());
        assert!(repo.find_post(post.id()).await.unwrap().is_none());
        assert!(repo.list_metrics_snapshots(post.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_account_assigns_ids() {
        let repo = MemoryRepository::new();
        let account = SocialAccount {
            id: 0,
            user_id: 1,
            platform: Platform::Twitter,
            external_id: "handle".to_string(),
            display_name: None,
            access_token: "t".to_string(),
            connected: true,
            token_expires_at: None,
            created_at: Utc::now(),
        };
        let first = repo.create_account(&account).await.unwrap();
        let second = repo.create_account(&account).await.unwrap();
        assert_ne!(first, second);

        let explicit = SocialAccount { id: 42, ..account };
        assert_eq!(repo.create_account(&explicit).await.unwrap(), 42);
        assert!(repo.create_account(&explicit).await.is_err());
    }
}
