//! Persistence for posts, accounts and publish history
//!
//! The service layer only talks to [`Repository`]. Two implementations ship:
//! [`Database`] (SQLite, used by the daemon) and [`MemoryRepository`] (tests
//! and embedding).
//!
//! Status changes that race with the scheduler go through the conditional
//! methods (`transition_status`, `update_post_if_status`, `delete_post`),
//! which only write when the stored status still matches the caller's view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureKind, Result};
use crate::types::{
    sort_publish_queue, Platform, Post, PostMetrics, PostPriority, PostStatus, PostType,
    SocialAccount,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::Database;

/// How `list_posts` orders its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Newest first.
    #[default]
    Recent,
    /// Publish-queue order (priority, then schedule, then creation).
    Queue,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub user_id: Option<i64>,
    pub status: Option<PostStatus>,
    pub post_type: Option<PostType>,
    pub priority: Option<PostPriority>,
    /// Case-insensitive term matched against content, title and description.
    pub search: Option<String>,
    /// At least one target account is on this platform.
    pub platform: Option<Platform>,
    /// Inclusive lower bound on `scheduled_at`. Unscheduled posts never match.
    pub scheduled_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `scheduled_at`. Unscheduled posts never match.
    pub scheduled_before: Option<DateTime<Utc>>,
    pub order: ListOrder,
    pub limit: Option<usize>,
}

impl PostFilter {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    /// Every criterion that can be read off the post itself.
    ///
    /// `platform` needs the target accounts and is left to the repository.
    pub fn matches(&self, post: &Post) -> bool {
        self.user_id.map_or(true, |id| post.user_id() == id)
            && self.status.map_or(true, |s| post.status() == s)
            && self.post_type.map_or(true, |t| post.post_type() == t)
            && self.priority.map_or(true, |p| post.priority() == p)
            && self.matches_schedule(post)
            && self.search.as_deref().map_or(true, |term| mentions_term(post, term))
    }

    fn matches_schedule(&self, post: &Post) -> bool {
        if self.scheduled_after.is_none() && self.scheduled_before.is_none() {
            return true;
        }
        post.scheduled_at().is_some_and(|at| {
            self.scheduled_after.map_or(true, |start| at >= start)
                && self.scheduled_before.map_or(true, |end| at <= end)
        })
    }

    /// Sort and truncate an already filtered set.
    pub(crate) fn arrange(&self, mut posts: Vec<Post>) -> Vec<Post> {
        match self.order {
            ListOrder::Recent => posts.sort_by(|a, b| {
                b.created_at()
                    .cmp(&a.created_at())
                    .then_with(|| a.id().cmp(&b.id()))
            }),
            ListOrder::Queue => sort_publish_queue(&mut posts),
        }
        if let Some(limit) = self.limit {
            posts.truncate(limit);
        }
        posts
    }
}

fn mentions_term(post: &Post, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    [Some(post.content()), post.title(), post.description()]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&term))
}

/// Narrows a user's account listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub platform: Option<Platform>,
    /// Only accounts flagged connected.
    pub connected_only: bool,
    /// Only accounts that can be published to right now: connected with a live token.
    pub usable_only: bool,
}

impl AccountFilter {
    pub fn matches(&self, account: &SocialAccount, now: DateTime<Utc>) -> bool {
        self.platform.map_or(true, |p| account.platform == p)
            && (!self.connected_only || account.connected)
            && (!self.usable_only || account.is_usable(now))
    }
}

/// Outcome of one publish attempt to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: Option<i64>,
    pub post_id: Uuid,
    pub account_id: i64,
    pub platform: Platform,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub post_id: Uuid,
    pub metrics: PostMetrics,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_post(&self, post: &Post) -> Result<()>;

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>>;

    /// Overwrite a post. Fails with `NotFound` when it does not exist.
    async fn update_post(&self, post: &Post) -> Result<()>;

    /// Overwrite a post only if its stored status is still `expected`.
    async fn update_post_if_status(&self, post: &Post, expected: PostStatus) -> Result<bool>;

    /// Delete a post and its owned rows if its stored status is `expected`.
    async fn delete_post(&self, id: Uuid, expected: PostStatus) -> Result<bool>;

    async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>>;

    /// Scheduled posts whose time has come, in publish-queue order.
    async fn find_due_posts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>>;

    /// Failed posts with retries left, not permanently failed, whose back-off has elapsed.
    async fn find_retry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>>;

    /// Compare-and-swap on status. `false` when the stored status is not `from`.
    async fn transition_status(&self, id: Uuid, from: PostStatus, to: PostStatus) -> Result<bool>;

    /// Scheduled or Publishing posts owned by `user_id`.
    async fn count_active_posts(&self, user_id: i64) -> Result<usize>;

    /// Scheduled posts targeting `account_id` with `scheduled_at` in `[start, end]`.
    async fn count_scheduled_in_window(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize>;

    /// Store an account and return its id. An `id` of 0 asks for a fresh one.
    async fn create_account(&self, account: &SocialAccount) -> Result<i64>;

    async fn find_account(&self, id: i64) -> Result<Option<SocialAccount>>;

    async fn find_account_by_external_id(
        &self,
        user_id: i64,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>>;

    async fn update_account(&self, account: &SocialAccount) -> Result<()>;

    async fn delete_account(&self, id: i64) -> Result<bool>;

    async fn list_accounts(&self, user_id: i64) -> Result<Vec<SocialAccount>>;

    async fn record_publish_results(&self, records: &[PublishRecord]) -> Result<()>;

    /// Oldest first.
    async fn list_publish_records(&self, post_id: Uuid) -> Result<Vec<PublishRecord>>;

    async fn record_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()>;

    async fn list_metrics_snapshots(&self, post_id: Uuid) -> Result<Vec<MetricsSnapshot>>;
}
