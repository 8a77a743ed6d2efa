//! Publish use case
//!
//! A publish claims the post (compare-and-swap to Publishing), fans it out
//! to every target account, applies the success policy and records the
//! outcome. Accounts settled by an earlier attempt, delivered or failed
//! permanently, are not published to again.
//!
//! Failures are never retried inside the call. A failed post with retries
//! left and at least one transient failure gets a `next_retry_at`; the
//! scheduler sweep picks it up once that time has passed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{DomainEvent, EventBus};
use super::load_owned;
use super::validation::PostValidator;
use crate::commands::{PublishPost, Validate};
use crate::config::{Config, SuccessPolicy};
use crate::db::Repository;
use crate::error::{BufferError, FailureKind, PlatformError, Result};
use crate::poster::{MultiAccountPoster, PublishResult};
use crate::retry::RetryPolicy;
use crate::types::{Post, PostStatus, SocialAccount};

/// What happened when a post was published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub post_id: Uuid,
    pub status: PostStatus,
    /// The success policy was met.
    pub success: bool,
    /// One entry per target account, in the post's account order.
    pub results: Vec<PublishResult>,
    pub retry_count: u32,
    /// The scheduler sweep will try again.
    pub retry_eligible: bool,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl PublishOutcome {
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}

#[derive(Clone)]
pub struct PublishingService {
    repo: Arc<dyn Repository>,
    config: Arc<Config>,
    validator: PostValidator,
    poster: MultiAccountPoster,
    event_bus: EventBus,
}

impl PublishingService {
    pub fn new(
        repo: Arc<dyn Repository>,
        config: Arc<Config>,
        poster: MultiAccountPoster,
        event_bus: EventBus,
    ) -> Self {
        let validator = PostValidator::new(Arc::clone(&repo), Arc::clone(&config));
        Self {
            repo,
            config,
            validator,
            poster,
            event_bus,
        }
    }

    pub fn success_policy(&self) -> SuccessPolicy {
        self.config.publishing.success_policy
    }

    /// Publish a post now
    ///
    /// # Errors
    ///
    /// - `BufferError::NotFound` if the post does not exist or is not the caller's
    /// - `BufferError::InvalidStateTransition` if the post cannot be published
    /// - `BufferError::Validation` if the target accounts are unusable or the
    ///   content breaks a target platform's limits
    /// - `BufferError::Conflict` if another worker claimed the post first
    ///
    /// Platform failures are not errors: they are reported per account in
    /// the returned [`PublishOutcome`].
    pub async fn publish(&self, command: PublishPost) -> Result<PublishOutcome> {
        command.validate()?;
        let post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        if !post.can_be_published() {
            return Err(BufferError::InvalidStateTransition {
                from: post.status(),
                to: PostStatus::Publishing,
            });
        }
        self.validator
            .validate_publish(&command, &post, Utc::now())
            .await?;

        let post_id = post.id();
        if !self.claim(&post).await? {
            return Err(BufferError::Conflict(format!(
                "post {} is already being published",
                post_id
            )));
        }
        self.publish_claimed(post_id, post.status()).await
    }

    /// Claim and publish a post found by the scheduler.
    ///
    /// `None` when another worker claimed it first or it is no longer publishable.
    pub async fn publish_claimable(&self, post: Post) -> Result<Option<PublishOutcome>> {
        if !post.can_be_published() {
            return Ok(None);
        }
        if !self.claim(&post).await? {
            return Ok(None);
        }
        self.publish_claimed(post.id(), post.status()).await.map(Some)
    }

    /// Move the post to Publishing if its stored status is still the one in `post`.
    async fn claim(&self, post: &Post) -> Result<bool> {
        let expected = post.status();
        // Refuse what the aggregate would refuse before touching the store
        post.clone().mark_as_publishing()?;
        let claimed = self
            .repo
            .transition_status(post.id(), expected, PostStatus::Publishing)
            .await?;
        if claimed {
            tracing::debug!(post_id = %post.id(), from = %expected, "Claimed post");
        } else {
            tracing::debug!(post_id = %post.id(), "Lost claim race");
        }
        Ok(claimed)
    }

    /// Publish a post this worker holds in Publishing
    ///
    /// The stored post is read again after the claim, so an edit that landed
    /// between the caller's read and the claim is what gets published. Any
    /// error from here on releases the post to Failed before it propagates.
    async fn publish_claimed(
        &self,
        post_id: Uuid,
        claimed_from: PostStatus,
    ) -> Result<PublishOutcome> {
        let result = self.reload_and_deliver(post_id, claimed_from).await;
        if let Err(e) = &result {
            self.release(post_id, e).await;
        }
        result
    }

    async fn reload_and_deliver(
        &self,
        post_id: Uuid,
        claimed_from: PostStatus,
    ) -> Result<PublishOutcome> {
        let stored = self
            .repo
            .find_post(post_id)
            .await?
            .ok_or_else(|| BufferError::NotFound(format!("post {}", post_id)))?;
        let mut post = stored.with_stored_status(claimed_from);
        post.mark_as_publishing()?;
        self.deliver(post).await
    }

    /// Publish a claimed post and persist the outcome.
    async fn deliver(&self, mut post: Post) -> Result<PublishOutcome> {
        let now = Utc::now();
        let results = self.fan_out(&post, now).await?;

        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let policy = self.success_policy();
        let success = policy.is_met(succeeded, total);

        let mut retry_eligible = false;
        if success {
            post.mark_as_published()?;
        } else {
            let failure_kind = failure_kind(policy, &results);
            post.set_error(failure_summary(&results), failure_kind)?;
            post.increment_retry_count()?;
            if post.status() == PostStatus::Publishing {
                post.mark_as_failed()?;
            }

            retry_eligible = failure_kind == FailureKind::Transient && post.can_be_retried();
            let next_retry_at = if retry_eligible {
                self.retry_policy_for(&post)
                    .next_attempt_at(post.failed_at().unwrap_or(now), post.retry_count())
            } else {
                None
            };
            post.schedule_retry(next_retry_at);
        }

        let records: Vec<_> = results
            .iter()
            .filter_map(|result| result.to_record(&post, now))
            .collect();
        self.repo.record_publish_results(&records).await?;
        if !self
            .repo
            .update_post_if_status(&post, PostStatus::Publishing)
            .await?
        {
            return Err(BufferError::Conflict(format!(
                "post {} left Publishing while it was being published",
                post.id()
            )));
        }

        let outcome = PublishOutcome {
            post_id: post.id(),
            status: post.status(),
            success,
            results,
            retry_count: post.retry_count(),
            retry_eligible,
            next_retry_at: post.next_retry_at(),
        };
        self.announce(&post, &outcome);
        Ok(outcome)
    }

    /// Move a post stuck in Publishing after an error to Failed.
    async fn release(&self, post_id: Uuid, cause: &BufferError) {
        match self.fail_interrupted(post_id, cause).await {
            Ok(true) => warn!(
                post_id = %post_id,
                error = %cause,
                "Publish interrupted, post released"
            ),
            Ok(false) => tracing::debug!(post_id = %post_id, "Post already left Publishing"),
            Err(e) => error!(
                post_id = %post_id,
                error = %e,
                cause = %cause,
                "Could not release post from Publishing"
            ),
        }
    }

    async fn fail_interrupted(&self, post_id: Uuid, cause: &BufferError) -> Result<bool> {
        let mut post = match self.repo.find_post(post_id).await? {
            Some(post) if post.status() == PostStatus::Publishing => post,
            _ => return Ok(false),
        };
        post.set_error(format!("Publish interrupted: {}", cause), FailureKind::Transient)?;
        post.increment_retry_count()?;
        if post.status() == PostStatus::Publishing {
            post.mark_as_failed()?;
        }
        let next_retry_at = if post.can_be_retried() {
            self.retry_policy_for(&post)
                .next_attempt_at(post.failed_at().unwrap_or_else(Utc::now), post.retry_count())
        } else {
            None
        };
        post.schedule_retry(next_retry_at);
        self.repo
            .update_post_if_status(&post, PostStatus::Publishing)
            .await
    }

    /// One result per target account, in the post's account order.
    async fn fan_out(&self, post: &Post, now: DateTime<Utc>) -> Result<Vec<PublishResult>> {
        let earlier: BTreeMap<i64, PublishResult> = self
            .repo
            .list_publish_records(post.id())
            .await?
            .iter()
            .map(PublishResult::from_earlier_attempt)
            .filter(PublishResult::is_settled)
            .map(|result| (result.account_id, result))
            .collect();

        let mut resolved: BTreeMap<i64, PublishResult> = BTreeMap::new();
        let mut targets: Vec<SocialAccount> = Vec::new();
        let mut seen = HashSet::new();
        for &account_id in post.social_account_ids() {
            if !seen.insert(account_id) {
                continue;
            }
            if let Some(previous) = earlier.get(&account_id) {
                tracing::debug!(post_id = %post.id(), account_id, "Settled earlier, skipping");
                resolved.insert(account_id, previous.clone());
                continue;
            }
            match self.repo.find_account(account_id).await? {
                Some(account) if account.user_id == post.user_id() && account.is_usable(now) => {
                    targets.push(account);
                }
                Some(account) => {
                    let error = PlatformError::Authentication(format!(
                        "account {} is disconnected or its token expired",
                        account_id
                    ));
                    resolved.insert(
                        account_id,
                        PublishResult::failed(account_id, account.platform, &error.into()),
                    );
                }
                None => {
                    // Nothing to publish to and no platform to report against
                    warn!(
                        post_id = %post.id(),
                        account_id,
                        "Target account no longer exists, skipping"
                    );
                }
            }
        }

        for result in self.poster.publish_to_accounts(post, &targets).await {
            resolved.insert(result.account_id, result);
        }

        let mut seen = HashSet::new();
        Ok(post
            .social_account_ids()
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| resolved.remove(id))
            .collect())
    }

    fn retry_policy_for(&self, post: &Post) -> RetryPolicy {
        RetryPolicy {
            max_retries: post.max_retries(),
            ..self.config.retry_policy()
        }
    }

    fn announce(&self, post: &Post, outcome: &PublishOutcome) {
        if outcome.success {
            info!(
                post_id = %post.id(),
                succeeded = outcome.succeeded_count(),
                failed = outcome.failed_count(),
                "Post published"
            );
            self.event_bus.emit(DomainEvent::PostPublished {
                post_id: post.id(),
                user_id: post.user_id(),
                results: outcome.results.clone(),
            });
        } else {
            warn!(
                post_id = %post.id(),
                succeeded = outcome.succeeded_count(),
                failed = outcome.failed_count(),
                retry_count = outcome.retry_count,
                retry_eligible = outcome.retry_eligible,
                "Post failed to publish"
            );
            self.event_bus.emit(DomainEvent::PostPublishFailed {
                post_id: post.id(),
                user_id: post.user_id(),
                error: post.error_message().unwrap_or_default().to_string(),
                error_kind: post.error_kind().unwrap_or(FailureKind::Permanent),
                retry_count: outcome.retry_count,
                retry_eligible: outcome.retry_eligible,
                results: outcome.results.clone(),
            });
        }
    }
}

/// Transient when another attempt could still meet `policy`.
///
/// Under `AllMustSucceed` a single permanent failure rules that out.
fn failure_kind(policy: SuccessPolicy, results: &[PublishResult]) -> FailureKind {
    let blocked = policy == SuccessPolicy::AllMustSucceed
        && results.iter().any(PublishResult::is_permanent_failure);
    if !blocked && results.iter().any(PublishResult::is_transient_failure) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// `platform#account: error` for every failed account.
fn failure_summary(results: &[PublishResult]) -> String {
    let parts: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| {
            format!(
                "{}#{}: {}",
                r.platform,
                r.account_id,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    if parts.is_empty() {
        "No target account was published to".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::{MemoryRepository, MetricsSnapshot, PostFilter, PublishRecord};
    use crate::error::DbError;
    use crate::platforms::mock::MockPublisher;
    use crate::platforms::PublisherFactory;
    use crate::types::{NewPost, Platform};

    /// Memory store whose publish-record write can be made to fail.
    #[derive(Default)]
    struct FlakyRecords {
        inner: MemoryRepository,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Repository for FlakyRecords {
        async fn create_post(&self, post: &Post) -> Result<()> {
            self.inner.create_post(post).await
        }
        async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
            self.inner.find_post(id).await
        }
        async fn update_post(&self, post: &Post) -> Result<()> {
            self.inner.update_post(post).await
        }
        async fn update_post_if_status(&self, post: &Post, expected: PostStatus) -> Result<bool> {
            self.inner.update_post_if_status(post, expected).await
        }
        async fn delete_post(&self, id: Uuid, expected: PostStatus) -> Result<bool> {
            self.inner.delete_post(id, expected).await
        }
        async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
            self.inner.list_posts(filter).await
        }
        async fn find_due_posts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
            self.inner.find_due_posts(now, limit).await
        }
        async fn find_retry_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Post>> {
            self.inner.find_retry_candidates(now, limit).await
        }
        async fn transition_status(&self, id: Uuid, from: PostStatus, to: PostStatus) -> Result<bool> {
            self.inner.transition_status(id, from, to).await
        }
        async fn count_active_posts(&self, user_id: i64) -> Result<usize> {
            self.inner.count_active_posts(user_id).await
        }
        async fn count_scheduled_in_window(
            &self,
            account_id: i64,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            exclude: Option<Uuid>,
        ) -> Result<usize> {
            self.inner
                .count_scheduled_in_window(account_id, start, end, exclude)
                .await
        }
        async fn create_account(&self, account: &SocialAccount) -> Result<i64> {
            self.inner.create_account(account).await
        }
        async fn find_account(&self, id: i64) -> Result<Option<SocialAccount>> {
            self.inner.find_account(id).await
        }
        async fn find_account_by_external_id(
            &self,
            user_id: i64,
            platform: Platform,
            external_id: &str,
        ) -> Result<Option<SocialAccount>> {
            self.inner
                .find_account_by_external_id(user_id, platform, external_id)
                .await
        }
        async fn update_account(&self, account: &SocialAccount) -> Result<()> {
            self.inner.update_account(account).await
        }
        async fn delete_account(&self, id: i64) -> Result<bool> {
            self.inner.delete_account(id).await
        }
        async fn list_accounts(&self, user_id: i64) -> Result<Vec<SocialAccount>> {
            self.inner.list_accounts(user_id).await
        }
        async fn record_publish_results(&self, records: &[PublishRecord]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DbError::Corrupt("disk full".to_string()).into());
            }
            self.inner.record_publish_results(records).await
        }
        async fn list_publish_records(&self, post_id: Uuid) -> Result<Vec<PublishRecord>> {
            self.inner.list_publish_records(post_id).await
        }
        async fn record_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
            self.inner.record_metrics_snapshot(snapshot).await
        }
        async fn list_metrics_snapshots(&self, post_id: Uuid) -> Result<Vec<MetricsSnapshot>> {
            self.inner.list_metrics_snapshots(post_id).await
        }
    }

    fn service_over(repo: Arc<dyn Repository>, mock: &MockPublisher) -> PublishingService {
        let config = Arc::new(Config::default());
        let factory = PublisherFactory::builder()
            .register(Arc::new(mock.clone()))
            .build();
        PublishingService::new(
            repo,
            Arc::clone(&config),
            MultiAccountPoster::new(factory, &config),
            EventBus::new(8),
        )
    }

    async fn service_with(mock: &MockPublisher) -> (PublishingService, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let config = Arc::new(Config::default());
        let factory = PublisherFactory::builder()
            .register(Arc::new(mock.clone()))
            .build();
        let service = PublishingService::new(
            repo.clone(),
            Arc::clone(&config),
            MultiAccountPoster::new(factory, &config),
            EventBus::new(8),
        );
        (service, repo)
    }

    async fn account(repo: &MemoryRepository, connected: bool) -> i64 {
        repo.create_account(&SocialAccount {
            id: 0,
            user_id: 1,
            platform: Platform::Pinterest,
            external_id: format!("board-{}", connected),
            display_name: None,
            access_token: "token".to_string(),
            connected,
            token_expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap()
    }

    async fn draft(repo: &MemoryRepository, account_ids: Vec<i64>) -> Post {
        let post = Post::create(NewPost {
            user_id: 1,
            content: "pin".to_string(),
            social_account_ids: account_ids,
            ..Default::default()
        })
        .unwrap();
        repo.create_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn test_vanished_account_is_left_out_of_the_outcome() {
        let mock = MockPublisher::new(Platform::Pinterest);
        let (service, repo) = service_with(&mock).await;
        let live = account(&repo, true).await;
        let post = draft(&repo, vec![live, 99]).await;

        let outcome = service.publish_claimable(post).await.unwrap().unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].account_id, live);
    }

    #[tokio::test]
    async fn test_disconnected_account_is_a_permanent_failure() {
        let mock = MockPublisher::new(Platform::Pinterest);
        let (service, repo) = service_with(&mock).await;
        let offline = account(&repo, false).await;
        let post = draft(&repo, vec![offline]).await;

        let outcome = service.publish_claimable(post).await.unwrap().unwrap();

        assert_eq!(outcome.status, PostStatus::Failed);
        assert!(!outcome.retry_eligible);
        assert_eq!(outcome.results[0].error_kind, Some(FailureKind::Permanent));
        assert_eq!(mock.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_target_left_is_a_permanent_failure() {
        let mock = MockPublisher::new(Platform::Pinterest);
        let (service, repo) = service_with(&mock).await;
        let post = draft(&repo, vec![41, 42]).await;

        let outcome = service.publish_claimable(post.clone()).await.unwrap().unwrap();

        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
        let stored = repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(stored.error_message(), Some("No target account was published to"));
        assert_eq!(stored.error_kind(), Some(FailureKind::Permanent));
    }

    #[tokio::test]
    async fn test_storage_error_after_claim_releases_the_post() {
        let mock = MockPublisher::new(Platform::Pinterest);
        let repo = Arc::new(FlakyRecords::default());
        let service = service_over(repo.clone(), &mock);
        let live = account(&repo.inner, true).await;
        let post = draft(&repo.inner, vec![live]).await;

        repo.failing.store(true, Ordering::SeqCst);
        let result = service.publish_claimable(post.clone()).await;
        assert!(matches!(result, Err(BufferError::Database(_))));

        let stored = repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), PostStatus::Failed);
        assert_eq!(stored.error_kind(), Some(FailureKind::Transient));
        assert!(stored
            .error_message()
            .is_some_and(|m| m.starts_with("Publish interrupted")));
        assert_eq!(stored.retry_count(), 1);
        assert!(stored.can_be_retried());
        assert!(stored.next_retry_at().is_some());

        // Once storage recovers the post goes out on the next attempt
        repo.failing.store(false, Ordering::SeqCst);
        let outcome = service.publish_claimable(stored).await.unwrap().unwrap();
        assert!(outcome.success);
        let stored = repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), PostStatus::Published);
    }

    #[test]
    fn test_permanent_failure_blocks_retry_only_when_all_must_succeed() {
        let auth: BufferError = PlatformError::Authentication("revoked".to_string()).into();
        let busy: BufferError = PlatformError::RateLimit("slow down".to_string()).into();
        let results = vec![
            PublishResult::failed(1, Platform::Twitter, &auth),
            PublishResult::failed(2, Platform::LinkedIn, &busy),
        ];
        assert_eq!(
            failure_kind(SuccessPolicy::AllMustSucceed, &results),
            FailureKind::Permanent
        );
        assert_eq!(
            failure_kind(SuccessPolicy::BestEffort, &results),
            FailureKind::Transient
        );
        assert_eq!(
            failure_kind(SuccessPolicy::AllMustSucceed, &results[1..]),
            FailureKind::Transient
        );
    }

    #[test]
    fn test_failure_summary_names_each_failed_account() {
        let error: BufferError = PlatformError::Network("reset".to_string()).into();
        let results = vec![
            PublishResult::failed(1, Platform::Twitter, &error),
            PublishResult::failed(2, Platform::YouTube, &error),
        ];
        let summary = failure_summary(&results);
        assert!(summary.starts_with("twitter#1: "));
        assert!(summary.contains("; youtube#2: "));
    }
}
