//! Scheduler sweep
//!
//! One sweep publishes every Scheduled post whose time has come and every
//! Failed post whose retry backoff has elapsed. Posts are claimed with a
//! conditional status transition, so any number of sweeps (in one process
//! or several) can run against the same store without publishing a post
//! twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::service::publishing::{PublishOutcome, PublishingService};
use crate::types::Post;

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Scheduled posts found due.
    pub due: usize,
    /// Failed posts found ready for another attempt.
    pub retries: usize,
    pub published: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    /// Claimed by another worker, or no longer publishable.
    pub skipped: Vec<Uuid>,
    /// Posts whose publish returned an error, with the message.
    pub errors: Vec<(Uuid, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.due == 0 && self.retries == 0
    }

    pub fn processed(&self) -> usize {
        self.published.len() + self.failed.len()
    }

    fn record(&mut self, post_id: Uuid, result: Result<Option<PublishOutcome>>) {
        match result {
            Ok(Some(outcome)) if outcome.success => self.published.push(post_id),
            Ok(Some(_)) => self.failed.push(post_id),
            Ok(None) => self.skipped.push(post_id),
            Err(e) => {
                error!(post_id = %post_id, error = %e, "Sweep could not publish post");
                self.errors.push((post_id, e.to_string()));
            }
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    publishing: PublishingService,
    batch_size: usize,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>, config: &Config, publishing: PublishingService) -> Self {
        Self {
            repo,
            publishing,
            batch_size: config.scheduling.batch_size,
            poll_interval: config.scheduling.poll_interval(),
        }
    }

    /// How long the daemon waits between sweeps.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Publish everything due at `now`
    ///
    /// Due posts go first, in publish-queue order, then retries. At most
    /// `scheduling.batch_size` posts of each kind are taken per sweep.
    /// A post that fails to publish is reported, not propagated, so one
    /// bad post never stalls the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the due or retry lookup itself fails.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.repo.find_due_posts(now, self.batch_size).await?;
        let retries = self.repo.find_retry_candidates(now, self.batch_size).await?;

        let mut report = SweepReport {
            due: due.len(),
            retries: retries.len(),
            ..Default::default()
        };
        if report.is_empty() {
            debug!("Nothing due");
            return Ok(report);
        }
        info!(due = report.due, retries = report.retries, "Sweeping posts");

        for post in due.into_iter().chain(retries) {
            let post_id = post.id();
            report.record(post_id, self.publish(post).await);
        }

        info!(
            published = report.published.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Sweep finished"
        );
        Ok(report)
    }

    async fn publish(&self, post: Post) -> Result<Option<PublishOutcome>> {
        debug!(post_id = %post.id(), status = %post.status(), "Publishing from sweep");
        self.publishing.publish_claimable(post).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::error::PlatformError;
    use crate::platforms::mock::MockPublisher;
    use crate::platforms::PublisherFactory;
    use crate::poster::MultiAccountPoster;
    use crate::service::events::EventBus;
    use crate::types::{NewPost, Platform, PostStatus, SocialAccount};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        repo: Arc<MemoryRepository>,
        scheduler: Scheduler,
        mock: MockPublisher,
    }

    async fn fixture(mock: MockPublisher) -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let config = Arc::new(Config::default());
        let factory = PublisherFactory::builder()
            .register(Arc::new(mock.clone()))
            .build();
        let publishing = PublishingService::new(
            repo.clone(),
            Arc::clone(&config),
            MultiAccountPoster::new(factory, &config),
            EventBus::new(16),
        );
        let scheduler = Scheduler::new(repo.clone(), &config, publishing);

        repo.create_account(&SocialAccount {
            id: 0,
            user_id: 1,
            platform: Platform::Twitter,
            external_id: "tw-1".to_string(),
            display_name: None,
            access_token: "token".to_string(),
            connected: true,
            token_expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        Fixture {
            repo,
            scheduler,
            mock,
        }
    }

    /// Created an hour ago, scheduled for `minutes` after creation.
    async fn scheduled_post(repo: &MemoryRepository, minutes: i64) -> Post {
        let created = Utc::now() - ChronoDuration::hours(1);
        let post = Post::create_at(
            NewPost {
                user_id: 1,
                content: "sweep me".to_string(),
                social_account_ids: vec![1],
                scheduled_at: Some(created + ChronoDuration::minutes(minutes)),
                ..Default::default()
            },
            created,
        )
        .unwrap();
        repo.create_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn test_sweep_publishes_due_posts_only() {
        let f = fixture(MockPublisher::new(Platform::Twitter)).await;
        let due = scheduled_post(&f.repo, 10).await;
        let later = scheduled_post(&f.repo, 24 * 60).await;

        let report = f.scheduler.sweep(Utc::now()).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.published, vec![due.id()]);
        assert_eq!(f.mock.publish_call_count(), 1);

        let stored = f.repo.find_post(due.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), PostStatus::Published);
        let untouched = f.repo.find_post(later.id()).await.unwrap().unwrap();
        assert_eq!(untouched.status(), PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_empty_sweep() {
        let f = fixture(MockPublisher::new(Platform::Twitter)).await;
        let report = f.scheduler.sweep(Utc::now()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.processed(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_after_backoff() {
        let mock = MockPublisher::new(Platform::Twitter).fail_account_times(
            1,
            PlatformError::Network("connection reset".to_string()),
            1,
        );
        let f = fixture(mock).await;
        let post = scheduled_post(&f.repo, 10).await;

        let first = f.scheduler.sweep(Utc::now()).await.unwrap();
        assert_eq!(first.failed, vec![post.id()]);

        let failed = f.repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(failed.status(), PostStatus::Failed);
        let retry_at = failed.next_retry_at().expect("retry should be scheduled");

        // Not yet: the backoff has not elapsed
        let early = f.scheduler.sweep(retry_at - ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(early.retries, 0);

        let second = f.scheduler.sweep(retry_at).await.unwrap();
        assert_eq!(second.retries, 1);
        assert_eq!(second.published, vec![post.id()]);
        assert_eq!(f.mock.publish_call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mock = MockPublisher::new(Platform::Twitter)
            .fail_account(1, PlatformError::Authentication("revoked".to_string()));
        let f = fixture(mock).await;
        let post = scheduled_post(&f.repo, 10).await;

        let first = f.scheduler.sweep(Utc::now()).await.unwrap();
        assert_eq!(first.failed, vec![post.id()]);

        let later = Utc::now() + ChronoDuration::days(1);
        let second = f.scheduler.sweep(later).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(f.mock.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_publish_once() {
        let mock = MockPublisher::new(Platform::Twitter)
            .with_delay(std::time::Duration::from_millis(50));
        let f = fixture(mock).await;
        let post = scheduled_post(&f.repo, 10).await;

        let now = Utc::now();
        let (a, b) = tokio::join!(f.scheduler.sweep(now), f.scheduler.sweep(now));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.published.len() + b.published.len(), 1);
        assert!(a.errors.is_empty() && b.errors.is_empty());
        assert_eq!(f.mock.calls_for(1), 1);
        let stored = f.repo.find_post(post.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), PostStatus::Published);
    }
}
