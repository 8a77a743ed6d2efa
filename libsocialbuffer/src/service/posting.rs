//! Post lifecycle use cases
//!
//! Creation, editing, scheduling, cancellation, deletion, queries and
//! metrics ingestion. Publishing lives in [`super::publishing`].
//!
//! Every status-changing write is conditional on the status the use case
//! read, so a concurrent scheduler claim turns into `Conflict` instead of a
//! lost update.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::events::{DomainEvent, EventBus};
use super::load_owned;
use super::validation::PostValidator;
use crate::commands::{
    CancelPost, CreatePost, DeletePost, GetPost, ListPosts, SchedulePost, UnschedulePost,
    UpdatePost, Validate,
};
use crate::config::Config;
use crate::db::{ListOrder, MetricsSnapshot, Repository};
use crate::error::{BufferError, Result};
use crate::types::{Post, PostMetrics, PostStatus};

#[derive(Clone)]
pub struct PostingService {
    repo: Arc<dyn Repository>,
    config: Arc<Config>,
    validator: PostValidator,
    event_bus: EventBus,
}

impl PostingService {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<Config>, event_bus: EventBus) -> Self {
        let validator = PostValidator::new(Arc::clone(&repo), Arc::clone(&config));
        Self {
            repo,
            config,
            validator,
            event_bus,
        }
    }

    /// Create a post, Draft or Scheduled depending on `scheduled_at`
    ///
    /// # Errors
    ///
    /// - `BufferError::Validation` listing every violated field
    /// - `BufferError::InvalidType` / `InvalidPriority` for unknown values
    pub async fn create(&self, command: CreatePost) -> Result<Post> {
        let now = Utc::now();
        self.validator.validate_create(&command, now).await?;

        let params = command.to_new_post(self.config.scheduling.max_retries)?;
        let post = Post::of_type(command.post_type()?, params, now)?;
        self.repo.create_post(&post).await?;

        info!(
            post_id = %post.id(),
            user_id = post.user_id(),
            post_type = %post.post_type(),
            status = %post.status(),
            "Post created"
        );
        self.event_bus.emit(DomainEvent::PostCreated {
            post_id: post.id(),
            user_id: post.user_id(),
            post_type: post.post_type(),
            status: post.status(),
        });
        if let Some(scheduled_at) = post.scheduled_at() {
            self.event_bus.emit(DomainEvent::PostScheduled {
                post_id: post.id(),
                user_id: post.user_id(),
                scheduled_at,
            });
        }
        Ok(post)
    }

    /// Edit a Draft or Scheduled post.
    pub async fn update(&self, command: UpdatePost) -> Result<Post> {
        command.validate()?;
        let mut post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        if !post.can_be_edited() {
            return Err(BufferError::InvalidStateTransition {
                from: post.status(),
                to: post.status(),
            });
        }

        let now = Utc::now();
        self.validator.validate_update(&command, &post, now).await?;

        let expected = post.status();
        let rescheduled = command.scheduled_at.is_some();
        post.edit(command.to_changes()?, now)?;
        self.write_if_status(&post, expected).await?;

        info!(post_id = %post.id(), "Post updated");
        if let (true, Some(scheduled_at)) = (rescheduled, post.scheduled_at()) {
            self.event_bus.emit(DomainEvent::PostScheduled {
                post_id: post.id(),
                user_id: post.user_id(),
                scheduled_at,
            });
        }
        Ok(post)
    }

    /// Delete a post with its account links, publish records and metrics history.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::InvalidStateTransition` while the post is being published.
    pub async fn delete(&self, command: DeletePost) -> Result<()> {
        command.validate()?;
        let post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        if post.status() == PostStatus::Publishing {
            return Err(BufferError::InvalidStateTransition {
                from: PostStatus::Publishing,
                to: PostStatus::Cancelled,
            });
        }

        if !self.repo.delete_post(post.id(), post.status()).await? {
            return Err(status_changed(post.id()));
        }

        info!(post_id = %post.id(), user_id = post.user_id(), "Post deleted");
        self.event_bus.emit(DomainEvent::PostDeleted {
            post_id: post.id(),
            user_id: post.user_id(),
        });
        Ok(())
    }

    /// Draft -> Scheduled.
    pub async fn schedule(&self, command: SchedulePost) -> Result<Post> {
        command.validate()?;
        let mut post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        post.status().ensure_transition(PostStatus::Scheduled)?;

        let now = Utc::now();
        self.validator.validate_schedule(&command, &post, now).await?;

        let expected = post.status();
        post.mark_as_scheduled(command.scheduled_at, now)?;
        self.write_if_status(&post, expected).await?;

        info!(post_id = %post.id(), scheduled_at = %command.scheduled_at, "Post scheduled");
        self.event_bus.emit(DomainEvent::PostScheduled {
            post_id: post.id(),
            user_id: post.user_id(),
            scheduled_at: command.scheduled_at,
        });
        Ok(post)
    }

    /// Scheduled -> Draft.
    pub async fn unschedule(&self, command: UnschedulePost) -> Result<Post> {
        command.validate()?;
        let mut post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        let expected = post.status();
        post.mark_as_draft()?;
        self.write_if_status(&post, expected).await?;

        info!(post_id = %post.id(), "Post unscheduled");
        Ok(post)
    }

    /// Draft/Scheduled -> Cancelled.
    pub async fn cancel(&self, command: CancelPost) -> Result<Post> {
        command.validate()?;
        let mut post = load_owned(self.repo.as_ref(), command.post_id, command.user_id).await?;
        let expected = post.status();
        post.mark_as_cancelled()?;
        self.write_if_status(&post, expected).await?;

        info!(post_id = %post.id(), "Post cancelled");
        Ok(post)
    }

    pub async fn get(&self, query: GetPost) -> Result<Post> {
        query.validate()?;
        load_owned(self.repo.as_ref(), query.post_id, query.user_id).await
    }

    pub async fn list(&self, query: ListPosts) -> Result<Vec<Post>> {
        query.validate()?;
        self.repo.list_posts(&query.to_filter()?).await
    }

    /// Scheduled posts going out within `within` from now, in publish-queue order.
    pub async fn upcoming(&self, user_id: i64, within: Duration) -> Result<Vec<Post>> {
        let now = Utc::now();
        self.list(ListPosts {
            user_id,
            status: Some(PostStatus::Scheduled.as_str().to_string()),
            scheduled_after: Some(now),
            scheduled_before: Some(now + within),
            order: ListOrder::Queue,
            ..Default::default()
        })
        .await
    }

    /// Replace a post's metrics with a fresh snapshot from the platform.
    ///
    /// Stores the snapshot in the metrics history and emits
    /// `PostEngagementThreshold` when total engagement crosses the
    /// configured threshold.
    pub async fn update_metrics(&self, post_id: Uuid, metrics: PostMetrics) -> Result<Post> {
        let mut post = self
            .repo
            .find_post(post_id)
            .await?
            .ok_or_else(|| BufferError::NotFound(format!("post {}", post_id)))?;

        let before = post.metrics().total_engagement();
        let expected = post.status();
        post.update_metrics(metrics);
        self.write_if_status(&post, expected).await?;

        self.repo
            .record_metrics_snapshot(&MetricsSnapshot {
                post_id,
                metrics,
                recorded_at: Utc::now(),
            })
            .await?;

        let threshold = self.config.metrics.engagement_threshold;
        let after = metrics.total_engagement();
        tracing::debug!(post_id = %post_id, engagement = after, "Metrics updated");
        if before < threshold && after >= threshold {
            info!(post_id = %post_id, engagement = after, threshold, "Engagement threshold reached");
            self.event_bus.emit(DomainEvent::PostEngagementThreshold {
                post_id,
                user_id: post.user_id(),
                engagement: after,
                threshold,
            });
        }
        Ok(post)
    }

    async fn write_if_status(&self, post: &Post, expected: PostStatus) -> Result<()> {
        if self.repo.update_post_if_status(post, expected).await? {
            Ok(())
        } else {
            Err(status_changed(post.id()))
        }
    }
}

fn status_changed(post_id: Uuid) -> BufferError {
    BufferError::Conflict(format!("post {} changed status concurrently", post_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::types::{Platform, PostType, SocialAccount};

    async fn service() -> (PostingService, EventBus) {
        let repo = Arc::new(MemoryRepository::new());
        repo.create_account(&SocialAccount {
            id: 10,
            user_id: 1,
            platform: Platform::Facebook,
            external_id: "page".to_string(),
            display_name: None,
            access_token: "token".to_string(),
            connected: true,
            token_expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let event_bus = EventBus::new(16);
        let service = PostingService::new(repo, Arc::new(Config::default()), event_bus.clone());
        (service, event_bus)
    }

    fn command(content: &str) -> CreatePost {
        CreatePost {
            user_id: 1,
            social_account_ids: vec![10],
            content: content.to_string(),
            post_type: "text".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_scheduled_emits_both_events() {
        let (service, event_bus) = service().await;
        let mut events = event_bus.subscribe();
        let mut create = command("Soon");
        create.scheduled_at = Some(Utc::now() + Duration::hours(2));

        let post = service.create(create).await.unwrap();
        assert_eq!(post.status(), PostStatus::Scheduled);
        assert_eq!(post.post_type(), PostType::Text);

        assert_eq!(events.recv().await.unwrap().name(), "post_created");
        assert_eq!(events.recv().await.unwrap().name(), "post_scheduled");
    }

    #[tokio::test]
    async fn test_content_over_limit_reports_content() {
        let (service, _) = service().await;
        let result = service.create(command(&"x".repeat(5001))).await;
        match result {
            Err(BufferError::Validation(errors)) => assert!(errors.has_field("content")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schedule_unschedule_cancel_flow() {
        let (service, _) = service().await;
        let post = service.create(command("Draft first")).await.unwrap();
        assert_eq!(post.status(), PostStatus::Draft);

        let at = Utc::now() + Duration::hours(1);
        let scheduled = service
            .schedule(SchedulePost {
                post_id: post.id(),
                user_id: 1,
                scheduled_at: at,
            })
            .await
            .unwrap();
        assert_eq!(scheduled.scheduled_at(), Some(at));

        let draft = service
            .unschedule(UnschedulePost::new(post.id(), 1))
            .await
            .unwrap();
        assert_eq!(draft.status(), PostStatus::Draft);
        assert_eq!(draft.scheduled_at(), None);

        let cancelled = service.cancel(CancelPost::new(post.id(), 1)).await.unwrap();
        assert_eq!(cancelled.status(), PostStatus::Cancelled);

        // Cancelled is terminal
        let result = service.cancel(CancelPost::new(post.id(), 1)).await;
        assert!(matches!(result, Err(BufferError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_other_users_cannot_see_or_touch_posts() {
        let (service, _) = service().await;
        let post = service.create(command("mine")).await.unwrap();

        assert!(matches!(
            service.get(GetPost::new(post.id(), 2)).await,
            Err(BufferError::NotFound(_))
        ));
        assert!(matches!(
            service.delete(DeletePost::new(post.id(), 2)).await,
            Err(BufferError::NotFound(_))
        ));
        assert!(service.get(GetPost::new(post.id(), 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_revalidates() {
        let (service, _) = service().await;
        let post = service.create(command("before")).await.unwrap();

        let updated = service
            .update(UpdatePost {
                post_id: post.id(),
                user_id: 1,
                content: Some("after".to_string()),
                priority: Some("urgent".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.content(), "after");

        let result = service
            .update(UpdatePost {
                post_id: post.id(),
                user_id: 1,
                media_urls: Some(vec!["https://cdn.example.com/a.jpg".to_string()]),
                ..Default::default()
            })
            .await;
        match result {
            Err(BufferError::Validation(errors)) => assert!(errors.has_field("media_urls")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_can_clear_title() {
        let (service, _) = service().await;
        let mut create = command("Titled");
        create.title = Some("Weekly digest".to_string());
        let post = service.create(create).await.unwrap();
        assert_eq!(post.title(), Some("Weekly digest"));

        let cleared = service
            .update(UpdatePost {
                post_id: post.id(),
                user_id: 1,
                title: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cleared.title(), None);
        let stored = service.get(GetPost::new(post.id(), 1)).await.unwrap();
        assert_eq!(stored.title(), None);
    }

    #[tokio::test]
    async fn test_upcoming_and_search() {
        let (service, _) = service().await;
        let mut soon = command("Flash sale tonight");
        soon.scheduled_at = Some(Utc::now() + Duration::hours(2));
        let soon = service.create(soon).await.unwrap();
        let mut later = command("Quarterly report");
        later.scheduled_at = Some(Utc::now() + Duration::days(4));
        service.create(later).await.unwrap();
        service.create(command("Unscheduled sale idea")).await.unwrap();

        let upcoming = service.upcoming(1, Duration::hours(24)).await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id(), soon.id());

        let found = service
            .list(ListPosts {
                user_id: 1,
                search: Some("SALE".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let on_facebook = service
            .list(ListPosts {
                user_id: 1,
                platform: Some("facebook".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(on_facebook.len(), 3);
        let on_tiktok = service
            .list(ListPosts {
                user_id: 1,
                platform: Some("tiktok".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(on_tiktok.is_empty());
    }

    #[tokio::test]
    async fn test_delete_emits_event() {
        let (service, event_bus) = service().await;
        let post = service.create(command("short lived")).await.unwrap();
        let mut events = event_bus.subscribe();

        service.delete(DeletePost::new(post.id(), 1)).await.unwrap();
        assert_eq!(events.recv().await.unwrap().name(), "post_deleted");
        assert!(matches!(
            service.get(GetPost::new(post.id(), 1)).await,
            Err(BufferError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_engagement_threshold_fires_once() {
        let (service, event_bus) = service().await;
        let post = service.create(command("popular")).await.unwrap();
        let mut events = event_bus.subscribe();

        let mut metrics = PostMetrics::empty();
        metrics.likes = 900;
        service.update_metrics(post.id(), metrics).await.unwrap();

        metrics.likes = 1200;
        service.update_metrics(post.id(), metrics).await.unwrap();

        metrics.likes = 1500;
        service.update_metrics(post.id(), metrics).await.unwrap();

        match events.recv().await.unwrap() {
            DomainEvent::PostEngagementThreshold { engagement, .. } => assert_eq!(engagement, 1200),
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }
}
