//! The Post aggregate
//!
//! A `Post` is only ever mutated through the intent-revealing operations
//! below, each of which checks the lifecycle matrix in [`PostStatus`] and the
//! retry budget. Construction validates every field and reports all
//! violations at once.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{BufferError, FailureKind, Result, ValidationErrors};
use crate::types::post_type::MIN_CAROUSEL_MEDIA;
use crate::types::{PostMetrics, PostPriority, PostStatus, PostType};

/// Retry budget used when the caller does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Everything needed to construct a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: i64,
    pub social_account_ids: Vec<i64>,
    pub content: String,
    pub post_type: PostType,
    pub priority: PostPriority,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<Link>,
    pub media_urls: Vec<String>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub location: Option<Location>,
    pub custom_fields: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
}

impl Default for NewPost {
    fn default() -> Self {
        Self {
            user_id: 0,
            social_account_ids: Vec::new(),
            content: String::new(),
            post_type: PostType::Text,
            priority: PostPriority::default(),
            title: None,
            description: None,
            link: None,
            media_urls: Vec::new(),
            hashtags: Vec::new(),
            mentions: Vec::new(),
            location: None,
            custom_fields: BTreeMap::new(),
            metadata: BTreeMap::new(),
            scheduled_at: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Partial update applied with [`Post::edit`]
///
/// `None` leaves a field alone. The optional attributes take
/// `Some(None)` to clear what is stored.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub content: Option<String>,
    pub title: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub link: Option<Option<Link>>,
    pub media_urls: Option<Vec<String>>,
    pub hashtags: Option<Vec<String>>,
    pub mentions: Option<Vec<String>>,
    pub location: Option<Option<Location>>,
    pub priority: Option<PostPriority>,
    pub social_account_ids: Option<Vec<i64>>,
    pub custom_fields: Option<BTreeMap<String, Value>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.link.is_none()
            && self.media_urls.is_none()
            && self.hashtags.is_none()
            && self.mentions.is_none()
            && self.location.is_none()
            && self.priority.is_none()
            && self.social_account_ids.is_none()
            && self.custom_fields.is_none()
            && self.scheduled_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    id: Uuid,
    user_id: i64,
    social_account_ids: Vec<i64>,
    content: String,
    title: Option<String>,
    description: Option<String>,
    link: Option<Link>,
    media_urls: Vec<String>,
    hashtags: Vec<String>,
    mentions: Vec<String>,
    location: Option<Location>,
    custom_fields: BTreeMap<String, Value>,
    post_type: PostType,
    status: PostStatus,
    priority: PostPriority,
    scheduled_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    error_kind: Option<FailureKind>,
    next_retry_at: Option<DateTime<Utc>>,
    metrics: PostMetrics,
    metadata: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Post {
    /// Validate and build a post, Draft or Scheduled depending on `scheduled_at`.
    pub fn create(params: NewPost) -> Result<Self> {
        Self::create_at(params, Utc::now())
    }

    /// Same as [`Post::create`] with an explicit clock.
    pub fn create_at(params: NewPost, now: DateTime<Utc>) -> Result<Self> {
        let mut errors = field_violations(&params);
        if let Some(at) = params.scheduled_at {
            if at <= now {
                errors.add("scheduled_at", "Scheduled time must be in the future");
            }
        }
        errors.into_result()?;

        let status = if params.scheduled_at.is_some() {
            PostStatus::Scheduled
        } else {
            PostStatus::Draft
        };

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            social_account_ids: params.social_account_ids,
            content: params.content,
            title: params.title,
            description: params.description,
            link: params.link,
            media_urls: params.media_urls,
            hashtags: params.hashtags,
            mentions: params.mentions,
            location: params.location,
            custom_fields: params.custom_fields,
            post_type: params.post_type,
            status,
            priority: params.priority,
            scheduled_at: params.scheduled_at,
            published_at: None,
            failed_at: None,
            retry_count: 0,
            max_retries: params.max_retries,
            error_message: None,
            error_kind: None,
            next_retry_at: None,
            metrics: PostMetrics::empty(),
            metadata: params.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build a post of `post_type`, overriding whatever type `params` carried.
    pub fn of_type(post_type: PostType, params: NewPost, now: DateTime<Utc>) -> Result<Self> {
        Self::create_at(NewPost { post_type, ..params }, now)
    }

    pub fn text(user_id: i64, content: impl Into<String>, social_account_ids: Vec<i64>) -> Result<Self> {
        Self::typed(PostType::Text, user_id, content.into(), Vec::new(), social_account_ids)
    }

    pub fn image(
        user_id: i64,
        content: impl Into<String>,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::typed(PostType::Image, user_id, content.into(), media_urls, social_account_ids)
    }

    pub fn video(
        user_id: i64,
        content: impl Into<String>,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::typed(PostType::Video, user_id, content.into(), media_urls, social_account_ids)
    }

    pub fn story(
        user_id: i64,
        content: impl Into<String>,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::typed(PostType::Story, user_id, content.into(), media_urls, social_account_ids)
    }

    pub fn reel(
        user_id: i64,
        content: impl Into<String>,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::typed(PostType::Reel, user_id, content.into(), media_urls, social_account_ids)
    }

    pub fn carousel(
        user_id: i64,
        content: impl Into<String>,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::typed(PostType::Carousel, user_id, content.into(), media_urls, social_account_ids)
    }

    pub fn link(
        user_id: i64,
        content: impl Into<String>,
        link: Link,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::create(NewPost {
            user_id,
            content: content.into(),
            post_type: PostType::Link,
            link: Some(link),
            social_account_ids,
            ..Default::default()
        })
    }

    fn typed(
        post_type: PostType,
        user_id: i64,
        content: String,
        media_urls: Vec<String>,
        social_account_ids: Vec<i64>,
    ) -> Result<Self> {
        Self::create(NewPost {
            user_id,
            content,
            post_type,
            media_urls,
            social_account_ids,
            ..Default::default()
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn social_account_ids(&self) -> &[i64] {
        &self.social_account_ids
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn attached_link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub fn media_urls(&self) -> &[String] {
        &self.media_urls
    }

    pub fn hashtags(&self) -> &[String] {
        &self.hashtags
    }

    pub fn mentions(&self) -> &[String] {
        &self.mentions
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn post_type(&self) -> PostType {
        self.post_type
    }

    pub fn status(&self) -> PostStatus {
        self.status
    }

    pub fn priority(&self) -> PostPriority {
        self.priority
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    /// Earliest time the retry sweep may pick this post up again.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn metrics(&self) -> &PostMetrics {
        &self.metrics
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn custom_fields(&self) -> &BTreeMap<String, Value> {
        &self.custom_fields
    }

    pub fn custom_field(&self, key: &str) -> Option<&Value> {
        self.custom_fields.get(key)
    }

    pub fn set_custom_field(&mut self, key: impl Into<String>, value: Value) {
        self.custom_fields.insert(key.into(), value);
        self.touch();
    }

    pub fn remove_custom_field(&mut self, key: &str) -> Option<Value> {
        let removed = self.custom_fields.remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    pub fn can_be_edited(&self) -> bool {
        self.status.can_be_edited()
    }

    pub fn can_be_published(&self) -> bool {
        match self.status {
            PostStatus::Draft | PostStatus::Scheduled => true,
            PostStatus::Failed => self.has_retries_left(),
            _ => false,
        }
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.status.can_be_cancelled()
    }

    pub fn can_be_retried(&self) -> bool {
        self.status == PostStatus::Failed && self.has_retries_left()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_completed(&self) -> bool {
        match self.status {
            PostStatus::Published | PostStatus::Cancelled => true,
            PostStatus::Failed => !self.has_retries_left(),
            _ => false,
        }
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Scheduled with a `scheduled_at` at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }

    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Draft -> Scheduled. `at` must lie strictly after `now`.
    pub fn mark_as_scheduled(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        self.status.ensure_transition(PostStatus::Scheduled)?;
        if at <= now {
            return Err(BufferError::invalid_field(
                "scheduled_at",
                "Scheduled time must be in the future",
            ));
        }
        self.status = PostStatus::Scheduled;
        self.scheduled_at = Some(at);
        self.clear_error();
        Ok(())
    }

    /// Draft/Scheduled -> Publishing, or Failed -> Publishing while retries remain.
    pub fn mark_as_publishing(&mut self) -> Result<()> {
        self.status.ensure_transition(PostStatus::Publishing)?;
        if self.status == PostStatus::Failed && !self.has_retries_left() {
            return Err(BufferError::InvalidStateTransition {
                from: self.status,
                to: PostStatus::Publishing,
            });
        }
        self.status = PostStatus::Publishing;
        self.next_retry_at = None;
        self.touch();
        Ok(())
    }

    /// Publishing -> Published. Calling it twice is an error, not a no-op.
    pub fn mark_as_published(&mut self) -> Result<()> {
        self.status.ensure_transition(PostStatus::Published)?;
        self.status = PostStatus::Published;
        self.published_at = Some(Utc::now());
        self.clear_error();
        Ok(())
    }

    /// Publishing -> Failed. Terminal once the retry budget is spent.
    pub fn mark_as_failed(&mut self) -> Result<()> {
        self.status.ensure_transition(PostStatus::Failed)?;
        self.status = PostStatus::Failed;
        if self.failed_at.is_none() {
            self.failed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    pub fn mark_as_cancelled(&mut self) -> Result<()> {
        self.status.ensure_transition(PostStatus::Cancelled)?;
        self.status = PostStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Scheduled -> Draft (unschedule).
    pub fn mark_as_draft(&mut self) -> Result<()> {
        self.status.ensure_transition(PostStatus::Draft)?;
        self.status = PostStatus::Draft;
        self.scheduled_at = None;
        self.clear_error();
        Ok(())
    }

    /// Record why the last attempt failed. Status is left untouched.
    pub fn set_error(&mut self, message: impl Into<String>, kind: FailureKind) -> Result<()> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(BufferError::invalid_field(
                "error_message",
                "Error message cannot be empty",
            ));
        }
        self.error_message = Some(message);
        self.error_kind = Some(kind);
        self.failed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
        self.error_kind = None;
        self.failed_at = None;
        self.touch();
    }

    /// Count one failed attempt.
    ///
    /// Only legal while Publishing or Failed. The count saturates at
    /// `max_retries`; reaching the bound while Publishing forces the post
    /// into terminal Failed.
    pub fn increment_retry_count(&mut self) -> Result<()> {
        if !matches!(self.status, PostStatus::Publishing | PostStatus::Failed) {
            return Err(BufferError::InvalidStateTransition {
                from: self.status,
                to: PostStatus::Failed,
            });
        }
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
        if !self.has_retries_left() && self.status == PostStatus::Publishing {
            self.mark_as_failed()?;
        }
        self.touch();
        Ok(())
    }

    /// Grant a fresh retry budget. Not allowed mid-publish.
    pub fn reset_retry_count(&mut self) -> Result<()> {
        if self.status == PostStatus::Publishing {
            return Err(BufferError::InvalidStateTransition {
                from: self.status,
                to: self.status,
            });
        }
        self.retry_count = 0;
        self.touch();
        Ok(())
    }

    pub fn update_metrics(&mut self, metrics: PostMetrics) {
        self.metrics = metrics;
        self.touch();
    }

    /// Apply `changes` while the post is still editable.
    ///
    /// The whole candidate is re-validated; nothing is applied unless every
    /// field passes.
    pub fn edit(&mut self, changes: PostChanges, now: DateTime<Utc>) -> Result<()> {
        if !self.can_be_edited() {
            return Err(BufferError::InvalidStateTransition {
                from: self.status,
                to: self.status,
            });
        }

        let requested_at = changes.scheduled_at;
        let candidate = self.candidate(changes);

        let mut errors = field_violations(&candidate);
        let mut scheduled_at = self.scheduled_at;
        if let Some(at) = requested_at {
            if self.status != PostStatus::Scheduled {
                errors.add(
                    "scheduled_at",
                    "Only scheduled posts can be rescheduled; schedule the draft instead",
                );
            } else if at <= now {
                errors.add("scheduled_at", "Scheduled time must be in the future");
            } else {
                scheduled_at = Some(at);
            }
        }
        errors.into_result()?;

        self.social_account_ids = candidate.social_account_ids;
        self.content = candidate.content;
        self.priority = candidate.priority;
        self.title = candidate.title;
        self.description = candidate.description;
        self.link = candidate.link;
        self.media_urls = candidate.media_urls;
        self.hashtags = candidate.hashtags;
        self.mentions = candidate.mentions;
        self.location = candidate.location;
        self.custom_fields = candidate.custom_fields;
        self.scheduled_at = scheduled_at;
        self.touch();
        Ok(())
    }

    /// The construction parameters this post would have after `changes`.
    pub(crate) fn candidate(&self, changes: PostChanges) -> NewPost {
        NewPost {
            user_id: self.user_id,
            social_account_ids: changes
                .social_account_ids
                .unwrap_or_else(|| self.social_account_ids.clone()),
            content: changes.content.unwrap_or_else(|| self.content.clone()),
            post_type: self.post_type,
            priority: changes.priority.unwrap_or(self.priority),
            title: changes.title.unwrap_or_else(|| self.title.clone()),
            description: changes
                .description
                .unwrap_or_else(|| self.description.clone()),
            link: changes.link.unwrap_or_else(|| self.link.clone()),
            media_urls: changes.media_urls.unwrap_or_else(|| self.media_urls.clone()),
            hashtags: changes.hashtags.unwrap_or_else(|| self.hashtags.clone()),
            mentions: changes.mentions.unwrap_or_else(|| self.mentions.clone()),
            location: changes.location.unwrap_or_else(|| self.location.clone()),
            custom_fields: changes
                .custom_fields
                .unwrap_or_else(|| self.custom_fields.clone()),
            metadata: self.metadata.clone(),
            scheduled_at: self.scheduled_at,
            max_retries: self.max_retries,
        }
    }

    /// Set when a failed attempt leaves retries; cleared on the next claim.
    pub fn schedule_retry(&mut self, at: Option<DateTime<Utc>>) {
        self.next_retry_at = if self.can_be_retried() { at } else { None };
        self.touch();
    }

    /// Status as stored by a repository that tracks it separately.
    pub(crate) fn with_stored_status(mut self, status: PostStatus) -> Self {
        self.status = status;
        self
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Every field rule that does not depend on the clock.
pub(crate) fn field_violations(params: &NewPost) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let caps = params.post_type.capabilities();

    if params.user_id <= 0 {
        errors.add("user_id", "User ID must be positive");
    }

    let mut seen = HashSet::new();
    for id in &params.social_account_ids {
        if *id <= 0 {
            errors.add("social_account_ids", format!("Invalid social account ID {}", id));
        } else if !seen.insert(*id) {
            errors.add("social_account_ids", format!("Duplicate social account ID {}", id));
        }
    }

    if params.content.trim().is_empty() {
        errors.add("content", "Post content cannot be empty");
    }
    let length = params.content.chars().count();
    if length > caps.max_content_length {
        errors.add(
            "content",
            format!(
                "Content has {} characters; {} posts allow at most {}",
                length, params.post_type, caps.max_content_length
            ),
        );
    }

    check_optional_text(&mut errors, "title", params.title.as_deref());
    check_optional_text(&mut errors, "description", params.description.as_deref());

    match &params.link {
        Some(link) => {
            if !is_http_url(&link.url) {
                errors.add("link_url", "Invalid link URL format");
            }
            check_optional_text(&mut errors, "link_title", link.title.as_deref());
            check_optional_text(&mut errors, "link_description", link.description.as_deref());
            if let Some(image) = &link.image {
                if !is_http_url(image) {
                    errors.add("link_image", "Invalid link image URL format");
                }
            }
        }
        None if params.post_type == PostType::Link => {
            errors.add("link_url", "Link posts require a link URL");
        }
        None => {}
    }

    let media_count = params.media_urls.len();
    if media_count > caps.max_media_count {
        errors.add(
            "media_urls",
            format!(
                "{} media items given; {} posts allow at most {}",
                media_count, params.post_type, caps.max_media_count
            ),
        );
    }
    if caps.requires_media && media_count == 0 {
        errors.add("media_urls", format!("{} posts require media", params.post_type));
    }
    if params.post_type == PostType::Carousel && media_count > 0 && media_count < MIN_CAROUSEL_MEDIA {
        errors.add(
            "media_urls",
            format!("Carousel posts need at least {} media items", MIN_CAROUSEL_MEDIA),
        );
    }
    for url in &params.media_urls {
        if !is_http_url(url) {
            errors.add("media_urls", format!("Invalid media URL format: {}", url));
        }
    }

    if !params.hashtags.is_empty() && !caps.supports_hashtags {
        errors.add("hashtags", format!("{} posts do not support hashtags", params.post_type));
    }
    for tag in &params.hashtags {
        if !is_single_token(tag) {
            errors.add("hashtags", format!("Invalid hashtag format: '{}'", tag));
        }
    }

    if !params.mentions.is_empty() && !caps.supports_mentions {
        errors.add("mentions", format!("{} posts do not support mentions", params.post_type));
    }
    for mention in &params.mentions {
        if !is_single_token(mention) {
            errors.add("mentions", format!("Invalid mention format: '{}'", mention));
        }
    }

    if let Some(location) = &params.location {
        if !caps.supports_location {
            errors.add("location", format!("{} posts do not support location", params.post_type));
        }
        if location.name.trim().is_empty() {
            errors.add("location", "Location must have a name");
        }
        if !(-90.0..=90.0).contains(&location.latitude) {
            errors.add("location", "Latitude must be between -90 and 90");
        }
        if !(-180.0..=180.0).contains(&location.longitude) {
            errors.add("location", "Longitude must be between -180 and 180");
        }
    }

    errors
}

fn check_optional_text(errors: &mut ValidationErrors, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        if value.trim().is_empty() {
            errors.add(field, format!("{} cannot be empty when provided", field));
        }
    }
}

fn is_single_token(value: &str) -> bool {
    !value.trim().is_empty() && !value.chars().any(char::is_whitespace)
}

/// Absolute http(s) URL with a host.
pub(crate) fn is_http_url(value: &str) -> bool {
    match reqwest::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
