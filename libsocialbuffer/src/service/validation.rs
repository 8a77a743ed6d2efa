//! Command validation against stored state
//!
//! Structural checks live on the commands themselves ([`Validate`]). The
//! validators here add the rules that need the repository: the referenced
//! accounts exist, belong to the caller and are usable; quotas and
//! scheduling density; per-platform limits of the target accounts.
//! The post-type field rules (media, hashtag and mention capabilities) run
//! in the same pass against the post the command would produce.
//!
//! Validators never write. Every violation is collected and returned in a
//! single `BufferError::Validation`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::commands::{
    CreatePost, CreateSocialAccount, PublishPost, SchedulePost, UpdatePost, UpdateSocialAccount,
    Validate,
};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{Result, ValidationErrors};
use crate::platforms::PlatformRules;
use crate::types::post::field_violations;
use crate::types::{Post, SocialAccount};

/// Half-width of the window used for the per-account scheduling limit.
const DENSITY_WINDOW_HOURS: i64 = 12;

/// Validates post commands before any state changes
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use libsocialbuffer::commands::CreatePost;
/// use libsocialbuffer::config::Config;
/// use libsocialbuffer::db::MemoryRepository;
/// use libsocialbuffer::service::validation::PostValidator;
///
/// # async fn example() -> libsocialbuffer::Result<()> {
/// let validator = PostValidator::new(Arc::new(MemoryRepository::new()), Arc::new(Config::default()));
/// let command = CreatePost {
///     user_id: 1,
///     social_account_ids: vec![10],
///     content: "Launch day".to_string(),
///     post_type: "text".to_string(),
///     ..Default::default()
/// };
///
/// if let Err(e) = validator.validate_create(&command, chrono::Utc::now()).await {
///     eprintln!("{}", e);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostValidator {
    repo: Arc<dyn Repository>,
    config: Arc<Config>,
}

impl PostValidator {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<Config>) -> Self {
        Self { repo, config }
    }

    /// Check a create command. Structural problems stop before any lookup.
    pub async fn validate_create(&self, command: &CreatePost, now: DateTime<Utc>) -> Result<()> {
        command.validate()?;

        let mut errors = ValidationErrors::new();
        let accounts = self
            .check_accounts(&mut errors, command.user_id, &command.social_account_ids, now)
            .await?;
        self.check_content_limits(
            &mut errors,
            &command.content,
            &command.hashtags,
            &command.mentions,
            &accounts,
        );

        if let Some(at) = command.scheduled_at {
            self.check_schedule(
                &mut errors,
                command.user_id,
                &command.social_account_ids,
                at,
                now,
                None,
            )
            .await?;
        }

        let params = command.to_new_post(self.config.scheduling.max_retries)?;
        errors.extend(field_violations(&params));
        errors.into_result()
    }

    /// Check an update against the stored post it will be applied to.
    pub async fn validate_update(
        &self,
        command: &UpdatePost,
        post: &Post,
        now: DateTime<Utc>,
    ) -> Result<()> {
        command.validate()?;

        let candidate = post.candidate(command.to_changes()?);
        let mut errors = ValidationErrors::new();
        let account_ids = &candidate.social_account_ids;
        let accounts = self
            .check_accounts(&mut errors, post.user_id(), account_ids, now)
            .await?;
        self.check_content_limits(
            &mut errors,
            &candidate.content,
            &candidate.hashtags,
            &candidate.mentions,
            &accounts,
        );

        if let Some(at) = command.scheduled_at {
            // Rescheduling does not add an active post
            self.check_density(&mut errors, account_ids, at, Some(post.id()))
                .await?;
            if at <= now {
                errors.add("scheduled_at", "Scheduled time must be in the future");
            }
        }
        errors.extend(field_violations(&candidate));
        errors.into_result()
    }

    pub async fn validate_schedule(
        &self,
        command: &SchedulePost,
        post: &Post,
        now: DateTime<Utc>,
    ) -> Result<()> {
        command.validate()?;

        let mut errors = ValidationErrors::new();
        self.check_accounts(&mut errors, post.user_id(), post.social_account_ids(), now)
            .await?;
        self.check_schedule(
            &mut errors,
            post.user_id(),
            post.social_account_ids(),
            command.scheduled_at,
            now,
            Some(post.id()),
        )
        .await?;
        errors.into_result()
    }

    pub async fn validate_publish(
        &self,
        command: &PublishPost,
        post: &Post,
        now: DateTime<Utc>,
    ) -> Result<()> {
        command.validate()?;

        let mut errors = ValidationErrors::new();
        if post.social_account_ids().is_empty() {
            errors.add("social_account_ids", "Post has no target accounts");
        }
        let accounts = self
            .check_accounts(&mut errors, post.user_id(), post.social_account_ids(), now)
            .await?;
        self.check_content_limits(
            &mut errors,
            post.content(),
            post.hashtags(),
            post.mentions(),
            &accounts,
        );
        errors.into_result()
    }

    /// Resolve `ids`, recording every missing, foreign or unusable account.
    async fn check_accounts(
        &self,
        errors: &mut ValidationErrors,
        user_id: i64,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<SocialAccount>> {
        let mut accounts = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.repo.find_account(id).await? {
                Some(account) if account.user_id != user_id => errors.add(
                    "social_account_ids",
                    format!("Social account {} does not belong to user {}", id, user_id),
                ),
                Some(account) if !account.is_usable(now) => errors.add(
                    "social_account_ids",
                    format!("Social account {} is disconnected or its token expired", id),
                ),
                Some(account) => accounts.push(account),
                None => errors.add(
                    "social_account_ids",
                    format!("Social account {} not found", id),
                ),
            }
        }
        Ok(accounts)
    }

    fn check_content_limits(
        &self,
        errors: &mut ValidationErrors,
        content: &str,
        hashtags: &[String],
        mentions: &[String],
        accounts: &[SocialAccount],
    ) {
        let limits = &self.config.limits;
        if hashtags.len() > limits.max_hashtags {
            errors.add(
                "hashtags",
                format!("At most {} hashtags are allowed", limits.max_hashtags),
            );
        }
        if mentions.len() > limits.max_mentions {
            errors.add(
                "mentions",
                format!("At most {} mentions are allowed", limits.max_mentions),
            );
        }

        let length = content.chars().count();
        let mut reported = Vec::new();
        for account in accounts {
            let max = PlatformRules::for_platform(account.platform).max_content_length;
            if length > max && !reported.contains(&account.platform) {
                reported.push(account.platform);
                errors.add(
                    "content",
                    format!(
                        "Content has {} characters; {} allows at most {}",
                        length, account.platform, max
                    ),
                );
            }
        }
    }

    /// Future time, active-post quota and per-account density.
    async fn check_schedule(
        &self,
        errors: &mut ValidationErrors,
        user_id: i64,
        account_ids: &[i64],
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        if at <= now {
            errors.add("scheduled_at", "Scheduled time must be in the future");
        }

        let active = self.repo.count_active_posts(user_id).await?;
        let max_active = self.config.limits.max_active_posts_per_user;
        if active >= max_active {
            errors.add(
                "user_id",
                format!("User already has {} active posts (limit {})", active, max_active),
            );
        }

        self.check_density(errors, account_ids, at, exclude).await
    }

    async fn check_density(
        &self,
        errors: &mut ValidationErrors,
        account_ids: &[i64],
        at: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        let max = self.config.limits.max_scheduled_per_account_per_day;
        let window = Duration::hours(DENSITY_WINDOW_HOURS);
        for &account_id in account_ids {
            let count = self
                .repo
                .count_scheduled_in_window(account_id, at - window, at + window, exclude)
                .await?;
            if count >= max {
                errors.add(
                    "scheduled_at",
                    format!(
                        "Social account {} already has {} posts scheduled around that time",
                        account_id, count
                    ),
                );
            }
        }
        Ok(())
    }
}

/// Validates social account commands
#[derive(Clone)]
pub struct AccountValidator {
    repo: Arc<dyn Repository>,
}

impl AccountValidator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn validate_create(
        &self,
        command: &CreateSocialAccount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        command.validate()?;

        let mut errors = ValidationErrors::new();
        check_expiry(&mut errors, command.token_expires_at, now);

        let platform = command.platform()?;
        let existing = self
            .repo
            .find_account_by_external_id(command.user_id, platform, command.external_id.trim())
            .await?;
        if existing.is_some() {
            errors.add(
                "external_id",
                format!("{} account '{}' is already connected", platform, command.external_id),
            );
        }
        errors.into_result()
    }

    pub async fn validate_update(
        &self,
        command: &UpdateSocialAccount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        command.validate()?;

        let mut errors = ValidationErrors::new();
        check_expiry(&mut errors, command.token_expires_at, now);
        errors.into_result()
    }
}

fn check_expiry(errors: &mut ValidationErrors, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if expires_at.is_some_and(|at| at <= now) {
        errors.add("token_expires_at", "Token expiry must be in the future");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::error::BufferError;
    use crate::types::{NewPost, Platform};

    async fn setup() -> (Arc<MemoryRepository>, PostValidator) {
        let repo = Arc::new(MemoryRepository::new());
        for (id, user_id, platform, connected) in [
            (1, 1, Platform::Twitter, true),
            (2, 1, Platform::Facebook, true),
            (3, 2, Platform::Facebook, true),
            (4, 1, Platform::LinkedIn, false),
        ] {
            repo.create_account(&SocialAccount {
                id,
                user_id,
                platform,
                external_id: format!("ext-{}", id),
                display_name: None,
                access_token: "token".to_string(),
                connected,
                token_expires_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let validator = PostValidator::new(repo.clone(), Arc::new(Config::default()));
        (repo, validator)
    }

    fn create(ids: Vec<i64>, content: &str) -> CreatePost {
        CreatePost {
            user_id: 1,
            social_account_ids: ids,
            content: content.to_string(),
            post_type: "text".to_string(),
            ..Default::default()
        }
    }

    fn fields(result: Result<()>) -> Vec<String> {
        match result {
            Err(BufferError::Validation(errors)) => {
                errors.fields().into_iter().map(String::from).collect()
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accounts_must_exist_belong_and_be_usable() {
        let (_, validator) = setup().await;
        let now = Utc::now();

        assert!(validator.validate_create(&create(vec![1, 2], "hi"), now).await.is_ok());

        let result = validator
            .validate_create(&create(vec![3, 4, 99], "hi"), now)
            .await;
        match result {
            Err(BufferError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_platform_character_limit_of_targets() {
        let (_, validator) = setup().await;
        let long = "a".repeat(300);

        // Fine for Facebook, too long for Twitter
        assert!(validator
            .validate_create(&create(vec![2], &long), Utc::now())
            .await
            .is_ok());
        let result = validator.validate_create(&create(vec![1, 2], &long), Utc::now()).await;
        assert_eq!(fields(result), vec!["content"]);
    }

    #[tokio::test]
    async fn test_account_and_post_type_violations_come_together() {
        let (_, validator) = setup().await;
        let mut command = create(vec![1, 999], "text with a picture");
        command.media_urls = vec!["https://cdn.example.com/a.jpg".to_string()];

        let result = validator.validate_create(&command, Utc::now()).await;
        assert_eq!(fields(result), vec!["social_account_ids", "media_urls"]);
    }

    #[tokio::test]
    async fn test_update_checks_post_type_rules_with_accounts() {
        let (repo, validator) = setup().await;
        let post = Post::text(1, "plain", vec![1]).unwrap();
        repo.create_post(&post).await.unwrap();

        let command = UpdatePost {
            post_id: post.id(),
            user_id: 1,
            social_account_ids: Some(vec![3]),
            media_urls: Some(vec!["https://cdn.example.com/a.jpg".to_string()]),
            ..Default::default()
        };
        let result = validator.validate_update(&command, &post, Utc::now()).await;
        assert_eq!(fields(result), vec!["social_account_ids", "media_urls"]);
    }

    #[tokio::test]
    async fn test_past_schedule_is_rejected() {
        let (_, validator) = setup().await;
        let mut command = create(vec![1], "later");
        command.scheduled_at = Some(Utc::now() - Duration::minutes(5));

        let result = validator.validate_create(&command, Utc::now()).await;
        assert_eq!(fields(result), vec!["scheduled_at"]);
    }

    #[tokio::test]
    async fn test_scheduling_density_limit() {
        let (repo, _) = setup().await;
        let mut config = Config::default();
        config.limits.max_scheduled_per_account_per_day = 1;
        let validator = PostValidator::new(repo.clone(), Arc::new(config));

        let slot = Utc::now() + Duration::hours(6);
        let existing = Post::create(NewPost {
            user_id: 1,
            content: "first".to_string(),
            social_account_ids: vec![1],
            scheduled_at: Some(slot),
            ..Default::default()
        })
        .unwrap();
        repo.create_post(&existing).await.unwrap();

        let mut command = create(vec![1], "second");
        command.scheduled_at = Some(slot + Duration::hours(2));
        let result = validator.validate_create(&command, Utc::now()).await;
        assert_eq!(fields(result), vec!["scheduled_at"]);

        // A day later is outside the window
        command.scheduled_at = Some(slot + Duration::hours(24));
        assert!(validator.validate_create(&command, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_active_post_quota() {
        let (repo, _) = setup().await;
        let mut config = Config::default();
        config.limits.max_active_posts_per_user = 1;
        let validator = PostValidator::new(repo.clone(), Arc::new(config));

        let active = Post::create(NewPost {
            user_id: 1,
            content: "queued".to_string(),
            social_account_ids: vec![2],
            scheduled_at: Some(Utc::now() + Duration::days(3)),
            ..Default::default()
        })
        .unwrap();
        repo.create_post(&active).await.unwrap();

        let mut command = create(vec![1], "another");
        command.scheduled_at = Some(Utc::now() + Duration::hours(1));
        let result = validator.validate_create(&command, Utc::now()).await;
        assert_eq!(fields(result), vec!["user_id"]);

        // Drafts do not count against the quota
        assert!(validator
            .validate_create(&create(vec![1], "draft"), Utc::now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_account_is_rejected() {
        let (repo, _) = setup().await;
        let validator = AccountValidator::new(repo);
        let command = CreateSocialAccount {
            user_id: 1,
            platform: "twitter".to_string(),
            external_id: "ext-1".to_string(),
            access_token: "token".to_string(),
            ..Default::default()
        };

        let result = validator.validate_create(&command, Utc::now()).await;
        assert_eq!(fields(result), vec!["external_id"]);

        let fresh = CreateSocialAccount {
            external_id: "someone-else".to_string(),
            token_expires_at: Some(Utc::now() - Duration::days(1)),
            ..command
        };
        let result = validator.validate_create(&fresh, Utc::now()).await;
        assert_eq!(fields(result), vec!["token_expires_at"]);
    }
}
