//! Commands and queries accepted by the service layer
//!
//! Each request type implements [`Validate`], which performs the structural
//! checks that need no collaborator: ids are positive, strings are non-blank,
//! enumerated values parse. Rules that need the repository (ownership,
//! quotas, account state) live in `service::validation`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{AccountFilter, ListOrder, PostFilter};
use crate::error::{Result, ValidationErrors};
use crate::types::{
    Link, Location, NewPost, Platform, PostChanges, PostPriority, PostStatus, PostType,
};

/// Structural validation shared by every command and query.
pub trait Validate {
    const REQUIRED_FIELDS: &'static [&'static str];
    const OPTIONAL_FIELDS: &'static [&'static str];

    /// All structural violations, empty when the request is well formed.
    fn validation_errors(&self) -> ValidationErrors;

    fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    fn validate(&self) -> Result<()> {
        self.validation_errors().into_result()
    }
}

fn require_positive(errors: &mut ValidationErrors, field: &str, value: i64) {
    if value <= 0 {
        errors.add(field, format!("{} must be positive", field));
    }
}

fn require_non_blank(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, format!("{} is required", field));
    }
}

fn reject_blank(errors: &mut ValidationErrors, field: &str, value: Option<&str>) {
    if value.is_some_and(|v| v.trim().is_empty()) {
        errors.add(field, format!("{} cannot be blank", field));
    }
}

fn check_account_ids(errors: &mut ValidationErrors, ids: &[i64], required: bool) {
    if required && ids.is_empty() {
        errors.add("social_account_ids", "At least one social account is required");
    }
    if ids.iter().any(|id| *id <= 0) {
        errors.add("social_account_ids", "Social account IDs must be positive");
    }
}

fn check_parse<T: std::str::FromStr>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
) {
    if let Some(value) = value {
        if value.parse::<T>().is_err() {
            errors.add(field, format!("Unknown {} '{}'", field, value));
        }
    }
}

/// Create a post, optionally already scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePost {
    pub user_id: i64,
    pub social_account_ids: Vec<i64>,
    pub content: String,
    pub post_type: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub link_title: Option<String>,
    #[serde(default)]
    pub link_description: Option<String>,
    #[serde(default)]
    pub link_image: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CreatePost {
    pub fn post_type(&self) -> Result<PostType> {
        self.post_type.parse()
    }

    pub fn priority(&self) -> Result<PostPriority> {
        match &self.priority {
            Some(p) => p.parse(),
            None => Ok(PostPriority::default()),
        }
    }

    /// Aggregate construction parameters. `max_retries` comes from policy.
    pub fn to_new_post(&self, max_retries: u32) -> Result<NewPost> {
        let link = self.link_url.as_ref().map(|url| Link {
            url: url.clone(),
            title: self.link_title.clone(),
            description: self.link_description.clone(),
            image: self.link_image.clone(),
        });

        Ok(NewPost {
            user_id: self.user_id,
            social_account_ids: self.social_account_ids.clone(),
            content: self.content.clone(),
            post_type: self.post_type()?,
            priority: self.priority()?,
            title: self.title.clone(),
            description: self.description.clone(),
            link,
            media_urls: self.media_urls.clone(),
            hashtags: self.hashtags.clone(),
            mentions: self.mentions.clone(),
            location: self.location.clone(),
            custom_fields: self.custom_fields.clone(),
            metadata: BTreeMap::new(),
            scheduled_at: self.scheduled_at,
            max_retries,
        })
    }
}

impl Validate for CreatePost {
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["user_id", "social_account_ids", "content", "post_type"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &[
        "priority",
        "title",
        "description",
        "link_url",
        "link_title",
        "link_description",
        "link_image",
        "media_urls",
        "hashtags",
        "mentions",
        "location",
        "custom_fields",
        "scheduled_at",
    ];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_positive(&mut errors, "user_id", self.user_id);
        check_account_ids(&mut errors, &self.social_account_ids, true);
        require_non_blank(&mut errors, "content", &self.content);
        require_non_blank(&mut errors, "post_type", &self.post_type);
        if !self.post_type.trim().is_empty() {
            check_parse::<PostType>(&mut errors, "post_type", Some(self.post_type.as_str()));
        }
        check_parse::<PostPriority>(&mut errors, "priority", self.priority.as_deref());
        reject_blank(&mut errors, "title", self.title.as_deref());
        reject_blank(&mut errors, "description", self.description.as_deref());
        reject_blank(&mut errors, "link_url", self.link_url.as_deref());
        let has_link_details = self.link_title.is_some()
            || self.link_description.is_some()
            || self.link_image.is_some();
        if self.link_url.is_none() && has_link_details {
            errors.add("link_url", "Link details given without a link URL");
        }
        errors
    }
}

/// A present field, `null` included, becomes `Some`.
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Edit a Draft or Scheduled post
///
/// `None` leaves a field unchanged. `title`, `description`, `link` and
/// `location` take `Some(None)` (an explicit `null` on the wire) to clear
/// the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePost {
    pub post_id: Uuid,
    pub user_id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub link: Option<Option<Link>>,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub hashtags: Option<Vec<String>>,
    #[serde(default)]
    pub mentions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<Location>>,
    #[serde(default)]
    pub social_account_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub custom_fields: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl UpdatePost {
    pub fn to_changes(&self) -> Result<PostChanges> {
        let priority = match &self.priority {
            Some(p) => Some(p.parse::<PostPriority>()?),
            None => None,
        };
        Ok(PostChanges {
            content: self.content.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            link: self.link.clone(),
            media_urls: self.media_urls.clone(),
            hashtags: self.hashtags.clone(),
            mentions: self.mentions.clone(),
            location: self.location.clone(),
            priority,
            social_account_ids: self.social_account_ids.clone(),
            custom_fields: self.custom_fields.clone(),
            scheduled_at: self.scheduled_at,
        })
    }
}

impl Validate for UpdatePost {
    const REQUIRED_FIELDS: &'static [&'static str] = &["post_id", "user_id"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &[
        "content",
        "priority",
        "title",
        "description",
        "link",
        "media_urls",
        "hashtags",
        "mentions",
        "location",
        "social_account_ids",
        "custom_fields",
        "scheduled_at",
    ];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.post_id.is_nil() {
            errors.add("post_id", "post_id is required");
        }
        require_positive(&mut errors, "user_id", self.user_id);
        reject_blank(&mut errors, "content", self.content.as_deref());
        reject_blank(&mut errors, "title", self.title.as_ref().and_then(Option::as_deref));
        reject_blank(
            &mut errors,
            "description",
            self.description.as_ref().and_then(Option::as_deref),
        );
        check_parse::<PostPriority>(&mut errors, "priority", self.priority.as_deref());
        if let Some(ids) = &self.social_account_ids {
            check_account_ids(&mut errors, ids, true);
        }
        errors
    }
}

macro_rules! post_reference {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            pub post_id: Uuid,
            pub user_id: i64,
        }

        impl $name {
            pub fn new(post_id: Uuid, user_id: i64) -> Self {
                Self { post_id, user_id }
            }
        }

        impl Validate for $name {
            const REQUIRED_FIELDS: &'static [&'static str] = &["post_id", "user_id"];
            const OPTIONAL_FIELDS: &'static [&'static str] = &[];

            fn validation_errors(&self) -> ValidationErrors {
                let mut errors = ValidationErrors::new();
                if self.post_id.is_nil() {
                    errors.add("post_id", "post_id is required");
                }
                require_positive(&mut errors, "user_id", self.user_id);
                errors
            }
        }
    };
}

post_reference!(
    /// Delete a post and everything it owns.
    DeletePost
);
post_reference!(
    /// Publish a post now.
    PublishPost
);
post_reference!(CancelPost);
post_reference!(
    /// Move a Scheduled post back to Draft.
    UnschedulePost
);
post_reference!(GetPost);

/// Schedule a Draft post for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePost {
    pub post_id: Uuid,
    pub user_id: i64,
    pub scheduled_at: DateTime<Utc>,
}

impl Validate for SchedulePost {
    const REQUIRED_FIELDS: &'static [&'static str] = &["post_id", "user_id", "scheduled_at"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &[];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.post_id.is_nil() {
            errors.add("post_id", "post_id is required");
        }
        require_positive(&mut errors, "user_id", self.user_id);
        errors
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSocialAccount {
    pub user_id: i64,
    pub platform: String,
    pub external_id: String,
    pub access_token: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl CreateSocialAccount {
    pub fn platform(&self) -> Result<Platform> {
        self.platform.parse()
    }
}

impl Validate for CreateSocialAccount {
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["user_id", "platform", "external_id", "access_token"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &["display_name", "token_expires_at"];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_positive(&mut errors, "user_id", self.user_id);
        require_non_blank(&mut errors, "platform", &self.platform);
        if !self.platform.trim().is_empty() {
            check_parse::<Platform>(&mut errors, "platform", Some(self.platform.as_str()));
        }
        require_non_blank(&mut errors, "external_id", &self.external_id);
        require_non_blank(&mut errors, "access_token", &self.access_token);
        reject_blank(&mut errors, "display_name", self.display_name.as_deref());
        errors
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSocialAccount {
    pub account_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connected: Option<bool>,
}

impl Validate for UpdateSocialAccount {
    const REQUIRED_FIELDS: &'static [&'static str] = &["account_id", "user_id"];
    const OPTIONAL_FIELDS: &'static [&'static str] =
        &["display_name", "access_token", "token_expires_at", "connected"];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_positive(&mut errors, "account_id", self.account_id);
        require_positive(&mut errors, "user_id", self.user_id);
        reject_blank(&mut errors, "display_name", self.display_name.as_deref());
        reject_blank(&mut errors, "access_token", self.access_token.as_deref());
        errors
    }
}

/// List a user's posts with optional filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPosts {
    pub user_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Term searched in content, title and description.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub scheduled_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: ListOrder,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListPosts {
    pub fn to_filter(&self) -> Result<PostFilter> {
        Ok(PostFilter {
            user_id: Some(self.user_id),
            status: self.status.as_deref().map(str::parse::<PostStatus>).transpose()?,
            post_type: self.post_type.as_deref().map(str::parse::<PostType>).transpose()?,
            priority: self
                .priority
                .as_deref()
                .map(str::parse::<PostPriority>)
                .transpose()?,
            search: self.search.as_deref().map(|term| term.trim().to_string()),
            platform: self.platform.as_deref().map(str::parse::<Platform>).transpose()?,
            scheduled_after: self.scheduled_after,
            scheduled_before: self.scheduled_before,
            order: self.order,
            limit: self.limit,
        })
    }
}

impl Validate for ListPosts {
    const REQUIRED_FIELDS: &'static [&'static str] = &["user_id"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &[
        "status",
        "post_type",
        "priority",
        "search",
        "platform",
        "scheduled_after",
        "scheduled_before",
        "order",
        "limit",
    ];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_positive(&mut errors, "user_id", self.user_id);
        check_parse::<PostStatus>(&mut errors, "status", self.status.as_deref());
        check_parse::<PostType>(&mut errors, "post_type", self.post_type.as_deref());
        check_parse::<PostPriority>(&mut errors, "priority", self.priority.as_deref());
        check_parse::<Platform>(&mut errors, "platform", self.platform.as_deref());
        reject_blank(&mut errors, "search", self.search.as_deref());
        if let (Some(start), Some(end)) = (self.scheduled_after, self.scheduled_before) {
            if start > end {
                errors.add("scheduled_before", "scheduled_before must not precede scheduled_after");
            }
        }
        if self.limit == Some(0) {
            errors.add("limit", "limit must be at least 1");
        }
        errors
    }
}

/// List a user's social accounts, optionally narrowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSocialAccounts {
    pub user_id: i64,
    #[serde(default)]
    pub platform: Option<String>,
    /// Only accounts flagged connected.
    #[serde(default)]
    pub connected_only: bool,
    /// Only accounts that can be published to now.
    #[serde(default)]
    pub usable_only: bool,
}

impl ListSocialAccounts {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn to_filter(&self) -> Result<AccountFilter> {
        Ok(AccountFilter {
            platform: self.platform.as_deref().map(str::parse::<Platform>).transpose()?,
            connected_only: self.connected_only,
            usable_only: self.usable_only,
        })
    }
}

impl Validate for ListSocialAccounts {
    const REQUIRED_FIELDS: &'static [&'static str] = &["user_id"];
    const OPTIONAL_FIELDS: &'static [&'static str] = &["platform", "connected_only", "usable_only"];

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_positive(&mut errors, "user_id", self.user_id);
        check_parse::<Platform>(&mut errors, "platform", self.platform.as_deref());
        errors
    }
}
