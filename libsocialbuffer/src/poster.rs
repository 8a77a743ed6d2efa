//! Multi-account publish fan-out
//!
//! One post goes to every target account concurrently through a bounded
//! pool. Each call is isolated: a failure, a timeout or an unsupported
//! platform only affects that account's [`PublishResult`]. Results come
//! back in the order the accounts were given.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::PublishRecord;
use crate::error::{BufferError, FailureKind, PlatformError};
use crate::platforms::factory::PublisherFactory;
use crate::platforms::PublishedPost;
use crate::types::{Platform, Post, SocialAccount};

/// Outcome of publishing one post to one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub account_id: i64,
    pub platform: Platform,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub raw_response: Option<serde_json::Value>,
    /// Settled by an earlier attempt (delivered, or failed permanently);
    /// nothing was sent this time.
    pub carried_over: bool,
}

impl PublishResult {
    pub fn succeeded(account: &SocialAccount, published: PublishedPost) -> Self {
        Self {
            account_id: account.id,
            platform: account.platform,
            success: true,
            platform_post_id: Some(published.platform_post_id),
            error: None,
            error_kind: None,
            raw_response: published.raw_response,
            carried_over: false,
        }
    }

    pub fn failed(account_id: i64, platform: Platform, error: &BufferError) -> Self {
        let kind = if error.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        Self {
            account_id,
            platform,
            success: false,
            platform_post_id: None,
            error: Some(error.to_string()),
            error_kind: Some(kind),
            raw_response: None,
            carried_over: false,
        }
    }

    /// The settled outcome of a stored record, carried into a later attempt.
    pub fn from_earlier_attempt(record: &PublishRecord) -> Self {
        Self {
            account_id: record.account_id,
            platform: record.platform,
            success: record.success,
            platform_post_id: record.platform_post_id.clone(),
            error: record.error_message.clone(),
            error_kind: record.error_kind,
            raw_response: None,
            carried_over: true,
        }
    }

    /// A delivery, or a failure that will not go away on retry.
    pub fn is_settled(&self) -> bool {
        self.success || self.error_kind == Some(FailureKind::Permanent)
    }

    pub fn is_permanent_failure(&self) -> bool {
        !self.success && self.error_kind == Some(FailureKind::Permanent)
    }

    pub fn is_transient_failure(&self) -> bool {
        !self.success && self.error_kind == Some(FailureKind::Transient)
    }

    /// Row describing this attempt, or `None` when nothing was attempted.
    pub fn to_record(&self, post: &Post, attempted_at: DateTime<Utc>) -> Option<PublishRecord> {
        if self.carried_over {
            return None;
        }
        Some(PublishRecord {
            id: None,
            post_id: post.id(),
            account_id: self.account_id,
            platform: self.platform,
            success: self.success,
            platform_post_id: self.platform_post_id.clone(),
            error_message: self.error.clone(),
            error_kind: self.error_kind,
            attempted_at,
        })
    }
}

/// Fans a post out to its accounts through the registered publishers
#[derive(Clone)]
pub struct MultiAccountPoster {
    factory: PublisherFactory,
    timeout: Duration,
    max_concurrency: usize,
    platform_concurrency: BTreeMap<Platform, usize>,
}

impl MultiAccountPoster {
    /// Create a poster using the publishing and per-platform limits from `config`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libsocialbuffer::config::Config;
    /// use libsocialbuffer::platforms::factory::PublisherFactory;
    /// use libsocialbuffer::poster::MultiAccountPoster;
    ///
    /// # fn example() -> libsocialbuffer::Result<()> {
    /// let config = Config::load()?;
    /// let factory = PublisherFactory::from_config(&config)?;
    /// let poster = MultiAccountPoster::new(factory, &config);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(factory: PublisherFactory, config: &Config) -> Self {
        let platform_concurrency = Platform::ALL
            .iter()
            .map(|&platform| (platform, config.platform(platform).max_concurrency.max(1)))
            .collect();
        Self {
            factory,
            timeout: config.publishing.timeout(),
            max_concurrency: config.publishing.max_concurrency.max(1),
            platform_concurrency,
        }
    }

    pub fn factory(&self) -> &PublisherFactory {
        &self.factory
    }

    /// Pool size for a fan-out to `accounts`.
    ///
    /// The smallest of the account count, the tightest per-platform limit
    /// among the targets and the global limit. Never below one.
    pub fn pool_size(&self, accounts: &[SocialAccount]) -> usize {
        let platform_limit = accounts
            .iter()
            .filter_map(|a| self.platform_concurrency.get(&a.platform).copied())
            .min()
            .unwrap_or(self.max_concurrency);
        accounts
            .len()
            .min(platform_limit)
            .min(self.max_concurrency)
            .max(1)
    }

    /// Publish `post` to every account in `accounts`.
    ///
    /// Never fails as a whole: every account gets exactly one result.
    pub async fn publish_to_accounts(
        &self,
        post: &Post,
        accounts: &[SocialAccount],
    ) -> Vec<PublishResult> {
        if accounts.is_empty() {
            return Vec::new();
        }

        let pool = self.pool_size(accounts);
        tracing::debug!(
            post_id = %post.id(),
            accounts = accounts.len(),
            pool,
            "Publishing to accounts"
        );

        stream::iter(accounts)
            .map(|account| self.publish_one(post, account))
            .buffered(pool)
            .collect()
            .await
    }

    async fn publish_one(&self, post: &Post, account: &SocialAccount) -> PublishResult {
        let publisher = match self.factory.create(account.platform) {
            Ok(publisher) => publisher,
            Err(e) => {
                warn!(
                    account_id = account.id,
                    platform = %account.platform,
                    error = %e,
                    "No publisher registered"
                );
                return PublishResult::failed(account.id, account.platform, &e);
            }
        };

        let call = publisher.publish(post, account);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(format!(
                "{} did not answer within {}s",
                account.platform,
                self.timeout.as_secs()
            ))
            .into()),
        };

        match outcome {
            Ok(published) => {
                info!(
                    post_id = %post.id(),
                    account_id = account.id,
                    platform = %account.platform,
                    platform_post_id = %published.platform_post_id,
                    "Published"
                );
                PublishResult::succeeded(account, published)
            }
            Err(e) => {
                warn!(
                    post_id = %post.id(),
                    account_id = account.id,
                    platform = %account.platform,
                    transient = e.is_transient(),
                    error = %e,
                    "Publish failed"
                );
                PublishResult::failed(account.id, account.platform, &e)
            }
        }
    }
}
