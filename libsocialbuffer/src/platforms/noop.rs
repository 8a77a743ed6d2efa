//! Publisher that never leaves the process
//!
//! Used for platforms without live configuration. The post is checked
//! against the platform rules and logged; problems are reported as
//! warnings and the publish still succeeds with a synthetic id.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::platforms::{PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

#[derive(Debug, Clone, Copy)]
pub struct NoOpPublisher {
    platform: Platform,
}

impl NoOpPublisher {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Publisher for NoOpPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        if let Err(e) = self.validate(post) {
            tracing::warn!(
                platform = %self.platform,
                post_id = %post.id(),
                error = %e,
                "Post would be rejected by the live platform"
            );
        }

        let id = format!("noop:{}:{}", self.platform, Uuid::new_v4());
        tracing::info!(
            platform = %self.platform,
            post_id = %post.id(),
            account = %account.label(),
            platform_post_id = %id,
            "No-op publish"
        );
        Ok(PublishedPost::new(id))
    }
}
