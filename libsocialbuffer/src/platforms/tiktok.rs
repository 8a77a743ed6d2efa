//! TikTok publisher (Content Posting API, pull from URL)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://open.tiktokapis.com";

pub struct TikTokPublisher {
    api: ApiClient,
}

impl TikTokPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::TikTok,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }
}

#[async_trait]
impl Publisher for TikTokPublisher {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let video_url = post.media_urls().first().cloned().unwrap_or_default();
        let body = json!({
            "post_info": {
                "title": post.content(),
                "privacy_level": "PUBLIC_TO_EVERYONE",
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": video_url,
            },
        });

        let response = self
            .api
            .post_json("v2/post/publish/video/init/", &account.access_token, &body)
            .await?;
        // Publishing completes asynchronously; the publish id is what TikTok hands back
        let id = require_id(Platform::TikTok, &response, &["/data/publish_id"])?;

        tracing::info!(account = %account.external_id, publish_id = %id, "Submitted to TikTok");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
