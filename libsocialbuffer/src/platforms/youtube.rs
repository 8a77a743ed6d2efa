//! YouTube publisher
//!
//! Videos are inserted by reference to a hosted file; the channel is taken
//! from the token, so the account's external id is only logged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{PublishedPost, Publisher};
use crate::types::{Platform, Post, PostType, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

/// YouTube caps titles at 100 characters.
const MAX_TITLE_LENGTH: usize = 100;

pub struct YouTubePublisher {
    api: ApiClient,
}

impl YouTubePublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::YouTube,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }
}

fn video_title(post: &Post) -> String {
    let source = post
        .title()
        .or_else(|| post.content().lines().next())
        .unwrap_or_default();
    source.chars().take(MAX_TITLE_LENGTH).collect()
}

#[async_trait]
impl Publisher for YouTubePublisher {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let video_url = post.media_urls().first().cloned().unwrap_or_default();
        let mut tags: Vec<&str> = post
            .hashtags()
            .iter()
            .map(|tag| tag.trim_start_matches('#'))
            .collect();
        if post.post_type() == PostType::Reel || post.post_type() == PostType::Story {
            tags.push("Shorts");
        }

        let body = json!({
            "snippet": {
                "title": video_title(post),
                "description": post.description().unwrap_or(post.content()),
                "tags": tags,
            },
            "status": { "privacyStatus": "public" },
            "sourceUrl": video_url,
        });

        let response = self
            .api
            .post_json(
                "youtube/v3/videos?part=snippet,status",
                &account.access_token,
                &body,
            )
            .await?;
        let id = require_id(Platform::YouTube, &response, &["/id"])?;

        tracing::info!(channel = %account.external_id, video_id = %id, "Published to YouTube");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
