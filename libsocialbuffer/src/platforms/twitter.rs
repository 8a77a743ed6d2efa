//! Twitter / X publisher (API v2)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{is_video_url, PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";

pub struct TwitterPublisher {
    api: ApiClient,
}

impl TwitterPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::Twitter,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }

    /// Register a remote media URL and return its media id.
    async fn upload_media(&self, token: &str, url: &str) -> Result<String> {
        let category = if is_video_url(url) { "tweet_video" } else { "tweet_image" };
        let body = json!({ "media_url": url, "media_category": category });
        let response = self.api.post_json("2/media/upload", token, &body).await?;
        require_id(
            Platform::Twitter,
            &response,
            &["/data/id", "/media_id_string", "/media_id"],
        )
    }
}

/// Tweet text: content plus the link when it is not already in the text.
fn tweet_text(post: &Post) -> String {
    match post.attached_link() {
        Some(link) if !post.content().contains(&link.url) => {
            format!("{} {}", post.content(), link.url)
        }
        _ => post.content().to_string(),
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let token = account.access_token.as_str();
        let mut media_ids = Vec::with_capacity(post.media_urls().len());
        for url in post.media_urls() {
            media_ids.push(self.upload_media(token, url).await?);
        }

        let mut body: Value = json!({ "text": tweet_text(post) });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }

        let response = self.api.post_json("2/tweets", token, &body).await?;
        let id = require_id(Platform::Twitter, &response, &["/data/id"])?;

        tracing::info!(account = %account.external_id, tweet_id = %id, "Published to Twitter");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
