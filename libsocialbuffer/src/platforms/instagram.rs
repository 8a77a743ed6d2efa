//! Instagram publisher
//!
//! Publishing is two steps: create a media container, then publish it.
//! Carousels first create one child container per item.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{is_video_url, PublishedPost, Publisher};
use crate::types::{Platform, Post, PostType, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct InstagramPublisher {
    api: ApiClient,
}

impl InstagramPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::Instagram,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }

    async fn create_container(&self, ig_user: &str, token: &str, body: &Value) -> Result<String> {
        let response = self
            .api
            .post_json(&format!("{}/media", ig_user), token, body)
            .await?;
        require_id(Platform::Instagram, &response, &["/id"])
    }

    fn container_body(post: &Post, url: &str) -> Value {
        let video = is_video_url(url) || post.post_type().is_video();
        let mut body = if video {
            json!({ "video_url": url })
        } else {
            json!({ "image_url": url })
        };

        match post.post_type() {
            PostType::Story => body["media_type"] = json!("STORIES"),
            PostType::Reel => body["media_type"] = json!("REELS"),
            _ if video => body["media_type"] = json!("VIDEO"),
            _ => {}
        }

        if post.post_type() != PostType::Story {
            body["caption"] = json!(caption(post));
        }
        body
    }
}

/// Caption text with hashtags appended when they are not already inline.
fn caption(post: &Post) -> String {
    let mut caption = post.content().to_string();
    let missing: Vec<String> = post
        .hashtags()
        .iter()
        .map(|tag| format!("#{}", tag.trim_start_matches('#')))
        .filter(|tag| !caption.contains(tag.as_str()))
        .collect();
    if !missing.is_empty() {
        caption.push_str("\n\n");
        caption.push_str(&missing.join(" "));
    }
    caption
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let ig_user = account.external_id.as_str();
        let token = account.access_token.as_str();

        let creation_id = if post.post_type() == PostType::Carousel || post.media_urls().len() > 1 {
            let mut children = Vec::with_capacity(post.media_urls().len());
            for url in post.media_urls() {
                let key = if is_video_url(url) { "video_url" } else { "image_url" };
                let mut body = json!({ "is_carousel_item": true });
                body[key] = json!(url);
                if is_video_url(url) {
                    body["media_type"] = json!("VIDEO");
                }
                children.push(self.create_container(ig_user, token, &body).await?);
            }
            let body = json!({
                "media_type": "CAROUSEL",
                "children": children,
                "caption": caption(post),
            });
            self.create_container(ig_user, token, &body).await?
        } else {
            // validate() guarantees at least one media item
            let url = post.media_urls().first().map(String::as_str).unwrap_or_default();
            let body = Self::container_body(post, url);
            self.create_container(ig_user, token, &body).await?
        };

        let response = self
            .api
            .post_json(
                &format!("{}/media_publish", ig_user),
                token,
                &json!({ "creation_id": creation_id }),
            )
            .await?;
        let id = require_id(Platform::Instagram, &response, &["/id"])?;

        tracing::info!(ig_user = %ig_user, media_id = %id, "Published to Instagram");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
