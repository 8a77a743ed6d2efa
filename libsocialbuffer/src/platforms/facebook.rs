//! Facebook Pages publisher (Graph API)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{is_video_post, PublishedPost, Publisher};
use crate::types::{Platform, Post, PostType, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct FacebookPublisher {
    api: ApiClient,
}

impl FacebookPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::Facebook,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }

    async fn publish_feed(&self, post: &Post, page: &str, token: &str) -> Result<Value> {
        let mut body = json!({ "message": post.content() });
        if let Some(link) = post.attached_link() {
            body["link"] = json!(link.url);
        }
        self.api.post_json(&format!("{}/feed", page), token, &body).await
    }

    async fn publish_photo(&self, post: &Post, page: &str, token: &str, url: &str) -> Result<Value> {
        let body = json!({ "url": url, "caption": post.content() });
        self.api.post_json(&format!("{}/photos", page), token, &body).await
    }

    async fn publish_video(&self, post: &Post, page: &str, token: &str, url: &str) -> Result<Value> {
        let mut body = json!({ "file_url": url, "description": post.content() });
        if let Some(title) = post.title() {
            body["title"] = json!(title);
        }
        self.api.post_json(&format!("{}/videos", page), token, &body).await
    }

    /// Upload each image unpublished, then attach them all to one feed post.
    async fn publish_album(&self, post: &Post, page: &str, token: &str) -> Result<Value> {
        let mut attached = Vec::with_capacity(post.media_urls().len());
        for url in post.media_urls() {
            let body = json!({ "url": url, "published": false });
            let photo = self
                .api
                .post_json(&format!("{}/photos", page), token, &body)
                .await?;
            let id = require_id(Platform::Facebook, &photo, &["/id"])?;
            attached.push(json!({ "media_fbid": id }));
        }

        let body = json!({ "message": post.content(), "attached_media": attached });
        self.api.post_json(&format!("{}/feed", page), token, &body).await
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let page = account.external_id.as_str();
        let token = account.access_token.as_str();
        let first_media = post.media_urls().first().map(String::as_str);

        let response = match (post.post_type(), first_media) {
            (PostType::Text | PostType::Link, _) | (_, None) => {
                self.publish_feed(post, page, token).await?
            }
            (_, Some(url)) if is_video_post(post) => {
                self.publish_video(post, page, token, url).await?
            }
            (_, Some(_)) if post.media_urls().len() > 1 => {
                self.publish_album(post, page, token).await?
            }
            (_, Some(url)) => self.publish_photo(post, page, token, url).await?,
        };

        // Photo uploads answer with `post_id`, feed and video with `id`
        let id = require_id(Platform::Facebook, &response, &["/post_id", "/id"])?;
        tracing::info!(page = %page, post_id = %id, "Published to Facebook");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
