//! Pinterest publisher
//!
//! The account's external id is the board pins are created on.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://api.pinterest.com";

/// Pin titles are limited to 100 characters.
const MAX_TITLE_LENGTH: usize = 100;

pub struct PinterestPublisher {
    api: ApiClient,
}

impl PinterestPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::Pinterest,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }
}

fn pin_body(post: &Post, board_id: &str) -> Value {
    let image = post.media_urls().first().cloned().unwrap_or_default();
    let mut body = json!({
        "board_id": board_id,
        "description": post.content(),
        "media_source": { "source_type": "image_url", "url": image },
    });
    if let Some(title) = post.title() {
        body["title"] = json!(title.chars().take(MAX_TITLE_LENGTH).collect::<String>());
    }
    if let Some(link) = post.attached_link() {
        body["link"] = json!(link.url);
    }
    body
}

#[async_trait]
impl Publisher for PinterestPublisher {
    fn platform(&self) -> Platform {
        Platform::Pinterest
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let body = pin_body(post, &account.external_id);
        let response = self
            .api
            .post_json("v5/pins", &account.access_token, &body)
            .await?;
        let id = require_id(Platform::Pinterest, &response, &["/id"])?;

        tracing::info!(board = %account.external_id, pin_id = %id, "Published to Pinterest");
        Ok(PublishedPost::new(id).with_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_body_targets_board() {
        let post = Post::image(
            1,
            "Kitchen ideas",
            vec!["https://cdn.example.com/kitchen.jpg".to_string()],
            vec![4],
        )
        .unwrap();

        let body = pin_body(&post, "board-99");
        assert_eq!(body["board_id"], "board-99");
        assert_eq!(body["media_source"]["url"], "https://cdn.example.com/kitchen.jpg");
        assert!(body.get("link").is_none());
    }
}
