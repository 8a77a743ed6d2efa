//! LinkedIn publisher (UGC posts)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::platforms::http::{require_id, ApiClient};
use crate::platforms::{is_video_post, PublishedPost, Publisher};
use crate::types::{Platform, Post, SocialAccount};

pub const DEFAULT_API_BASE: &str = "https://api.linkedin.com";

pub struct LinkedInPublisher {
    api: ApiClient,
}

impl LinkedInPublisher {
    pub fn new(api_base: Option<&str>, timeout: Duration) -> Result<Self> {
        let api = ApiClient::new(
            Platform::LinkedIn,
            api_base.unwrap_or(DEFAULT_API_BASE),
            timeout,
        )?;
        Ok(Self { api })
    }
}

/// UGC post body. `author` is the member or organization URN.
fn ugc_body(post: &Post, author: &str) -> Value {
    let (category, media): (&str, Vec<Value>) = if let Some(link) = post.attached_link() {
        let mut entry = json!({ "status": "READY", "originalUrl": link.url });
        if let Some(title) = &link.title {
            entry["title"] = json!({ "text": title });
        }
        if let Some(description) = &link.description {
            entry["description"] = json!({ "text": description });
        }
        ("ARTICLE", vec![entry])
    } else if post.media_urls().is_empty() {
        ("NONE", Vec::new())
    } else {
        let category = if is_video_post(post) { "VIDEO" } else { "IMAGE" };
        let entries = post
            .media_urls()
            .iter()
            .map(|url| json!({ "status": "READY", "originalUrl": url }))
            .collect();
        (category, entries)
    };

    let mut share = json!({
        "shareCommentary": { "text": post.content() },
        "shareMediaCategory": category,
    });
    if !media.is_empty() {
        share["media"] = json!(media);
    }

    json!({
        "author": author,
        "lifecycleState": "PUBLISHED",
        "specificContent": { "com.linkedin.ugc.ShareContent": share },
        "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
    })
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost> {
        self.validate(post)?;

        let body = ugc_body(post, &account.external_id);
        let response = self
            .api
            .post_json("v2/ugcPosts", &account.access_token, &body)
            .await?;
        let id = require_id(Platform::LinkedIn, &response, &["/id"])?;

        tracing::info!(author = %account.external_id, urn = %id, "Published to LinkedIn");
        Ok(PublishedPost::new(id).with_response(response))
    }
}
