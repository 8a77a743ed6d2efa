//! Publisher abstraction and per-platform implementations
//!
//! A [`Publisher`] delivers one [`Post`] to one connected [`SocialAccount`].
//! Live publishers share the HTTP plumbing in [`http`]; [`noop`] publishers
//! only validate and log; [`mock`] is a scripted test double.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libsocialbuffer::platforms::{factory::PublisherFactory, noop::NoOpPublisher};
//! use libsocialbuffer::types::Platform;
//!
//! # fn example() -> libsocialbuffer::Result<()> {
//! let factory = PublisherFactory::builder()
//!     .register(Arc::new(NoOpPublisher::new(Platform::Twitter)))
//!     .build();
//!
//! let publisher = factory.create(Platform::Twitter)?;
//! assert_eq!(publisher.platform(), Platform::Twitter);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::types::{Platform, Post, SocialAccount};

pub mod factory;
pub mod http;
pub mod noop;

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod pinterest;
pub mod tiktok;
pub mod twitter;
pub mod youtube;

// Scripted publisher, compiled in all builds
pub mod mock;

pub use factory::PublisherFactory;

/// What a platform returned for a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub platform_post_id: String,
    pub raw_response: Option<serde_json::Value>,
}

impl PublishedPost {
    pub fn new(platform_post_id: impl Into<String>) -> Self {
        Self {
            platform_post_id: platform_post_id.into(),
            raw_response: None,
        }
    }

    pub fn with_response(mut self, raw_response: serde_json::Value) -> Self {
        self.raw_response = Some(raw_response);
        self
    }
}

/// Unified interface over the supported social networks
///
/// Implementations must be cheap to share: the factory hands out one
/// `Arc<dyn Publisher>` per platform and the orchestrator calls it
/// concurrently for several accounts.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Content rules of the target network.
    fn rules(&self) -> PlatformRules {
        PlatformRules::for_platform(self.platform())
    }

    /// Check `post` against the platform rules without calling the network.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` describing the first rule broken.
    fn validate(&self, post: &Post) -> Result<()> {
        self.rules().check(post).map_err(Into::into)
    }

    /// Deliver `post` to `account`.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` when the token is rejected
    /// - `PlatformError::Validation` when the platform refuses the content
    /// - `PlatformError::RateLimit`, `Network`, `Timeout` for transient trouble
    /// - `PlatformError::Posting` for any other refusal
    async fn publish(&self, post: &Post, account: &SocialAccount) -> Result<PublishedPost>;
}

/// Per-platform content limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformRules {
    pub max_content_length: usize,
    pub max_media_count: usize,
    pub requires_media: bool,
    /// Only video posts are accepted.
    pub video_only: bool,
    /// The first media item must be a still image.
    pub requires_image: bool,
}

impl PlatformRules {
    pub const fn for_platform(platform: Platform) -> Self {
        let base = PlatformRules {
            max_content_length: 0,
            max_media_count: 0,
            requires_media: false,
            video_only: false,
            requires_image: false,
        };
        match platform {
            Platform::Facebook => PlatformRules {
                max_content_length: 63_206,
                max_media_count: 10,
                ..base
            },
            Platform::Instagram => PlatformRules {
                max_content_length: 2_200,
                max_media_count: 10,
                requires_media: true,
                ..base
            },
            Platform::Twitter => PlatformRules {
                max_content_length: 280,
                max_media_count: 4,
                ..base
            },
            Platform::LinkedIn => PlatformRules {
                max_content_length: 3_000,
                max_media_count: 9,
                ..base
            },
            Platform::YouTube => PlatformRules {
                max_content_length: 5_000,
                max_media_count: 1,
                requires_media: true,
                video_only: true,
                ..base
            },
            Platform::TikTok => PlatformRules {
                max_content_length: 2_200,
                max_media_count: 1,
                requires_media: true,
                video_only: true,
                ..base
            },
            Platform::Pinterest => PlatformRules {
                max_content_length: 500,
                max_media_count: 1,
                requires_media: true,
                requires_image: true,
                ..base
            },
        }
    }

    pub fn check(&self, post: &Post) -> std::result::Result<(), PlatformError> {
        let length = post.content().chars().count();
        if length > self.max_content_length {
            return Err(PlatformError::Validation(format!(
                "Content has {} characters, limit is {}",
                length, self.max_content_length
            )));
        }

        let media = post.media_urls();
        if media.len() > self.max_media_count {
            return Err(PlatformError::Validation(format!(
                "{} media items attached, limit is {}",
                media.len(),
                self.max_media_count
            )));
        }
        if self.requires_media && media.is_empty() {
            return Err(PlatformError::Validation("Media is required".to_string()));
        }
        if self.video_only && !is_video_post(post) {
            return Err(PlatformError::Validation("Only video posts are supported".to_string()));
        }
        if self.requires_image && media.first().is_some_and(|url| is_video_url(url)) {
            return Err(PlatformError::Validation("An image is required".to_string()));
        }
        Ok(())
    }
}

/// Video by type, or by the extension of its first media URL.
pub fn is_video_post(post: &Post) -> bool {
    post.post_type().is_video() || post.media_urls().first().is_some_and(|url| is_video_url(url))
}

/// Guess from the path extension, ignoring query and fragment.
pub fn is_video_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit('.').next().unwrap_or("").to_lowercase();
    matches!(
        extension.as_str(),
        "mp4" | "mov" | "m4v" | "webm" | "avi" | "mkv"
    )
}
