//! Post types and their capability profiles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};

/// What a post type allows: media, tagging and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub requires_media: bool,
    pub supports_hashtags: bool,
    pub supports_mentions: bool,
    pub supports_location: bool,
    pub max_content_length: usize,
    pub max_media_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Text,
    Image,
    Video,
    Link,
    Carousel,
    Story,
    Reel,
}

const TEXT: Capabilities = Capabilities {
    requires_media: false,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: true,
    max_content_length: 5000,
    max_media_count: 0,
};

const IMAGE: Capabilities = Capabilities {
    requires_media: true,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: true,
    max_content_length: 2200,
    max_media_count: 4,
};

const VIDEO: Capabilities = Capabilities {
    requires_media: true,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: true,
    max_content_length: 5000,
    max_media_count: 1,
};

const LINK: Capabilities = Capabilities {
    requires_media: false,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: false,
    max_content_length: 3000,
    max_media_count: 0,
};

const CAROUSEL: Capabilities = Capabilities {
    requires_media: true,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: true,
    max_content_length: 2200,
    max_media_count: 10,
};

const STORY: Capabilities = Capabilities {
    requires_media: true,
    supports_hashtags: false,
    supports_mentions: true,
    supports_location: true,
    max_content_length: 500,
    max_media_count: 1,
};

const REEL: Capabilities = Capabilities {
    requires_media: true,
    supports_hashtags: true,
    supports_mentions: true,
    supports_location: false,
    max_content_length: 2200,
    max_media_count: 1,
};

/// Carousels need at least this many slides.
pub const MIN_CAROUSEL_MEDIA: usize = 2;

impl PostType {
    pub const ALL: [PostType; 7] = [
        PostType::Text,
        PostType::Image,
        PostType::Video,
        PostType::Link,
        PostType::Carousel,
        PostType::Story,
        PostType::Reel,
    ];

    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            PostType::Text => &TEXT,
            PostType::Image => &IMAGE,
            PostType::Video => &VIDEO,
            PostType::Link => &LINK,
            PostType::Carousel => &CAROUSEL,
            PostType::Story => &STORY,
            PostType::Reel => &REEL,
        }
    }

    pub fn requires_media(self) -> bool {
        self.capabilities().requires_media
    }

    pub fn supports_hashtags(self) -> bool {
        self.capabilities().supports_hashtags
    }

    pub fn supports_mentions(self) -> bool {
        self.capabilities().supports_mentions
    }

    pub fn supports_location(self) -> bool {
        self.capabilities().supports_location
    }

    pub fn max_content_length(self) -> usize {
        self.capabilities().max_content_length
    }

    pub fn max_media_count(self) -> usize {
        self.capabilities().max_media_count
    }

    /// Video and Reel posts carry moving pictures.
    pub fn is_video(self) -> bool {
        matches!(self, PostType::Video | PostType::Reel)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostType::Text => "text",
            PostType::Image => "image",
            PostType::Video => "video",
            PostType::Link => "link",
            PostType::Carousel => "carousel",
            PostType::Story => "story",
            PostType::Reel => "reel",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostType {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(PostType::Text),
            "image" => Ok(PostType::Image),
            "video" => Ok(PostType::Video),
            "link" => Ok(PostType::Link),
            "carousel" => Ok(PostType::Carousel),
            "story" => Ok(PostType::Story),
            "reel" => Ok(PostType::Reel),
            _ => Err(BufferError::InvalidType(s.to_string())),
        }
    }
}
