//! Domain types: value objects, accounts and the Post aggregate

pub mod account;
pub mod metrics;
pub mod post;
pub mod post_type;
pub mod priority;
pub mod status;

pub use account::{Platform, SocialAccount};
pub use metrics::{
    level_for_score, Counter, LevelThresholds, PerformanceLevel, PostMetrics, ScoreWeights,
};
pub use post::{Link, Location, NewPost, Post, PostChanges, DEFAULT_MAX_RETRIES};
pub use post_type::{Capabilities, PostType, MIN_CAROUSEL_MEDIA};
pub use priority::{queue_order, sort_publish_queue, PostPriority};
pub use status::PostStatus;
