//! SocialBuffer - scheduling and publishing for social media posts
//!
//! The library holds the post lifecycle, its validation rules and the
//! multi-account publish orchestrator. Binaries such as `buffer-send` are
//! thin shells around [`service::BufferService`].

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod poster;
pub mod retry;
pub mod scheduling;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, MemoryRepository, Repository};
pub use error::{BufferError, FailureKind, PlatformError, Result};
pub use service::BufferService;
pub use types::{Platform, Post, PostPriority, PostStatus, PostType, SocialAccount};
