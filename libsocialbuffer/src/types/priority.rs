//! Publish priority and queue ordering

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};
use crate::types::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl PostPriority {
    pub fn weight(self) -> u8 {
        match self {
            PostPriority::Low => 1,
            PostPriority::Medium => 2,
            PostPriority::High => 3,
            PostPriority::Urgent => 4,
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, PostPriority::High | PostPriority::Urgent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostPriority::Low => "low",
            PostPriority::Medium => "medium",
            PostPriority::High => "high",
            PostPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for PostPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostPriority {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(PostPriority::Low),
            "medium" | "normal" => Ok(PostPriority::Medium),
            "high" => Ok(PostPriority::High),
            "urgent" => Ok(PostPriority::Urgent),
            _ => Err(BufferError::InvalidPriority(s.to_string())),
        }
    }
}

/// Publish-queue order: heavier priority first, then earlier `scheduled_at`
/// (unscheduled posts last), then creation time, then id.
pub fn queue_order(a: &Post, b: &Post) -> Ordering {
    b.priority()
        .weight()
        .cmp(&a.priority().weight())
        .then_with(|| match (a.scheduled_at(), b.scheduled_at()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.id().cmp(&b.id()))
}

/// Sorts posts in place into publish-queue order.
pub fn sort_publish_queue(posts: &mut [Post]) {
    posts.sort_by(queue_order);
}
