//! Post lifecycle states and the raw transition matrix

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub const ALL: [PostStatus; 6] = [
        PostStatus::Draft,
        PostStatus::Scheduled,
        PostStatus::Publishing,
        PostStatus::Published,
        PostStatus::Failed,
        PostStatus::Cancelled,
    ];

    /// Transition matrix, ignoring the retry budget.
    ///
    /// Failed -> Publishing is listed here; whether a particular failed post
    /// still has retries left is checked by the aggregate.
    pub fn can_transition_to(self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Publishing)
                | (Draft, Cancelled)
                | (Scheduled, Publishing)
                | (Scheduled, Cancelled)
                | (Scheduled, Draft)
                | (Publishing, Published)
                | (Publishing, Failed)
                | (Failed, Publishing)
        )
    }

    /// Published and Cancelled never move again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Cancelled)
    }

    pub fn can_be_edited(self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Scheduled)
    }

    pub fn can_be_cancelled(self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Scheduled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, PostStatus::Scheduled | PostStatus::Publishing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    /// Checks the matrix and returns the typed error on a forbidden move.
    pub(crate) fn ensure_transition(self, next: PostStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(BufferError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" | "canceled" => Ok(PostStatus::Cancelled),
            other => Err(BufferError::invalid_field(
                "status",
                format!("Unknown post status '{}'", other),
            )),
        }
    }
}
