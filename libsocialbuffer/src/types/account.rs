//! Social accounts and the closed set of supported platforms

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Twitter,
    LinkedIn,
    YouTube,
    TikTok,
    Pinterest,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Twitter,
        Platform::LinkedIn,
        Platform::YouTube,
        Platform::TikTok,
        Platform::Pinterest,
    ];

    /// Lowercase identifier used in config files and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::LinkedIn => "linkedin",
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Pinterest => "pinterest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::LinkedIn),
            "youtube" => Ok(Platform::YouTube),
            "tiktok" => Ok(Platform::TikTok),
            "pinterest" => Ok(Platform::Pinterest),
            _ => Err(BufferError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// A connected account on one platform, owned by one user.
///
/// Token issuance and refresh happen elsewhere; this crate only reads the
/// token and checks whether the connection is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    /// Page id, IG user id, author URN, board id... whatever the platform
    /// addresses the account by.
    pub external_id: String,
    pub display_name: Option<String>,
    pub access_token: String,
    pub connected: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SocialAccount {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Connected and holding a token that has not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.connected && !self.is_expired(now)
    }

    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{} ({})", name, self.platform),
            None => format!("{}:{}", self.platform, self.external_id),
        }
    }
}
