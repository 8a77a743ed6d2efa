//! Configuration management for SocialBuffer
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working setup where each platform publishes through its NoOp publisher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use crate::types::{LevelThresholds, Platform, ScoreWeights, DEFAULT_MAX_RETRIES};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub publishing: PublishingConfig,
    pub limits: LimitsConfig,
    pub metrics: MetricsConfig,
    pub scheduling: SchedulingConfig,
    /// Keyed by platform name (`facebook`, `twitter`, ...).
    pub platforms: BTreeMap<String, PlatformConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/socialbuffer/posts.db".to_string(),
        }
    }
}

/// When a multi-account publish counts as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SuccessPolicy {
    /// Every target account must succeed.
    #[default]
    #[serde(rename = "all")]
    AllMustSucceed,
    /// At least one target account must succeed.
    #[serde(rename = "best_effort")]
    BestEffort,
}

impl SuccessPolicy {
    pub fn is_met(self, succeeded: usize, total: usize) -> bool {
        match self {
            SuccessPolicy::AllMustSucceed => total > 0 && succeeded == total,
            SuccessPolicy::BestEffort => succeeded > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub success_policy: SuccessPolicy,
    /// Upper bound on concurrent outbound publishes for one post.
    pub max_concurrency: usize,
    /// Per-call timeout applied to every platform publish.
    pub timeout_secs: u64,
    /// Broadcast buffer for domain events.
    pub event_capacity: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            success_policy: SuccessPolicy::default(),
            max_concurrency: 8,
            timeout_secs: 30,
            event_capacity: 100,
        }
    }
}

impl PublishingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_active_posts_per_user: usize,
    /// Scheduled posts per account within 12 hours either side of a slot.
    pub max_scheduled_per_account_per_day: usize,
    pub max_hashtags: usize,
    pub max_mentions: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_active_posts_per_user: 100,
            max_scheduled_per_account_per_day: 25,
            max_hashtags: 30,
            max_mentions: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub weights: ScoreWeights,
    pub thresholds: LevelThresholds,
    /// Total engagement at which `PostEngagementThreshold` fires.
    pub engagement_threshold: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            thresholds: LevelThresholds::default(),
            engagement_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub poll_interval_secs: u64,
    /// Maximum posts claimed per sweep.
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_size: 50,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_secs: 60,
            retry_max_delay_secs: 3600,
        }
    }
}

impl SchedulingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }
}

/// Live publishers call the platform API; NoOp publishers only validate and log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherMode {
    Live,
    #[default]
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub mode: PublisherMode,
    /// Override of the platform API base URL.
    pub api_base: Option<String>,
    pub max_concurrency: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: PublisherMode::default(),
            api_base: None,
            max_concurrency: 4,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.publishing.max_concurrency == 0 {
            return Err(invalid("publishing.max_concurrency", "must be at least 1"));
        }
        if self.publishing.timeout_secs == 0 {
            return Err(invalid("publishing.timeout_secs", "must be at least 1"));
        }
        if self.publishing.event_capacity == 0 {
            return Err(invalid("publishing.event_capacity", "must be at least 1"));
        }
        if self.scheduling.batch_size == 0 {
            return Err(invalid("scheduling.batch_size", "must be at least 1"));
        }
        if self.scheduling.retry_base_delay_secs > self.scheduling.retry_max_delay_secs {
            return Err(invalid(
                "scheduling.retry_base_delay_secs",
                "must not exceed retry_max_delay_secs",
            ));
        }
        self.metrics.weights.validate()?;
        self.metrics.thresholds.validate()?;

        for (name, platform) in &self.platforms {
            let field = format!("platforms.{}", name);
            if name.parse::<Platform>().is_err() {
                return Err(invalid(&field, "unknown platform"));
            }
            if platform.max_concurrency == 0 {
                return Err(invalid(&field, "max_concurrency must be at least 1"));
            }
        }
        Ok(())
    }

    /// Settings for `platform`, defaults when the section is absent.
    pub fn platform(&self, platform: Platform) -> PlatformConfig {
        self.platforms
            .get(platform.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.scheduling.retry_policy()
    }
}

fn invalid(field: &str, message: &str) -> crate::error::BufferError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SOCIALBUFFER_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("socialbuffer").join("config.toml"))
}

/// Expand `~` in the configured database path.
pub fn resolve_db_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.publishing.success_policy, SuccessPolicy::AllMustSucceed);
        assert_eq!(config.scheduling.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.platform(Platform::Twitter).mode, PublisherMode::Noop);
        assert_eq!(config.metrics.thresholds, LevelThresholds::default());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/buffer.db"

[publishing]
success_policy = "best_effort"
max_concurrency = 3

[limits]
max_hashtags = 5

[metrics.thresholds]
viral = 90.0
high = 60.0
medium = 30.0

[platforms.twitter]
mode = "live"
api_base = "http://localhost:9999"
max_concurrency = 2
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.database.path, "/tmp/buffer.db");
        assert_eq!(config.publishing.success_policy, SuccessPolicy::BestEffort);
        assert_eq!(config.publishing.max_concurrency, 3);
        assert_eq!(config.limits.max_hashtags, 5);
        assert_eq!(config.limits.max_mentions, 20);
        assert_eq!(config.metrics.thresholds.viral, 90.0);

        let twitter = config.platform(Platform::Twitter);
        assert_eq!(twitter.mode, PublisherMode::Live);
        assert_eq!(twitter.api_base.as_deref(), Some("http://localhost:9999"));
        assert_eq!(twitter.max_concurrency, 2);
    }

    #[test]
    fn test_unordered_thresholds_rejected_at_load() {
        let result = Config::from_toml(
            r#"
[metrics.thresholds]
viral = 10.0
high = 50.0
medium = 20.0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_platform_section_rejected() {
        let result = Config::from_toml("[platforms.myspace]\nmode = \"live\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::load_from_path(Path::new("/nonexistent/socialbuffer.toml"));
        assert!(matches!(
            result,
            Err(crate::error::BufferError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    fn test_success_policy() {
        assert!(SuccessPolicy::AllMustSucceed.is_met(3, 3));
        assert!(!SuccessPolicy::AllMustSucceed.is_met(2, 3));
        assert!(!SuccessPolicy::AllMustSucceed.is_met(0, 0));
        assert!(SuccessPolicy::BestEffort.is_met(1, 3));
        assert!(!SuccessPolicy::BestEffort.is_met(0, 3));
    }

    #[test]
    fn test_retry_policy_from_scheduling() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(policy.base_delay, Duration::from_secs(60));
        assert_eq!(policy.max_delay, Duration::from_secs(3600));
    }
}
