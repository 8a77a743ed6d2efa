//! Engagement counters and derived performance figures
//!
//! `PostMetrics` is an immutable snapshot: every increment returns a new
//! value. Ratios floor their denominator at 1 and are clamped into `[0, 1]`,
//! so they stay well defined for empty or inconsistent counters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub clicks: u64,
    pub saves: u64,
    pub reactions: u64,
    pub reach: u64,
    pub impressions: u64,
}

/// One raw counter of a [`PostMetrics`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Views,
    Likes,
    Comments,
    Shares,
    Clicks,
    Saves,
    Reactions,
    Reach,
    Impressions,
}

/// Relative weight of each ratio in the performance score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub engagement: f64,
    pub click_through: f64,
    pub reach: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            engagement: 0.5,
            click_through: 0.3,
            reach: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [self.engagement, self.click_through, self.reach];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "metrics.weights".to_string(),
                message: "weights must be finite and non-negative".to_string(),
            }
            .into());
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.weights".to_string(),
                message: "at least one weight must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Minimum score for each performance level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub viral: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            viral: 80.0,
            high: 50.0,
            medium: 20.0,
        }
    }
}

impl LevelThresholds {
    /// Thresholds must be ordered `medium <= high <= viral` inside 0..=100.
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !(in_range(self.medium) && in_range(self.high) && in_range(self.viral)) {
            return Err(ConfigError::InvalidValue {
                field: "metrics.thresholds".to_string(),
                message: "thresholds must be between 0 and 100".to_string(),
            }
            .into());
        }
        if !(self.medium <= self.high && self.high <= self.viral) {
            return Err(ConfigError::InvalidValue {
                field: "metrics.thresholds".to_string(),
                message: "thresholds must satisfy medium <= high <= viral".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Low,
    Medium,
    High,
    Viral,
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceLevel::Low => "low",
            PerformanceLevel::Medium => "medium",
            PerformanceLevel::High => "high",
            PerformanceLevel::Viral => "viral",
        };
        f.write_str(s)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    let value = numerator as f64 / denominator.max(1) as f64;
    value.clamp(0.0, 1.0)
}

impl PostMetrics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Views => self.views,
            Counter::Likes => self.likes,
            Counter::Comments => self.comments,
            Counter::Shares => self.shares,
            Counter::Clicks => self.clicks,
            Counter::Saves => self.saves,
            Counter::Reactions => self.reactions,
            Counter::Reach => self.reach,
            Counter::Impressions => self.impressions,
        }
    }

    /// Returns a new snapshot with `counter` raised by `by` (saturating).
    #[must_use]
    pub fn incremented(self, counter: Counter, by: u64) -> Self {
        let mut next = self;
        let slot = match counter {
            Counter::Views => &mut next.views,
            Counter::Likes => &mut next.likes,
            Counter::Comments => &mut next.comments,
            Counter::Shares => &mut next.shares,
            Counter::Clicks => &mut next.clicks,
            Counter::Saves => &mut next.saves,
            Counter::Reactions => &mut next.reactions,
            Counter::Reach => &mut next.reach,
            Counter::Impressions => &mut next.impressions,
        };
        *slot = slot.saturating_add(by);
        next
    }

    #[must_use]
    pub fn with_view(self) -> Self {
        self.incremented(Counter::Views, 1)
    }

    #[must_use]
    pub fn with_like(self) -> Self {
        self.incremented(Counter::Likes, 1)
    }

    #[must_use]
    pub fn with_comment(self) -> Self {
        self.incremented(Counter::Comments, 1)
    }

    #[must_use]
    pub fn with_share(self) -> Self {
        self.incremented(Counter::Shares, 1)
    }

    #[must_use]
    pub fn with_click(self) -> Self {
        self.incremented(Counter::Clicks, 1)
    }

    pub fn total_engagement(&self) -> u64 {
        self.likes
            .saturating_add(self.comments)
            .saturating_add(self.shares)
            .saturating_add(self.saves)
            .saturating_add(self.reactions)
    }

    pub fn engagement_rate(&self) -> f64 {
        ratio(self.total_engagement(), self.views)
    }

    pub fn click_through_rate(&self) -> f64 {
        ratio(self.clicks, self.impressions)
    }

    pub fn reach_rate(&self) -> f64 {
        ratio(self.reach, self.impressions)
    }

    /// Weighted mean of the three ratios, scaled to 0..=100.
    pub fn performance_score(&self, weights: &ScoreWeights) -> f64 {
        let total = weights.engagement + weights.click_through + weights.reach;
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = weights.engagement * self.engagement_rate()
            + weights.click_through * self.click_through_rate()
            + weights.reach * self.reach_rate();
        (weighted / total * 100.0).clamp(0.0, 100.0)
    }

    pub fn performance_level(
        &self,
        weights: &ScoreWeights,
        thresholds: &LevelThresholds,
    ) -> PerformanceLevel {
        level_for_score(self.performance_score(weights), thresholds)
    }
}

/// Buckets a score into a level. Monotonic as long as the thresholds are ordered.
pub fn level_for_score(score: f64, thresholds: &LevelThresholds) -> PerformanceLevel {
    if score >= thresholds.viral {
        PerformanceLevel::Viral
    } else if score >= thresholds.high {
        PerformanceLevel::High
    } else if score >= thresholds.medium {
        PerformanceLevel::Medium
    } else {
        PerformanceLevel::Low
    }
}
