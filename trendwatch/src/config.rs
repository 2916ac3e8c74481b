// trendwatch/src/config.rs
//
// Engine tunables and daemon configuration.
//
// TrendOptions is handed to each engine at construction and never mutated
// afterwards; per-run overrides go through `refresh_with` /
// `request_review_with`. DaemonConfig is read from an optional JSON file.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TrendsError};
use crate::events::EntityKind;

// ── Engine tunables ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendOptions {
    pub threshold:               f64,   // minimum distinct actors today
    pub review_threshold:        usize, // rank whose score gates review
    pub max_score_cooldown_secs: i64,   // peak lifetime
    pub max_score_halflife_secs: i64,   // decay half-life after the peak
    pub decay_threshold:         f64,   // decayed score needed to stay listed
    pub batch_size:              usize, // candidates per scoring batch
    pub activity_ttl_secs:       i64,   // recent-activity entry lifetime
}

impl Default for TrendOptions {
    fn default() -> Self {
        Self {
            threshold:               5.0,
            review_threshold:        3,
            max_score_cooldown_secs: 2 * 24 * 60 * 60,
            max_score_halflife_secs: 4 * 60 * 60,
            decay_threshold:         1.0,
            batch_size:              100,
            activity_ttl_secs:       24 * 60 * 60,
        }
    }
}

impl TrendOptions {
    pub fn max_score_cooldown(&self) -> Duration {
        Duration::seconds(self.max_score_cooldown_secs)
    }

    pub fn max_score_halflife(&self) -> Duration {
        Duration::seconds(self.max_score_halflife_secs)
    }

    pub fn activity_ttl(&self) -> Duration {
        Duration::seconds(self.activity_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_score_halflife_secs <= 0 {
            return Err(TrendsError::Config("max_score_halflife_secs must be positive".into()));
        }
        if self.max_score_cooldown_secs < 0 {
            return Err(TrendsError::Config("max_score_cooldown_secs must not be negative".into()));
        }
        if self.activity_ttl_secs <= 0 {
            return Err(TrendsError::Config("activity_ttl_secs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(TrendsError::Config("batch_size must be at least 1".into()));
        }
        if self.review_threshold == 0 {
            return Err(TrendsError::Config("review_threshold must be at least 1".into()));
        }
        if !self.threshold.is_finite() || !self.decay_threshold.is_finite() {
            return Err(TrendsError::Config("thresholds must be finite".into()));
        }
        Ok(())
    }
}

// ── Daemon ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub trends:                     TrendOptions,
    pub refresh_interval_secs:      u64,
    pub review_interval_secs:       u64,
    pub housekeeping_interval_secs: u64,
    pub history_retention_days:     i64,
    pub output_dir:                 PathBuf,
    pub kinds:                      Vec<EntityKind>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            trends:                     TrendOptions::default(),
            refresh_interval_secs:      3600,
            review_interval_secs:       3600,
            housekeeping_interval_secs: 300,
            history_retention_days:     7,
            output_dir:                 PathBuf::from("/tmp/trendwatch_output"),
            kinds:                      vec![EntityKind::Tag, EntityKind::Link, EntityKind::Status],
        }
    }
}

impl DaemonConfig {
    /// Load from `path`. No path, or a path that does not exist, yields the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(p) if !p.exists() => {
                warn!("config {} not found, using defaults", p.display());
                Self::default()
            }
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                serde_json::from_str(&raw)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.trends.validate()?;
        if self.refresh_interval_secs == 0 || self.review_interval_secs == 0 {
            return Err(TrendsError::Config("intervals must be positive".into()));
        }
        if self.history_retention_days < 2 {
            // the scorer reads today and yesterday
            return Err(TrendsError::Config("history_retention_days must be at least 2".into()));
        }
        if self.kinds.is_empty() {
            return Err(TrendsError::Config("at least one trend kind must be enabled".into()));
        }
        Ok(())
    }
}
