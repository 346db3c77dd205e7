use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Classification thresholds. Every magic number the rules use lives here so
/// operators can tune behavior without code changes; missing fields fall back
/// to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// Average progress (percent) at or above which a recently active
    /// student is highly engaged.
    pub high_progress_threshold: f64,
    /// Average progress (percent) below which engagement is low outright.
    pub low_progress_threshold: f64,
    /// Days since last access within which a student still counts as fresh.
    pub stale_days_high: i64,
    /// Days since last access beyond which engagement is low.
    pub stale_days_low: i64,
    /// Average quiz score (percent) below which a student is struggling.
    pub struggling_quiz_threshold: f64,
    /// Per-lesson dropout rate (percent) above which a student is struggling.
    pub dropout_rate_threshold: f64,
    /// Days since last access beyond which a student is inactive.
    pub inactive_days: i64,
    /// Completion rate (percent) below which the needs-attention insight fires.
    pub low_completion_threshold: f64,
    /// Completion rate (percent) at or above which the top-performer insight fires.
    pub top_performer_threshold: f64,
    /// How many matching insight rules are surfaced per query.
    pub max_insights: usize,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        RuleThresholds {
            high_progress_threshold: 70.0,
            low_progress_threshold: 20.0,
            stale_days_high: 3,
            stale_days_low: 7,
            struggling_quiz_threshold: 50.0,
            dropout_rate_threshold: 40.0,
            inactive_days: 7,
            low_completion_threshold: 30.0,
            top_performer_threshold: 80.0,
            max_insights: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline for the event-store read, after which the query fails as
    /// retryable rather than hanging the dashboard.
    pub fetch_timeout_secs: u64,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            fetch_timeout_secs: 10,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: RuleThresholds,
    pub store: StoreConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }
}
