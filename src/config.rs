//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

/// Configuration for the learning orchestrator.
///
/// Loaded from `config.toml`. All fields have defaults suitable for a
/// single-node deployment; the timer intervals mirror the daily / weekly /
/// incremental cadence of the learning cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OrchestratorConfig {
    /// Directory holding orchestrator.db.
    pub data_dir: PathBuf,
    /// Path to the marketplace SQLite database (read-only collaborator).
    pub marketplace_db: PathBuf,
    /// Listen address for the status/trigger/insight API.
    pub api_addr: String,
    /// Seconds between daily learning cycles.
    pub daily_interval_secs: u64,
    /// Seconds between weekly deep learning cycles.
    pub weekly_interval_secs: u64,
    /// Seconds between incremental learning cycles.
    pub incremental_interval_secs: u64,
    /// Seconds between self-healing maintenance checks.
    pub maintenance_interval_secs: u64,
    /// Deadline for a single agent invocation within a cycle. An agent that
    /// exceeds it is treated as having failed its own turn.
    pub agent_timeout_secs: u64,
    /// Trailing window for the cross-agent insight exchange.
    pub exchange_window_hours: i64,
    /// Lease on the persisted learning lock. A holder that has not touched
    /// the lock row for this long is presumed crashed and its lock is
    /// stolen by the next trigger.
    pub lock_lease_secs: i64,
    /// Agents reporting health below this are scheduled for maintenance
    /// learning.
    pub health_threshold: f64,
    /// Item ceilings for incremental cycles. Fixed counts, not time windows,
    /// so incremental cost stays constant as history grows.
    pub recent_artwork_limit: i64,
    pub recent_interaction_limit: i64,
    pub recent_market_limit: i64,
    pub recent_security_limit: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            marketplace_db: PathBuf::from("data/marketplace.db"),
            api_addr: "127.0.0.1:7400".to_string(),
            daily_interval_secs: 86_400,
            weekly_interval_secs: 604_800,
            incremental_interval_secs: 900,
            maintenance_interval_secs: 3_600,
            agent_timeout_secs: 300,
            exchange_window_hours: 24,
            lock_lease_secs: 3_600,
            health_threshold: 0.75,
            recent_artwork_limit: 10,
            recent_interaction_limit: 50,
            recent_market_limit: 20,
            recent_security_limit: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.exchange_window_hours, 24);
        assert!((config.health_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.recent_artwork_limit, 10);
        assert_eq!(config.recent_interaction_limit, 50);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: OrchestratorConfig =
            toml::from_str("incremental_interval_secs = 60").unwrap();
        assert_eq!(config.incremental_interval_secs, 60);
        assert_eq!(config.daily_interval_secs, 86_400);
    }
}
