//! Node configuration, loadable from YAML.
//!
//! Every field has a default so the server runs with no file at all; the
//! board constants in particular are product decisions that ship in config
//! rather than in code.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use stonerace_execution::BoardConfig;
use stonerace_types::{
    DEFAULT_EVICT_AFTER_MS, DEFAULT_RECONCILE_INTERVAL_MS, DEFAULT_REVIEW_ATTEMPTS,
    DEFAULT_TURN_TIMEOUT_MS,
};

/// Payment provider connection settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub secret: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090/".to_string(),
            secret: "dev-secret".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub port: u16,
    /// Server seed the per-game roll streams derive from.
    pub seed: u64,
    pub board: BoardConfig,
    pub turn_timeout_ms: u64,
    pub evict_after_ms: u64,
    pub reconcile_interval_ms: u64,
    pub review_attempts: u32,
    pub provider: ProviderConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            seed: 0,
            board: BoardConfig::default(),
            turn_timeout_ms: DEFAULT_TURN_TIMEOUT_MS,
            evict_after_ms: DEFAULT_EVICT_AFTER_MS,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            review_attempts: DEFAULT_REVIEW_ATTEMPTS,
            provider: ProviderConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .board
            .validate()
            .context("invalid board configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.board.validate().is_ok());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_partial_yaml_overrides_defaults() {
        let config: NodeConfig = serde_yaml::from_str(
            "port: 9000\nboard:\n  target_position: 30\n  stone_faces: [1, 2, 3]\n",
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.board.target_position, 30);
        assert_eq!(config.board.stone_faces, vec![1, 2, 3]);
        // Untouched fields keep their defaults.
        assert_eq!(config.board.roster_size, 2);
        assert_eq!(config.review_attempts, DEFAULT_REVIEW_ATTEMPTS);
    }
}
