use anyhow::Result;
use common::Config;
use serde::{Deserialize, Serialize};

use mcts::DEFAULT_EXPLORATION;

/// Search bounds applied when the inbound request leaves them unset.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BoostOptions {
    pub num_rollouts: usize,
    pub max_depth: usize,
    pub exploration: f32,
}

impl Default for BoostOptions {
    fn default() -> Self {
        Self {
            num_rollouts: 5,
            max_depth: 5,
            exploration: DEFAULT_EXPLORATION,
        }
    }
}

impl Config for BoostOptions {
    fn load(config: &common::ConfigLoader) -> Result<Self> {
        Ok(Self {
            num_rollouts: config
                .get("num_rollouts")
                .and_then(|v| v.as_usize())
                .unwrap_or(5),
            max_depth: config
                .get("max_depth")
                .and_then(|v| v.as_usize())
                .unwrap_or(5),
            exploration: config
                .get("exploration")
                .and_then(|v| v.as_f32())
                .unwrap_or(DEFAULT_EXPLORATION),
        })
    }
}
