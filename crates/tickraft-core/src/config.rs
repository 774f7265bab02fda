//! # config
//!
//! why: every timer in the engine is counted in ticks and must be tunable
//! relations: consumed by tickraft-server when scheduling elections,
//! heartbeats and join rounds
//! what: RaftConfig with json loading and validation

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tick-based timing for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election deadline
    pub election_timeout_min: u64,
    /// Upper bound (exclusive) of the randomized election deadline
    pub election_timeout_max: u64,
    /// Maximum silence between two AppendEntries to the same peer
    pub heartbeat_interval: u64,
    /// How long a sent rpc keeps a peer marked as awaiting a reply
    pub rpc_timeout: u64,
    /// Catch-up rounds granted to a joining server
    pub join_rounds: u32,
    /// Seed for election jitter; mixed with the node id
    pub seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 100,
            election_timeout_max: 200,
            heartbeat_interval: 50,
            rpc_timeout: 50,
            join_rounds: 10,
            seed: None,
        }
    }
}

impl RaftConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min == 0 {
            return Err(ConfigError::Invalid("election_timeout_min must be positive".into()));
        }
        if self.election_timeout_max <= self.election_timeout_min {
            return Err(ConfigError::Invalid(format!(
                "election_timeout_max ({}) must exceed election_timeout_min ({})",
                self.election_timeout_max, self.election_timeout_min
            )));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval ({}) must be below election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.rpc_timeout == 0 {
            return Err(ConfigError::Invalid("rpc_timeout must be positive".into()));
        }
        if self.join_rounds == 0 {
            return Err(ConfigError::Invalid("join_rounds must be positive".into()));
        }
        Ok(())
    }
}
