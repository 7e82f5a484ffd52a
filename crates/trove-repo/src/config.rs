//! Repository tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trove_chain::ChainConfig;

/// Settings shared by repositories, chains and the maintenance task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// How long a flush waits for its sync barrier.
    pub sync_timeout_ms: u64,
    /// Lower bound of the pause between maintenance passes.
    pub maintenance_min_sleep_ms: u64,
    /// Upper bound of the pause between maintenance passes.
    pub maintenance_max_sleep_ms: u64,
    /// Check the hash of keys returned by implicit authorities.
    pub extra_validation: bool,
    /// Readers with a cached decrypted value, per container.
    pub decrypt_cache_capacity: usize,
    /// Replayed messages queued per entity before eager validation.
    pub partial_trust_limit: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 10_000,
            maintenance_min_sleep_ms: 1_000,
            maintenance_max_sleep_ms: 5_000,
            extra_validation: false,
            decrypt_cache_capacity: 8,
            partial_trust_limit: 100,
        }
    }
}

impl RepoConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Chain settings derived from this configuration.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            partial_trust_limit: self.partial_trust_limit,
            extra_validation: self.extra_validation,
            decrypt_cache_capacity: self.decrypt_cache_capacity,
        }
    }
}
