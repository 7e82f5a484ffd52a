//! TOML configuration for the trove daemon.
//!
//! Every section is optional: a missing file or an empty one yields a node
//! storing its logs under `~/.trove` with an empty parent policy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;
use trove_bridge::StorageBackend;
use trove_chain::StaticAuthorities;
use trove_repo::RepoConfig;
use trove_types::{KeyKind, MessagePublicKey, ParentPolicyTable, PartitionKey};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node data directory and warm partitions.
    pub node: NodeSection,
    /// Partition log backend.
    pub storage: StorageSection,
    /// Repository and maintenance tunables.
    pub repo: RepoConfig,
    /// Entity types and how they attach to the chain of trust.
    pub policy: PolicySection,
    /// Implicit authority domains and their signing keys.
    pub authorities: BTreeMap<String, String>,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (partition logs).
    pub data_dir: PathBuf,
    /// Partitions opened at startup, as `topic:index`.
    pub partitions: Vec<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".trove"))
            .unwrap_or_else(|| PathBuf::from(".trove"));
        Self {
            data_dir,
            partitions: Vec::new(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"fjall"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
        }
    }
}

/// `[policy]` section.
///
/// ```toml
/// [policy]
/// claimable = ["Profile"]
/// dynamic_authority = ["Tenant"]
///
/// [policy.parents]
/// Folder = ["Profile"]
///
/// [policy.authority]
/// Company = "example.org"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Top-level types.
    pub parent_free: Vec<String>,
    /// Top-level types anyone may create.
    pub claimable: Vec<String>,
    /// Top-level types rooted under the domain named in each record.
    pub dynamic_authority: Vec<String>,
    /// Child type → allowed parent types.
    pub parents: BTreeMap<String, Vec<String>>,
    /// Top-level type → fixed implicit authority domain.
    pub authority: BTreeMap<String, String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn is_memory(&self) -> bool {
        self.storage.backend == "memory"
    }

    /// Directory holding the fjall partition logs.
    pub fn log_dir(&self) -> PathBuf {
        self.node.data_dir.join("logs")
    }

    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.storage.backend.as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "fjall" => Ok(StorageBackend::Fjall(self.log_dir())),
            other => bail!("unknown storage backend {other:?}"),
        }
    }

    /// Partitions to open at startup.
    pub fn partitions(&self) -> anyhow::Result<Vec<PartitionKey>> {
        self.node
            .partitions
            .iter()
            .map(|p| {
                p.parse::<PartitionKey>()
                    .with_context(|| format!("invalid partition {p:?}"))
            })
            .collect()
    }

    /// Parent-policy table described by `[policy]`.
    pub fn policy_table(&self) -> ParentPolicyTable {
        let policy = &self.policy;
        let mut table = ParentPolicyTable::new();
        for ty in &policy.parent_free {
            table = table.parent_free(ty);
        }
        for ty in &policy.claimable {
            table = table.claimable(ty);
        }
        for ty in &policy.dynamic_authority {
            table = table.dynamic_implicit_authority(ty);
        }
        for (ty, domain) in &policy.authority {
            table = table.implicit_authority(ty, domain);
        }
        for (child, parents) in &policy.parents {
            for parent in parents {
                table = table.allow_parent(child, parent);
            }
        }
        table
    }

    /// Implicit authorities from `[authorities]` (domain → hex signing key).
    pub fn authorities(&self) -> anyhow::Result<StaticAuthorities> {
        let authorities = StaticAuthorities::new();
        for (domain, key_hex) in &self.authorities {
            let bytes = hex::decode(key_hex.trim())
                .with_context(|| format!("invalid key for authority {domain}"))?;
            authorities.insert(
                domain,
                MessagePublicKey::new(KeyKind::Signing, bytes, Some(domain.clone())),
            );
        }
        Ok(authorities)
    }
}
