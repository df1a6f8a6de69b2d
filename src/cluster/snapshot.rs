//! Cluster Snapshot
//!
//! The immutable-by-convention cluster value passed between reconciliation
//! phases. Every phase clones the incoming snapshot and returns a fresh one,
//! so callers can keep the previous value for rollback or diagnostics.

use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// Provider Configuration
// =============================================================================

/// SSH credentials used for instance keys and remote sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    /// Provider-side identifier of the uploaded key
    pub identifier: String,
    /// Fingerprint of the public key
    pub public_key_fingerprint: String,
    /// Local path of the public key (private key sits next to it)
    pub public_key_path: String,
    /// Remote login user
    pub user: String,
    /// Remote SSH port
    pub port: u16,
}

/// Cluster API settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Externally visible API endpoint, set once a master has been resolved
    #[serde(default)]
    pub endpoint: String,
    /// API port injected into bootstrap scripts
    pub port: u16,
}

/// Optional cluster components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    /// Private overlay network between instances
    #[serde(default)]
    pub overlay_network: bool,
}

/// Provider-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider name (e.g., "digitalocean")
    #[serde(default)]
    pub provider: String,
    /// Region/location of the cluster
    pub location: String,
    /// SSH credentials
    pub ssh: SshConfig,
    /// Cluster API settings
    pub api: ApiConfig,
    /// Optional components
    #[serde(default)]
    pub components: Components,
    /// Free-form values available to bootstrap templates
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Role of a pool within the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    Master,
    Node,
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolRole::Master => write!(f, "master"),
            PoolRole::Node => write!(f, "node"),
        }
    }
}

/// Configuration of one homogeneous pool of instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Pool name, also the tag correlating provider-side instances
    pub name: String,
    /// Master or node
    pub role: PoolRole,
    /// Resource kind reconciling this pool
    #[serde(default)]
    pub kind: ResourceKind,
    /// Instance size slug
    #[serde(default)]
    pub size: String,
    /// Instance image slug
    #[serde(default)]
    pub image: String,
    /// Region slug, falls back to the provider location when empty
    #[serde(default)]
    pub region: String,
    /// Number of instances in the pool
    #[serde(default)]
    pub max_count: u32,
    /// Ordered bootstrap script references
    #[serde(default)]
    pub bootstrap_scripts: Vec<String>,
}

impl PoolConfig {
    /// Create a pool with the given name and role
    pub fn new(name: impl Into<String>, role: PoolRole) -> Self {
        Self {
            name: name.into(),
            role,
            kind: ResourceKind::default(),
            size: String::new(),
            image: String::new(),
            region: String::new(),
            max_count: 0,
            bootstrap_scripts: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_scripts<I, S>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_scripts = scripts.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_master(&self) -> bool {
        self.role == PoolRole::Master
    }
}

// =============================================================================
// Cluster Snapshot
// =============================================================================

/// Full cluster configuration passed between reconciliation phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    /// Cluster name
    pub name: String,
    /// Provider-wide configuration
    pub provider_config: ProviderConfig,
    /// Pools, ordered, unique by name
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

impl ClusterSnapshot {
    /// Create an empty snapshot
    pub fn new(name: impl Into<String>, provider_config: ProviderConfig) -> Self {
        Self {
            name: name.into(),
            provider_config,
            pools: Vec::new(),
        }
    }

    /// Append a pool
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    /// Look up a pool by name
    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// The single master pool.
    ///
    /// Missing or duplicated master pools are configuration errors.
    pub fn master_pool(&self) -> Result<&PoolConfig> {
        let mut masters = self.pools.iter().filter(|p| p.is_master());
        let master = masters.next().ok_or_else(|| {
            Error::Configuration(format!("cluster {} has no master pool", self.name))
        })?;
        if masters.next().is_some() {
            return Err(Error::Configuration(format!(
                "cluster {} has more than one master pool",
                self.name
            )));
        }
        Ok(master)
    }

    /// Check structural invariants (unique pool names)
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() {
                return Err(Error::Configuration("pool without a name".into()));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate pool name: {}",
                    pool.name
                )));
            }
        }
        Ok(())
    }

    /// Parse a snapshot from YAML
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load a snapshot from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// Serialize the snapshot to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
