//! Domain Ports - Core trait definitions for the reconciler
//!
//! These traits define the boundaries between the reconciliation protocol and
//! external systems: the cloud provider API, the remote shell transport, the
//! bootstrap script renderer, and the structural comparator. Adapters
//! implement these traits to provide concrete functionality.

use crate::cluster::{ClusterSnapshot, SshConfig};
use crate::error::Result;
use crate::reconciler::{ClusterFacts, ResourceDescription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Resource Kinds
// =============================================================================

/// Kinds of provider resources a reconciler can be registered for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A pool of compute instances correlated by tag
    #[default]
    InstancePool,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::InstancePool => write!(f, "instance-pool"),
        }
    }
}

// =============================================================================
// Provisioned Instances
// =============================================================================

/// Lifecycle status reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Still initializing
    New,
    Active,
    Off,
    Archive,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Whether the instance is still being created
    pub fn is_initializing(&self) -> bool {
        matches!(self, InstanceStatus::New)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::New => write!(f, "new"),
            InstanceStatus::Active => write!(f, "active"),
            InstanceStatus::Off => write!(f, "off"),
            InstanceStatus::Archive => write!(f, "archive"),
            InstanceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A provider-side compute instance (read-only to the reconciler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Provider-assigned identifier
    pub id: String,
    /// Instance name
    pub name: String,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Size slug
    pub size: String,
    /// Image slug
    pub image: String,
    /// Region slug
    pub region: String,
    /// Public IPv4 address, if assigned yet
    pub public_address: Option<String>,
    /// Private IPv4 address, if assigned yet
    pub private_address: Option<String>,
    /// Tags attached at creation
    pub tags: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Public address, treating an empty string as unassigned
    pub fn public_address(&self) -> Option<&str> {
        self.public_address.as_deref().filter(|a| !a.is_empty())
    }

    /// Private address, treating an empty string as unassigned
    pub fn private_address(&self) -> Option<&str> {
        self.private_address.as_deref().filter(|a| !a.is_empty())
    }
}

/// SSH key attached to new instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyRef {
    pub id: String,
    pub fingerprint: String,
}

/// Request to create one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    /// Tags; the pool name correlates instances to their pool
    pub tags: Vec<String>,
    pub private_networking: bool,
    pub ssh_keys: Vec<SshKeyRef>,
    /// Rendered init payload
    pub user_data: String,
}

// =============================================================================
// Compute Provider Port
// =============================================================================

/// Port for cloud provider compute operations
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Provider name, for logging
    fn provider_name(&self) -> &str;

    /// List all instances carrying a tag
    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Instance>>;

    /// Fetch one instance by id
    async fn get(&self, id: &str) -> Result<Option<Instance>>;

    /// Create one instance
    async fn create(&self, request: CreateInstanceRequest) -> Result<Instance>;

    /// Delete one instance
    async fn delete(&self, id: &str) -> Result<()>;
}

// =============================================================================
// Remote Execution Port
// =============================================================================

/// Where and how to open a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: String,
}

impl RemoteTarget {
    /// Target a host with the cluster's SSH settings
    pub fn from_ssh(host: impl Into<String>, ssh: &SshConfig) -> Self {
        Self {
            host: host.into(),
            port: ssh.port,
            user: ssh.user.clone(),
            key_path: ssh.public_key_path.clone(),
        }
    }
}

/// An open remote session
#[async_trait]
pub trait RemoteSession: Send {
    /// Read the bytes of a remote file
    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Close the session
    async fn close(&mut self) -> Result<()>;
}

/// Port for opening remote sessions
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

// =============================================================================
// Bootstrap Renderer Port
// =============================================================================

/// Port for rendering the instance init payload
pub trait BootstrapRenderer: Send + Sync {
    /// Render the ordered scripts against the snapshot and resolved cluster facts
    fn render(
        &self,
        scripts: &[String],
        snapshot: &ClusterSnapshot,
        facts: &ClusterFacts,
    ) -> Result<Vec<u8>>;
}

// =============================================================================
// Comparator Port
// =============================================================================

/// Port for structural equality of resource descriptions
pub trait ResourceComparator: Send + Sync {
    fn equal(&self, a: &ResourceDescription, b: &ResourceDescription) -> Result<bool>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ComputeProviderRef = Arc<dyn ComputeProvider>;
pub type RemoteConnectorRef = Arc<dyn RemoteConnector>;
pub type BootstrapRendererRef = Arc<dyn BootstrapRenderer>;
pub type ResourceComparatorRef = Arc<dyn ResourceComparator>;
