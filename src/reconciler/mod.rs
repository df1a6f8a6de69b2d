//! Declarative Reconciliation
//!
//! Four-phase contract implemented per resource kind:
//!
//! - **observe**: what exists at the provider
//! - **plan**: what the snapshot asks for (never touches the provider)
//! - **converge**: create provider-side resources when the two differ
//! - **destroy**: tear the resources down
//!
//! Every phase takes the prior snapshot by reference and returns a new one.

pub mod facts;
pub mod locator;
pub mod pool;
pub mod render;
pub mod session;

pub use facts::*;
pub use locator::*;
pub use pool::*;
pub use render::*;
pub use session::*;

use crate::cluster::{ClusterSnapshot, PoolConfig};
use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Resource Description
// =============================================================================

/// State of one reconciled pool, produced fresh by every phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub name: String,
    /// Identifier of one representative instance, or empty
    pub cloud_id: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub count: u32,
    pub ssh_fingerprint: String,
    pub bootstrap_scripts: Vec<String>,
}

/// Result of a phase: the new snapshot and the phase's resource description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub snapshot: ClusterSnapshot,
    pub resource: ResourceDescription,
}

// =============================================================================
// Resource Capability
// =============================================================================

/// A reconcilable resource kind
#[async_trait]
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Name of the pool this resource reconciles
    fn name(&self) -> &str;

    /// Query the provider for the resource's current state
    async fn observe(&self, snapshot: &ClusterSnapshot) -> Result<Reconciled>;

    /// Build the desired state from the snapshot
    async fn plan(&self, snapshot: &ClusterSnapshot) -> Result<Reconciled>;

    /// Make provider-side reality match `expected`
    async fn converge(
        &self,
        actual: &ResourceDescription,
        expected: &ResourceDescription,
        snapshot: &ClusterSnapshot,
    ) -> Result<Reconciled>;

    /// Remove everything `actual` describes
    async fn destroy(
        &self,
        actual: &ResourceDescription,
        snapshot: &ClusterSnapshot,
    ) -> Result<Reconciled>;
}

pub type ResourceRef = Arc<dyn Resource>;

// =============================================================================
// Registry
// =============================================================================

/// Builds a reconciler for a pool
pub type ResourceFactory = Box<dyn Fn(PoolConfig, Session) -> ResourceRef + Send + Sync>;

/// Reconciler factories keyed by resource kind
pub struct ReconcilerRegistry {
    factories: BTreeMap<ResourceKind, ResourceFactory>,
}

impl ReconcilerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory, replacing any previous one for the kind
    pub fn register<F>(&mut self, kind: ResourceKind, factory: F)
    where
        F: Fn(PoolConfig, Session) -> ResourceRef + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Build the reconciler for a pool
    pub fn build(&self, pool: &PoolConfig, session: &Session) -> Result<ResourceRef> {
        let factory = self
            .factories
            .get(&pool.kind)
            .ok_or_else(|| Error::UnknownResourceKind {
                kind: pool.kind.to_string(),
            })?;
        Ok(factory(pool.clone(), session.clone()))
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.factories.keys().copied().collect()
    }
}

impl Default for ReconcilerRegistry {
    /// Registry with every built-in kind
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(ResourceKind::InstancePool, |pool, session| {
            Arc::new(PoolReconciler::new(pool, session)) as ResourceRef
        });
        registry
    }
}
