//! Cluster Driver
//!
//! Runs the four phases over every pool of a snapshot:
//! - Masters are converged before nodes, since node bootstrap needs the master address
//! - Nodes are destroyed before masters
//! - Each phase receives the snapshot produced by the previous one
//! - The first failing pool aborts the run

use crate::cluster::{ClusterSnapshot, PoolConfig, PoolRole};
use crate::error::Result;
use crate::reconciler::{ReconcilerRegistry, ResourceDescription, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// Reports
// =============================================================================

/// Outcome of reconciling one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOutcome {
    pub pool: String,
    pub role: PoolRole,
    /// Whether converge had to create instances
    pub changed: bool,
    /// Resource description returned by converge
    pub resource: ResourceDescription,
}

/// Outcome of reconciling a whole snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub snapshot: ClusterSnapshot,
    pub pools: Vec<PoolOutcome>,
}

impl ReconcileReport {
    /// Number of pools that needed changes
    pub fn changed(&self) -> usize {
        self.pools.iter().filter(|p| p.changed).count()
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Drives the reconcilers of every pool in a snapshot
pub struct ClusterDriver {
    registry: ReconcilerRegistry,
    session: Session,
}

impl ClusterDriver {
    pub fn new(registry: ReconcilerRegistry, session: Session) -> Self {
        Self { registry, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Expected description of every pool, masters first
    pub async fn plan(&self, snapshot: &ClusterSnapshot) -> Result<Vec<ResourceDescription>> {
        snapshot.validate()?;
        let mut current = snapshot.clone();
        let mut planned = Vec::with_capacity(snapshot.pools.len());

        for pool in ordered(snapshot, PoolRole::Master) {
            let resource = self.registry.build(&pool, &self.session)?;
            let step = resource.plan(&current).await?;
            current = step.snapshot;
            planned.push(step.resource);
        }
        Ok(planned)
    }

    /// Observe, plan and converge every pool, masters first
    pub async fn reconcile(&self, snapshot: &ClusterSnapshot) -> Result<ReconcileReport> {
        snapshot.validate()?;
        info!(cluster = %snapshot.name, pools = snapshot.pools.len(), "Reconciling cluster");

        let mut current = snapshot.clone();
        let mut outcomes = Vec::with_capacity(snapshot.pools.len());

        for pool in ordered(snapshot, PoolRole::Master) {
            let resource = self.registry.build(&pool, &self.session)?;

            let observed = resource.observe(&current).await?;
            let planned = resource.plan(&observed.snapshot).await?;
            let changed = !self
                .session
                .comparator
                .equal(&observed.resource, &planned.resource)?;
            debug!(pool = %pool.name, changed, "Compared observed and planned state");

            let applied = resource
                .converge(&observed.resource, &planned.resource, &planned.snapshot)
                .await?;
            current = applied.snapshot;
            outcomes.push(PoolOutcome {
                pool: pool.name.clone(),
                role: pool.role,
                changed,
                resource: applied.resource,
            });
        }

        let report = ReconcileReport {
            snapshot: current,
            pools: outcomes,
        };
        info!(cluster = %snapshot.name, changed = report.changed(), "Cluster reconciled");
        Ok(report)
    }

    /// Observe and destroy every pool, nodes first
    pub async fn teardown(&self, snapshot: &ClusterSnapshot) -> Result<ClusterSnapshot> {
        snapshot.validate()?;
        info!(cluster = %snapshot.name, "Tearing down cluster");

        let mut current = snapshot.clone();
        for pool in ordered(snapshot, PoolRole::Node) {
            let resource = self.registry.build(&pool, &self.session)?;
            let observed = resource.observe(&current).await?;
            let deleted = resource
                .destroy(&observed.resource, &observed.snapshot)
                .await?;
            current = deleted.snapshot;
        }

        info!(cluster = %snapshot.name, "Cluster torn down");
        Ok(current)
    }
}

/// Pools with role `first` ahead of the rest, declaration order otherwise kept
fn ordered(snapshot: &ClusterSnapshot, first: PoolRole) -> Vec<PoolConfig> {
    let (mut head, tail): (Vec<_>, Vec<_>) = snapshot
        .pools
        .iter()
        .cloned()
        .partition(|p| p.role == first);
    head.extend(tail);
    head
}
