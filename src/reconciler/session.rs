//! Reconciliation Session
//!
//! Explicit handle to the collaborators a reconciler needs. Built once per
//! reconciliation session and cloned into every reconciler.

use crate::config::ReconcilerConfig;
use crate::domain::ports::{
    BootstrapRendererRef, ComputeProviderRef, RemoteConnectorRef, ResourceComparatorRef,
};
use crate::metrics::ReconcileMetrics;
use std::sync::Arc;
use tokio::time::Instant;

/// Collaborators and limits shared by the reconcilers of one session
#[derive(Clone)]
pub struct Session {
    /// Cloud provider client
    pub provider: ComputeProviderRef,
    /// Remote shell transport, required only in overlay mode
    pub remote: Option<RemoteConnectorRef>,
    /// Bootstrap payload renderer
    pub renderer: BootstrapRendererRef,
    /// Structural equality of resource descriptions
    pub comparator: ResourceComparatorRef,
    /// Retry bounds and overlay paths
    pub config: ReconcilerConfig,
    /// Optional counters
    pub metrics: Option<Arc<ReconcileMetrics>>,
    /// Wall-clock bound for every retry loop of the session
    pub deadline: Option<Instant>,
}

impl Session {
    pub fn new(
        provider: ComputeProviderRef,
        renderer: BootstrapRendererRef,
        comparator: ResourceComparatorRef,
    ) -> Self {
        Self {
            provider,
            remote: None,
            renderer,
            comparator,
            config: ReconcilerConfig::default(),
            metrics: None,
            deadline: None,
        }
    }

    pub fn with_remote(mut self, remote: RemoteConnectorRef) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&ReconcileMetrics> {
        self.metrics.as_deref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider.provider_name())
            .field("remote", &self.remote.is_some())
            .field("config", &self.config)
            .field("deadline", &self.deadline)
            .finish()
    }
}
