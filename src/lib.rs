//! Pool Reconciler - Declarative Cloud Compute Pools
//!
//! Drives a cloud provider's compute instances toward the pools declared in a
//! cluster snapshot, using a four-phase contract per pool: observe, plan,
//! converge and destroy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Cluster Driver                              │
//! │        (masters first on converge, nodes first on teardown)          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │ Reconciler       │  │  Pool            │  │  Master            │  │
//! │  │ Registry         │─▶│  Reconciler      │─▶│  Locator           │  │
//! │  │ (kind → factory) │  │  (4 phases)      │  │  (bounded polling) │  │
//! │  └──────────────────┘  └────────┬─────────┘  └─────────┬──────────┘  │
//! │                                 │                      │             │
//! │                      ┌──────────┴──────────┐           │             │
//! │                      │  Snapshot Renderer  │           │             │
//! │                      └─────────────────────┘           │             │
//! ├─────────────────────────────────┬──────────────────────┴─────────────┤
//! │                              Ports                                   │
//! │  ComputeProvider │ RemoteConnector │ BootstrapRenderer │ Comparator  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                        Reference Adapters                            │
//! │  InMemoryProvider │ StaticRemote │ TemplateRenderer │ Structural     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`]: In-process implementations of the ports
//! - [`cluster`]: Cluster snapshot and pool configuration
//! - [`config`]: Retry bounds and overlay paths
//! - [`domain`]: Core domain types and port traits
//! - [`driver`]: Whole-snapshot reconciliation
//! - [`error`]: Error types and handling
//! - [`metrics`]: Prometheus counters
//! - [`reconciler`]: Resource capability, pool reconciler and master locator

pub mod adapters;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod reconciler;

// Re-export commonly used types
pub use adapters::{
    InMemoryProvider, InMemoryProviderConfig, StaticRemote, StructuralComparator,
    TemplateRenderer,
};

pub use cluster::{
    ApiConfig, ClusterSnapshot, Components, PoolConfig, PoolRole, ProviderConfig, SshConfig,
};

pub use config::{OverlayPaths, ReconcilerConfig, RetryPolicy};

pub use domain::ports::{
    BootstrapRenderer, ComputeProvider, CreateInstanceRequest, Instance, InstanceStatus,
    RemoteConnector, RemoteSession, RemoteTarget, ResourceComparator, ResourceKind,
};

pub use driver::{ClusterDriver, PoolOutcome, ReconcileReport};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ReconcileMetrics;

pub use reconciler::{
    ClusterFacts, MasterLocator, PoolReconciler, Reconciled, ReconcilerRegistry, Resource,
    ResourceDescription, Session,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
