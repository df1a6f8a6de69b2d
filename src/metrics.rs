//! Reconciliation Metrics
//!
//! Prometheus counters kept in a private registry so several sessions can
//! coexist in one process.

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters recorded by the reconcilers of a session
pub struct ReconcileMetrics {
    registry: Registry,
    instances_created: IntCounterVec,
    instances_deleted: IntCounterVec,
    converge_skipped: IntCounterVec,
    master_lookup_attempts: IntCounter,
}

impl ReconcileMetrics {
    /// Create and register all counters
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let instances_created = IntCounterVec::new(
            Opts::new(
                "pool_reconciler_instances_created_total",
                "Instances created by converge",
            ),
            &["pool"],
        )?;
        let instances_deleted = IntCounterVec::new(
            Opts::new(
                "pool_reconciler_instances_deleted_total",
                "Instances deleted by destroy",
            ),
            &["pool"],
        )?;
        let converge_skipped = IntCounterVec::new(
            Opts::new(
                "pool_reconciler_converge_skipped_total",
                "Converge calls short-circuited because actual matched expected",
            ),
            &["pool"],
        )?;
        let master_lookup_attempts = IntCounter::new(
            "pool_reconciler_master_lookup_attempts_total",
            "Attempts made while resolving the master address",
        )?;

        registry.register(Box::new(instances_created.clone()))?;
        registry.register(Box::new(instances_deleted.clone()))?;
        registry.register(Box::new(converge_skipped.clone()))?;
        registry.register(Box::new(master_lookup_attempts.clone()))?;

        Ok(Self {
            registry,
            instances_created,
            instances_deleted,
            converge_skipped,
            master_lookup_attempts,
        })
    }

    pub fn record_created(&self, pool: &str) {
        self.instances_created.with_label_values(&[pool]).inc();
    }

    pub fn record_deleted(&self, pool: &str) {
        self.instances_deleted.with_label_values(&[pool]).inc();
    }

    pub fn record_skipped(&self, pool: &str) {
        self.converge_skipped.with_label_values(&[pool]).inc();
    }

    pub fn record_lookup_attempt(&self) {
        self.master_lookup_attempts.inc();
    }

    pub fn created(&self, pool: &str) -> u64 {
        self.instances_created.with_label_values(&[pool]).get()
    }

    pub fn deleted(&self, pool: &str) -> u64 {
        self.instances_deleted.with_label_values(&[pool]).get()
    }

    pub fn skipped(&self, pool: &str) -> u64 {
        self.converge_skipped.with_label_values(&[pool]).get()
    }

    pub fn lookup_attempts(&self) -> u64 {
        self.master_lookup_attempts.get()
    }

    /// Render all counters in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::Error::Internal(e.to_string()))
    }
}
