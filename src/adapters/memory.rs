//! In-Memory Compute Provider
//!
//! Keeps instances in process memory. Used by the `simulate` command and by
//! tests, which can inject listing, create and delete failures, keep new
//! instances in `new` status for a number of status polls, and inspect the
//! calls made.

use crate::domain::ports::{ComputeProvider, CreateInstanceRequest, Instance, InstanceStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct InMemoryProviderConfig {
    /// First three octets of assigned private addresses
    pub private_prefix: String,
    /// First three octets of assigned public addresses
    pub public_prefix: String,
    /// Assign a public address on creation
    pub assign_public_address: bool,
    /// Number of status polls a new instance keeps reporting `new`
    pub boot_polls: u32,
    /// First instance id handed out
    pub first_id: u64,
}

impl Default for InMemoryProviderConfig {
    fn default() -> Self {
        Self {
            private_prefix: "10.132.0".to_string(),
            public_prefix: "203.0.113".to_string(),
            assign_public_address: true,
            boot_polls: 0,
            first_id: 1000,
        }
    }
}

// =============================================================================
// Call Log
// =============================================================================

/// A provider call, as recorded by the in-memory provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    ListByTag(String),
    Get(String),
    /// Instance name
    Create(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct Faults {
    list_failures: u32,
    delete_failures: u32,
    creates_allowed: Option<u32>,
}

#[derive(Debug, Clone)]
struct StoredInstance {
    instance: Instance,
    /// Status polls left before the instance turns active
    pending_polls: u32,
}

// =============================================================================
// In-Memory Provider
// =============================================================================

/// Compute provider backed by process memory
pub struct InMemoryProvider {
    config: InMemoryProviderConfig,
    /// Instances in creation order
    instances: RwLock<Vec<StoredInstance>>,
    next_id: AtomicU64,
    calls: Mutex<Vec<ProviderCall>>,
    requests: Mutex<Vec<CreateInstanceRequest>>,
    faults: Mutex<Faults>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryProviderConfig::default())
    }
}

impl InMemoryProvider {
    pub fn new(config: InMemoryProviderConfig) -> Self {
        let next_id = AtomicU64::new(config.first_id);
        Self {
            config,
            instances: RwLock::new(Vec::new()),
            next_id,
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Seed an instance directly, bypassing the call log
    pub async fn insert(&self, instance: Instance) {
        let pending_polls = if instance.status.is_initializing() {
            self.config.boot_polls
        } else {
            0
        };
        self.instances.write().await.push(StoredInstance {
            instance,
            pending_polls,
        });
    }

    /// Remove an instance directly, bypassing the call log
    pub async fn remove(&self, id: &str) -> Option<Instance> {
        let mut instances = self.instances.write().await;
        let position = instances.iter().position(|s| s.instance.id == id)?;
        Some(instances.remove(position).instance)
    }

    /// Change the addresses of a stored instance
    pub async fn set_addresses(&self, id: &str, public: Option<&str>, private: Option<&str>) {
        let mut instances = self.instances.write().await;
        if let Some(stored) = instances.iter_mut().find(|s| s.instance.id == id) {
            stored.instance.public_address = public.map(str::to_string);
            stored.instance.private_address = private.map(str::to_string);
        }
    }

    /// Snapshot of all stored instances
    pub async fn instances(&self) -> Vec<Instance> {
        self.instances
            .read()
            .await
            .iter()
            .map(|s| s.instance.clone())
            .collect()
    }

    /// Fail the next `count` listings
    pub fn fail_next_listings(&self, count: u32) {
        self.faults.lock().list_failures = count;
    }

    /// Fail the next `count` deletions
    pub fn fail_next_deletes(&self, count: u32) {
        self.faults.lock().delete_failures = count;
    }

    /// Let `count` more creations succeed, then fail every one after
    pub fn fail_create_after(&self, count: u32) {
        self.faults.lock().creates_allowed = Some(count);
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of listings made for a tag
    pub fn list_calls(&self, tag: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ProviderCall::ListByTag(t) if t == tag))
            .count()
    }

    /// The last successful create request
    pub fn last_request(&self) -> Option<CreateInstanceRequest> {
        self.requests.lock().last().cloned()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }

    fn build_instance(&self, request: &CreateInstanceRequest) -> Instance {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let host = seq % 250 + 2;
        Instance {
            id: seq.to_string(),
            name: request.name.clone(),
            status: if self.config.boot_polls > 0 {
                InstanceStatus::New
            } else {
                InstanceStatus::Active
            },
            size: request.size.clone(),
            image: request.image.clone(),
            region: request.region.clone(),
            public_address: self
                .config
                .assign_public_address
                .then(|| format!("{}.{}", self.config.public_prefix, host)),
            private_address: request
                .private_networking
                .then(|| format!("{}.{}", self.config.private_prefix, host)),
            tags: request.tags.clone(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ComputeProvider for InMemoryProvider {
    fn provider_name(&self) -> &str {
        "memory"
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Instance>> {
        self.record(ProviderCall::ListByTag(tag.to_string()));
        {
            let mut faults = self.faults.lock();
            if faults.list_failures > 0 {
                faults.list_failures -= 1;
                return Err(Error::provider("list", format!("listing tag {} failed", tag)));
            }
        }

        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|s| s.instance.tags.iter().any(|t| t == tag))
            .map(|s| s.instance.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Instance>> {
        self.record(ProviderCall::Get(id.to_string()));

        let mut instances = self.instances.write().await;
        let Some(stored) = instances.iter_mut().find(|s| s.instance.id == id) else {
            return Ok(None);
        };
        if stored.pending_polls > 0 {
            stored.pending_polls -= 1;
        } else if stored.instance.status.is_initializing() {
            stored.instance.status = InstanceStatus::Active;
        }
        Ok(Some(stored.instance.clone()))
    }

    async fn create(&self, request: CreateInstanceRequest) -> Result<Instance> {
        self.record(ProviderCall::Create(request.name.clone()));
        {
            let mut faults = self.faults.lock();
            if let Some(allowed) = faults.creates_allowed.as_mut() {
                if *allowed == 0 {
                    return Err(Error::provider(
                        "create",
                        format!("creating {} failed", request.name),
                    ));
                }
                *allowed -= 1;
            }
        }

        let instance = self.build_instance(&request);
        debug!(instance_id = %instance.id, name = %instance.name, "Stored instance");
        self.instances.write().await.push(StoredInstance {
            instance: instance.clone(),
            pending_polls: self.config.boot_polls,
        });
        self.requests.lock().push(request);
        Ok(instance)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.record(ProviderCall::Delete(id.to_string()));
        {
            let mut faults = self.faults.lock();
            if faults.delete_failures > 0 {
                faults.delete_failures -= 1;
                return Err(Error::provider("delete", format!("deleting {} failed", id)));
            }
        }

        let mut instances = self.instances.write().await;
        let position = instances
            .iter()
            .position(|s| s.instance.id == id)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Instance".into(),
                name: id.into(),
            })?;
        instances.remove(position);
        info!(instance_id = %id, "Removed instance");
        Ok(())
    }
}
