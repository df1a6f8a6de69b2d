//! Instance Pool Reconciler
//!
//! Reconciles one pool of compute instances, correlated to its pool purely by
//! a tag equal to the pool name. The set of instances is recomputed with a tag
//! query on every call; nothing maps pools to instances persistently.

use crate::cluster::{ClusterSnapshot, PoolConfig, PoolRole};
use crate::domain::ports::{CreateInstanceRequest, Instance, ResourceKind, SshKeyRef};
use crate::error::{Error, Result};
use crate::reconciler::{
    render_snapshot, ClusterFacts, MasterLocator, Reconciled, Resource, ResourceDescription,
    Session,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Reconciler for a pool of instances
pub struct PoolReconciler {
    /// Target pool configuration
    pool: PoolConfig,
    session: Session,
}

impl PoolReconciler {
    pub fn new(pool: PoolConfig, session: Session) -> Self {
        Self { pool, session }
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn role(&self) -> PoolRole {
        self.pool.role
    }

    /// Pool region, falling back to the cluster location
    fn target_region(&self, snapshot: &ClusterSnapshot) -> String {
        if self.pool.region.is_empty() {
            snapshot.provider_config.location.clone()
        } else {
            self.pool.region.clone()
        }
    }

    fn commit(&self, resource: ResourceDescription, snapshot: &ClusterSnapshot) -> Reconciled {
        Reconciled {
            snapshot: render_snapshot(&resource, self.pool.role, snapshot),
            resource,
        }
    }

    /// Resolve the facts bootstrap scripts need before instances are created
    async fn resolve_facts(&self, snapshot: &ClusterSnapshot) -> Result<ClusterFacts> {
        let mut facts = ClusterFacts::for_snapshot(snapshot);
        if self.pool.role == PoolRole::Node {
            let located = MasterLocator::new(&self.session).locate(snapshot).await?;
            facts.master = Some(located.address);
            facts.overlay_config = located.overlay_config;
        }
        Ok(facts)
    }

    /// Wait while an instance is still initializing.
    ///
    /// Returns `false` if the instance disappeared while being polled.
    async fn await_settled(&self, instance: &Instance) -> Result<bool> {
        let policy = self.session.config.delete_status;
        let mut status = instance.status;
        let mut polls = 0;

        while status.is_initializing() && polls < policy.attempts {
            debug!(pool = %self.pool.name, instance_id = %instance.id, "Waiting for instance creation to finish");
            if !policy.sleep(self.session.deadline).await {
                warn!(pool = %self.pool.name, instance_id = %instance.id, "Deadline reached while waiting for instance");
                break;
            }
            polls += 1;
            match self.session.provider.get(&instance.id).await? {
                Some(current) => status = current.status,
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Resource for PoolReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::InstancePool
    }

    fn name(&self) -> &str {
        &self.pool.name
    }

    async fn observe(&self, snapshot: &ClusterSnapshot) -> Result<Reconciled> {
        debug!(pool = %self.pool.name, "Observing pool");
        let instances = self.session.provider.list_by_tag(&self.pool.name).await?;

        let mut actual = ResourceDescription::default();
        // Heterogeneous pools are not detected: one instance stands in for all
        if let Some(sample) = instances.first() {
            actual.name = sample.name.clone();
            actual.cloud_id = sample.id.clone();
            actual.size = sample.size.clone();
            actual.image = sample.image.clone();
            actual.region = sample.region.clone();
        }
        debug!(pool = %self.pool.name, found = instances.len(), "Listed pool instances");

        // Identity fields and count always come from the target configuration
        actual.count = self.pool.max_count;
        actual.name = self.pool.name.clone();
        actual.bootstrap_scripts = self.pool.bootstrap_scripts.clone();
        actual.ssh_fingerprint = snapshot.provider_config.ssh.public_key_fingerprint.clone();
        actual.region = self.target_region(snapshot);

        Ok(self.commit(actual, snapshot))
    }

    async fn plan(&self, snapshot: &ClusterSnapshot) -> Result<Reconciled> {
        debug!(pool = %self.pool.name, "Planning pool");
        let expected = ResourceDescription {
            name: self.pool.name.clone(),
            cloud_id: String::new(),
            region: self.target_region(snapshot),
            size: self.pool.size.clone(),
            image: self.pool.image.clone(),
            count: self.pool.max_count,
            ssh_fingerprint: snapshot.provider_config.ssh.public_key_fingerprint.clone(),
            bootstrap_scripts: self.pool.bootstrap_scripts.clone(),
        };
        Ok(self.commit(expected, snapshot))
    }

    /// Creates the expected instances unless `actual` already matches.
    ///
    /// The API endpoint is only recorded for node pools, from the resolved
    /// master's public address; a master pool leaves it unchanged.
    async fn converge(
        &self,
        actual: &ResourceDescription,
        expected: &ResourceDescription,
        snapshot: &ClusterSnapshot,
    ) -> Result<Reconciled> {
        debug!(pool = %self.pool.name, "Converging pool");
        if self.session.comparator.equal(actual, expected)? {
            debug!(pool = %self.pool.name, "Pool already converged");
            if let Some(metrics) = self.session.metrics() {
                metrics.record_skipped(&self.pool.name);
            }
            return Ok(Reconciled {
                snapshot: snapshot.clone(),
                resource: expected.clone(),
            });
        }

        let facts = self.resolve_facts(snapshot).await?;
        let payload = self
            .session
            .renderer
            .render(&expected.bootstrap_scripts, snapshot, &facts)?;
        let user_data = String::from_utf8(payload)
            .map_err(|e| Error::Render(format!("bootstrap payload is not UTF-8: {}", e)))?;

        let ssh_key = SshKeyRef {
            id: snapshot.provider_config.ssh.identifier.clone(),
            fingerprint: expected.ssh_fingerprint.clone(),
        };

        // Sequential and not transactional: instances created before a
        // failure stay live
        let mut last = None;
        for index in 0..expected.count {
            let request = CreateInstanceRequest {
                name: format!("{}-{}", expected.name, index),
                region: expected.region.clone(),
                size: expected.size.clone(),
                image: expected.image.clone(),
                tags: vec![expected.name.clone()],
                private_networking: true,
                ssh_keys: vec![ssh_key.clone()],
                user_data: user_data.clone(),
            };
            let instance = self.session.provider.create(request).await?;
            info!(pool = %self.pool.name, instance_id = %instance.id, name = %instance.name, "Created instance");
            if let Some(metrics) = self.session.metrics() {
                metrics.record_created(&self.pool.name);
            }
            last = Some(instance);
        }

        // Attributes come from the last created instance only
        let mut applied = ResourceDescription {
            name: self.pool.name.clone(),
            count: expected.count,
            ssh_fingerprint: expected.ssh_fingerprint.clone(),
            bootstrap_scripts: expected.bootstrap_scripts.clone(),
            ..Default::default()
        };
        match last {
            Some(instance) => {
                applied.cloud_id = instance.id;
                applied.image = instance.image;
                applied.size = instance.size;
                applied.region = instance.region;
            }
            None => {
                applied.image = expected.image.clone();
                applied.size = expected.size.clone();
                applied.region = expected.region.clone();
            }
        }

        let mut next = snapshot.clone();
        if let Some(master) = &facts.master {
            next.provider_config.api.endpoint = master.public.clone();
        }

        Ok(self.commit(applied, &next))
    }

    async fn destroy(
        &self,
        actual: &ResourceDescription,
        snapshot: &ClusterSnapshot,
    ) -> Result<Reconciled> {
        debug!(pool = %self.pool.name, "Destroying pool");
        if actual.name.is_empty() {
            return Err(Error::Precondition(
                "cannot destroy a pool resource without a name".into(),
            ));
        }

        let provider = &self.session.provider;
        let listing = self.session.config.delete_listing;
        let mut instances = provider.list_by_tag(&actual.name).await?;

        // The listing API is eventually consistent; a stale count never blocks teardown
        let mut retries = 0;
        while instances.len() as u32 != actual.count && retries < listing.attempts {
            info!(
                pool = %self.pool.name,
                found = instances.len(),
                expected = actual.count,
                "Instance count mismatch, querying again"
            );
            if !listing.sleep(self.session.deadline).await {
                break;
            }
            retries += 1;
            instances = provider.list_by_tag(&actual.name).await?;
        }
        if instances.len() as u32 != actual.count {
            warn!(
                pool = %self.pool.name,
                found = instances.len(),
                expected = actual.count,
                "Proceeding with last observed instances"
            );
        }

        for instance in &instances {
            if !self.await_settled(instance).await? {
                info!(pool = %self.pool.name, instance_id = %instance.id, "Instance vanished before deletion");
                continue;
            }
            provider.delete(&instance.id).await?;
            info!(pool = %self.pool.name, instance_id = %instance.id, "Deleted instance");
            if let Some(metrics) = self.session.metrics() {
                metrics.record_deleted(&self.pool.name);
            }
        }

        let mut next = snapshot.clone();
        next.provider_config.api.endpoint.clear();

        let deleted = ResourceDescription {
            cloud_id: String::new(),
            ..actual.clone()
        };
        Ok(self.commit(deleted, &next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        InMemoryProvider, InMemoryProviderConfig, ProviderCall, StaticRemote,
        StructuralComparator, TemplateRenderer,
    };
    use crate::cluster::{ApiConfig, ProviderConfig, SshConfig};
    use crate::config::{ReconcilerConfig, RetryPolicy};
    use crate::domain::ports::{ComputeProvider, InstanceStatus};
    use crate::metrics::ReconcileMetrics;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::new(
            "demo",
            ProviderConfig {
                provider: "memory".into(),
                location: "nyc1".into(),
                ssh: SshConfig {
                    identifier: "1234".into(),
                    public_key_fingerprint: "aa:bb".into(),
                    public_key_path: "/root/.ssh/id_rsa.pub".into(),
                    user: "root".into(),
                    port: 22,
                },
                api: ApiConfig {
                    endpoint: String::new(),
                    port: 6443,
                },
                ..Default::default()
            },
        )
        .with_pool(
            PoolConfig::new("master", PoolRole::Master)
                .with_size("s-2vcpu")
                .with_image("ubuntu")
                .with_max_count(1)
                .with_scripts(["master.sh"]),
        )
        .with_pool(
            PoolConfig::new("workers", PoolRole::Node)
                .with_size("s-1vcpu")
                .with_image("ubuntu")
                .with_region("nyc1")
                .with_max_count(3)
                .with_scripts(["node.sh"]),
        )
    }

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new()
            .with_script("master.sh", "#!/bin/sh\nkubeadm init --port {{ INJECTEDPORT }}\n")
            .with_script("node.sh", "#!/bin/sh\nkubeadm join {{ INJECTEDMASTER }}\n")
    }

    fn session(provider: Arc<InMemoryProvider>) -> Session {
        let config = ReconcilerConfig {
            master_lookup: RetryPolicy::new(3, Duration::from_secs(5)),
            delete_listing: RetryPolicy::new(4, Duration::from_secs(5)),
            delete_status: RetryPolicy::new(5, Duration::from_secs(3)),
            ..Default::default()
        };
        Session::new(provider, Arc::new(renderer()), Arc::new(StructuralComparator))
            .with_config(config)
    }

    fn reconciler(snapshot: &ClusterSnapshot, pool: &str, session: Session) -> PoolReconciler {
        PoolReconciler::new(snapshot.pool(pool).unwrap().clone(), session)
    }

    fn master_instance(public: &str, private: &str) -> Instance {
        Instance {
            id: "900".into(),
            name: "master-0".into(),
            status: InstanceStatus::Active,
            size: "s-2vcpu".into(),
            image: "ubuntu".into(),
            region: "nyc1".into(),
            public_address: Some(public.into()),
            private_address: Some(private.into()),
            tags: vec!["master".into()],
            created_at: Utc::now(),
        }
    }

    fn created_names(provider: &InMemoryProvider) -> Vec<String> {
        provider
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Create(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_observe_empty_pool() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider));

        let observed = workers.observe(&snapshot).await.unwrap();

        // Count reflects the target, the empty sample fields still differ from the plan
        assert_eq!(observed.resource.count, 3);
        assert_eq!(observed.resource.name, "workers");
        assert_eq!(observed.resource.cloud_id, "");
        assert_eq!(observed.resource.size, "");
        assert_eq!(observed.resource.region, "nyc1");
        assert_eq!(observed.resource.ssh_fingerprint, "aa:bb");
        assert_eq!(observed.resource.bootstrap_scripts, vec!["node.sh"]);
    }

    #[tokio::test]
    async fn test_observe_listing_error_is_fatal() {
        let provider = Arc::new(InMemoryProvider::default());
        provider.fail_next_listings(1);
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider));

        let result = workers.observe(&snapshot).await;
        assert_matches!(result, Err(Error::ProviderQuery { .. }));
    }

    #[tokio::test]
    async fn test_plan_is_pure() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let planned = master.plan(&snapshot).await.unwrap();

        assert_eq!(planned.resource.count, 1);
        assert_eq!(planned.resource.size, "s-2vcpu");
        // Pool region empty, falls back to the provider location
        assert_eq!(planned.resource.region, "nyc1");
        assert_eq!(planned.snapshot, snapshot);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_converge_is_idempotent() {
        let provider = Arc::new(InMemoryProvider::default());
        let metrics = Arc::new(ReconcileMetrics::new().unwrap());
        let snapshot = snapshot();
        let workers = reconciler(
            &snapshot,
            "workers",
            session(provider.clone()).with_metrics(metrics.clone()),
        );

        let expected = workers.plan(&snapshot).await.unwrap().resource;
        let applied = workers
            .converge(&expected, &expected, &snapshot)
            .await
            .unwrap();

        assert_eq!(applied.resource, expected);
        assert_eq!(applied.snapshot, snapshot);
        assert!(provider.calls().is_empty());
        assert_eq!(metrics.skipped("workers"), 1);
    }

    #[tokio::test]
    async fn test_converge_workers_example() {
        let provider = Arc::new(InMemoryProvider::default());
        provider
            .insert(master_instance("203.0.113.10", "10.0.0.5"))
            .await;
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider.clone()));

        let observed = workers.observe(&snapshot).await.unwrap();
        let planned = workers.plan(&observed.snapshot).await.unwrap();
        let applied = workers
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        assert_eq!(
            created_names(&provider),
            vec!["workers-0", "workers-1", "workers-2"]
        );
        // Master lookup happens before the first creation
        let calls = provider.calls();
        let lookup = calls
            .iter()
            .position(|c| *c == ProviderCall::ListByTag("master".into()))
            .unwrap();
        let first_create = calls
            .iter()
            .position(|c| matches!(c, ProviderCall::Create(_)))
            .unwrap();
        assert!(lookup < first_create);

        let workers_live = provider.list_by_tag("workers").await.unwrap();
        assert_eq!(workers_live.len(), 3);
        for instance in &workers_live {
            assert_eq!(instance.tags, vec!["workers"]);
            assert_eq!(instance.size, "s-1vcpu");
            assert_eq!(instance.region, "nyc1");
        }
        let request = provider.last_request().unwrap();
        assert!(request.private_networking);
        assert_eq!(request.ssh_keys[0].id, "1234");
        assert_eq!(request.ssh_keys[0].fingerprint, "aa:bb");
        assert!(request.user_data.contains("kubeadm join 10.0.0.5:6443"));

        assert_eq!(applied.resource.count, 3);
        assert_eq!(applied.resource.cloud_id, workers_live[2].id);
        assert_eq!(applied.snapshot.provider_config.api.endpoint, "203.0.113.10");
        assert_eq!(applied.snapshot.pool("workers").unwrap().max_count, 3);
        // Input snapshot untouched
        assert_eq!(snapshot.provider_config.api.endpoint, "");
    }

    #[tokio::test]
    async fn test_converge_then_observe_reports_count() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        let applied = master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        let reobserved = master.observe(&applied.snapshot).await.unwrap();
        assert_eq!(reobserved.resource.count, 1);
        assert_eq!(reobserved.resource.size, "s-2vcpu");

        // A second pass is a no-op
        let replanned = master.plan(&reobserved.snapshot).await.unwrap();
        let before = provider.calls().len();
        master
            .converge(&reobserved.resource, &replanned.resource, &replanned.snapshot)
            .await
            .unwrap();
        assert_eq!(provider.calls().len(), before);
    }

    #[tokio::test]
    async fn test_converge_master_skips_locator() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        let applied = master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        assert_eq!(created_names(&provider), vec!["master-0"]);
        assert_eq!(provider.list_calls("master"), 1);
        assert!(provider
            .last_request()
            .unwrap()
            .user_data
            .contains("kubeadm init --port 6443"));
        assert_eq!(applied.snapshot.provider_config.api.endpoint, "");
    }

    #[tokio::test]
    async fn test_partial_pool_is_left_alone() {
        let provider = Arc::new(InMemoryProvider::default());
        provider
            .insert(Instance {
                id: "500".into(),
                name: "workers-0".into(),
                status: InstanceStatus::Active,
                size: "s-1vcpu".into(),
                image: "ubuntu".into(),
                region: "nyc1".into(),
                public_address: Some("203.0.113.20".into()),
                private_address: Some("10.0.0.20".into()),
                tags: vec!["workers".into()],
                created_at: Utc::now(),
            })
            .await;
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider.clone()));

        let observed = workers.observe(&snapshot).await.unwrap();
        let planned = workers.plan(&observed.snapshot).await.unwrap();
        assert_eq!(observed.resource.count, 3);
        assert_eq!(observed.resource.cloud_id, "500");

        let applied = workers
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        // One instance of three exists, yet the pool compares equal to its plan
        assert!(created_names(&provider).is_empty());
        assert_eq!(provider.list_by_tag("workers").await.unwrap().len(), 1);
        assert_eq!(applied.resource, planned.resource);
    }

    #[tokio::test]
    async fn test_converge_injects_overlay_config() {
        let provider = Arc::new(InMemoryProvider::default());
        provider
            .insert(master_instance("203.0.113.10", "10.0.0.5"))
            .await;
        let remote = Arc::new(
            StaticRemote::new()
                .with_file("203.0.113.10", "/tmp/.ip", "10.8.0.1\n")
                .with_file("203.0.113.10", "/tmp/clients.conf", "client\nremote 10.8.0.1\n"),
        );
        let renderer = TemplateRenderer::new().with_script(
            "node.sh",
            "kubeadm join {{ INJECTEDMASTER }}\necho '{{ INJECTEDCONF }}' > /etc/overlay.conf\n",
        );
        let session = Session::new(
            provider.clone(),
            Arc::new(renderer),
            Arc::new(StructuralComparator),
        )
        .with_remote(remote.clone());

        let mut snapshot = snapshot();
        snapshot.provider_config.components.overlay_network = true;
        let workers = reconciler(&snapshot, "workers", session);

        let observed = workers.observe(&snapshot).await.unwrap();
        let planned = workers.plan(&observed.snapshot).await.unwrap();
        let applied = workers
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        let user_data = provider.last_request().unwrap().user_data;
        assert!(user_data.contains("kubeadm join 10.8.0.1:6443"));
        assert!(user_data.contains("echo 'client\\nremote 10.8.0.1\\n' > /etc/overlay.conf"));
        assert_eq!(created_names(&provider).len(), 3);
        assert_eq!(remote.close_count(), 1);
        assert_eq!(applied.snapshot.provider_config.api.endpoint, "203.0.113.10");
    }

    #[tokio::test]
    async fn test_converge_aborts_on_first_create_error() {
        let provider = Arc::new(InMemoryProvider::default());
        provider
            .insert(master_instance("203.0.113.10", "10.0.0.5"))
            .await;
        provider.fail_create_after(1);
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider.clone()));

        let observed = workers.observe(&snapshot).await.unwrap();
        let planned = workers.plan(&observed.snapshot).await.unwrap();
        let result = workers
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await;

        assert_matches!(result, Err(Error::ProviderQuery { .. }));
        // The first instance stays live, the third is never attempted
        assert_eq!(created_names(&provider), vec!["workers-0", "workers-1"]);
        assert_eq!(provider.list_by_tag("workers").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_fails_when_master_unavailable() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider.clone()));

        let observed = workers.observe(&snapshot).await.unwrap();
        let planned = workers.plan(&observed.snapshot).await.unwrap();
        let result = workers
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await;

        assert_matches!(result, Err(Error::MasterUnavailable { attempts: 3, .. }));
        assert!(created_names(&provider).is_empty());
    }

    #[tokio::test]
    async fn test_converge_render_error() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let mut pool = snapshot.pool("master").unwrap().clone();
        pool.bootstrap_scripts = vec!["missing.sh".into()];
        let master = PoolReconciler::new(pool, session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        let result = master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await;

        assert_matches!(result, Err(Error::Render(_)));
        assert!(created_names(&provider).is_empty());
    }

    #[tokio::test]
    async fn test_destroy_requires_name() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let workers = reconciler(&snapshot, "workers", session(provider.clone()));

        let result = workers
            .destroy(&ResourceDescription::default(), &snapshot)
            .await;

        assert_matches!(result, Err(Error::Precondition(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_deletes_all_and_clears_endpoint() {
        let provider = Arc::new(InMemoryProvider::default());
        let metrics = Arc::new(ReconcileMetrics::new().unwrap());
        let mut snapshot = snapshot();
        snapshot.provider_config.api.endpoint = "203.0.113.10".into();
        let master = reconciler(
            &snapshot,
            "master",
            session(provider.clone()).with_metrics(metrics.clone()),
        );

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        let actual = master.observe(&snapshot).await.unwrap();
        let start = Instant::now();
        let deleted = master
            .destroy(&actual.resource, &actual.snapshot)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(provider.list_by_tag("master").await.unwrap().is_empty());
        assert_eq!(metrics.deleted("master"), 1);
        assert_eq!(deleted.snapshot.provider_config.api.endpoint, "");
        assert_eq!(deleted.resource.name, "master");
        assert_eq!(deleted.resource.count, 1);
        assert_eq!(deleted.resource.size, "s-2vcpu");
        assert_eq!(deleted.resource.cloud_id, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_tolerates_stale_count() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        // Listing keeps returning one instance while three are expected
        let mut actual = master.observe(&snapshot).await.unwrap().resource;
        actual.count = 3;
        let start = Instant::now();
        master.destroy(&actual, &snapshot).await.unwrap();

        // Initial listing plus four re-queries, one interval apart
        assert_eq!(provider.list_calls("master"), 2 + 1 + 4);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(provider.list_by_tag("master").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_polls_new_instances_before_delete() {
        let provider = Arc::new(InMemoryProvider::new(InMemoryProviderConfig {
            boot_polls: 2,
            ..Default::default()
        }));
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();
        let id = provider.list_by_tag("master").await.unwrap()[0].id.clone();

        let actual = master.observe(&snapshot).await.unwrap().resource;
        provider.clear_calls();
        let start = Instant::now();
        master.destroy(&actual, &snapshot).await.unwrap();

        // Two polls still report "new", the third reports active
        assert_eq!(
            provider.calls(),
            vec![
                ProviderCall::ListByTag("master".into()),
                ProviderCall::Get(id.clone()),
                ProviderCall::Get(id.clone()),
                ProviderCall::Get(id.clone()),
                ProviderCall::Delete(id),
            ]
        );
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_deletes_after_status_bound() {
        let provider = Arc::new(InMemoryProvider::new(InMemoryProviderConfig {
            boot_polls: 100,
            ..Default::default()
        }));
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();

        let actual = master.observe(&snapshot).await.unwrap().resource;
        provider.clear_calls();
        master.destroy(&actual, &snapshot).await.unwrap();

        let gets = provider
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Get(_)))
            .count();
        assert_eq!(gets, 5);
        assert!(matches!(provider.calls().last(), Some(ProviderCall::Delete(_))));
        assert!(provider.list_by_tag("master").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_skips_vanished_instance() {
        let provider = Arc::new(InMemoryProvider::new(InMemoryProviderConfig {
            boot_polls: 100,
            ..Default::default()
        }));
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();
        let id = provider.list_by_tag("master").await.unwrap()[0].id.clone();
        let actual = master.observe(&snapshot).await.unwrap().resource;

        let remover = provider.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            remover.remove(&id).await;
        });

        provider.clear_calls();
        master.destroy(&actual, &snapshot).await.unwrap();
        assert!(!provider
            .calls()
            .iter()
            .any(|c| matches!(c, ProviderCall::Delete(_))));
    }

    #[tokio::test]
    async fn test_destroy_propagates_delete_error() {
        let provider = Arc::new(InMemoryProvider::default());
        let snapshot = snapshot();
        let master = reconciler(&snapshot, "master", session(provider.clone()));

        let observed = master.observe(&snapshot).await.unwrap();
        let planned = master.plan(&observed.snapshot).await.unwrap();
        master
            .converge(&observed.resource, &planned.resource, &planned.snapshot)
            .await
            .unwrap();
        let actual = master.observe(&snapshot).await.unwrap().resource;

        provider.fail_next_deletes(1);
        let result = master.destroy(&actual, &snapshot).await;

        assert_matches!(result, Err(Error::ProviderQuery { .. }));
        assert_eq!(provider.list_by_tag("master").await.unwrap().len(), 1);
    }
}
