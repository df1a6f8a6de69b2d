//! Master Locator
//!
//! Bounded polling loop run by a node pool's converge to resolve the master's
//! live address, and in overlay mode the master's overlay address and client
//! config, before node instances are created.
//!
//! ```text
//! Searching ──► Found ──────────────────────────────────────────────► done
//!     ▲           │ overlay enabled
//!     │           ▼
//!     │      ConnectingRemote ─► ReadingOverlayAddress ─► ReadingOverlayConfig ─► Injected
//!     │           │                      │                         │
//!     └───────────┴──────────────────────┴─────────────────────────┘ transient failure
//! ```
//!
//! Transient conditions (listing errors, no instance yet, no public address,
//! remote connect/read failures) sleep one interval and retry. A missing
//! master pool, several master instances, a missing private address, or a
//! failed session close end the lookup immediately.

use crate::cluster::ClusterSnapshot;
use crate::domain::ports::{Instance, RemoteTarget};
use crate::error::{Error, Result};
use crate::reconciler::{MasterAddress, Session};
use tracing::{debug, info, warn};

/// Master resolved by the locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedMaster {
    pub address: MasterAddress,
    /// Newline-escaped overlay client config (overlay mode only)
    pub overlay_config: Option<String>,
}

/// Outcome of one lookup attempt that did not fail fatally
#[derive(Debug)]
enum Probe {
    Found(LocatedMaster),
    Waiting(String),
}

/// Resolves the master pool's address for dependent pools
pub struct MasterLocator<'a> {
    session: &'a Session,
}

impl<'a> MasterLocator<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Poll until the master is found, the attempt bound is exhausted, or the
    /// session deadline would be crossed.
    pub async fn locate(&self, snapshot: &ClusterSnapshot) -> Result<LocatedMaster> {
        let master = snapshot.master_pool()?;
        let policy = self.session.config.master_lookup;
        let attempts = policy.attempts.max(1);

        let mut made = 0;
        while made < attempts {
            made += 1;
            if let Some(metrics) = self.session.metrics() {
                metrics.record_lookup_attempt();
            }

            match self.probe(snapshot, &master.name).await? {
                Probe::Found(located) => {
                    info!(
                        pool = %master.name,
                        public = %located.address.public,
                        private = %located.address.private,
                        attempt = made,
                        "Resolved master address"
                    );
                    return Ok(located);
                }
                Probe::Waiting(reason) => {
                    debug!(pool = %master.name, attempt = made, reason = %reason, "Waiting for master address");
                }
            }

            if made < attempts && !policy.sleep(self.session.deadline).await {
                warn!(pool = %master.name, attempt = made, "Deadline reached while waiting for master");
                break;
            }
        }

        Err(Error::MasterUnavailable {
            pool: master.name.clone(),
            attempts: made,
        })
    }

    async fn probe(&self, snapshot: &ClusterSnapshot, tag: &str) -> Result<Probe> {
        let instances = match self.session.provider.list_by_tag(tag).await {
            Ok(instances) => instances,
            Err(e) => return Ok(Probe::Waiting(format!("listing failed: {}", e))),
        };

        let instance = match instances.as_slice() {
            [] => return Ok(Probe::Waiting("no master instance yet".into())),
            [instance] => instance,
            _ => {
                return Err(Error::Ambiguity {
                    tag: tag.to_string(),
                    count: instances.len(),
                })
            }
        };

        let Some(public) = instance.public_address() else {
            return Ok(Probe::Waiting("master has no public address yet".into()));
        };

        if snapshot.provider_config.components.overlay_network {
            return self.probe_overlay(snapshot, public).await;
        }

        let private = private_address(instance)?;
        Ok(Probe::Found(LocatedMaster {
            address: MasterAddress {
                public: public.to_string(),
                private,
            },
            overlay_config: None,
        }))
    }

    async fn probe_overlay(&self, snapshot: &ClusterSnapshot, public: &str) -> Result<Probe> {
        let remote = self.session.remote.as_ref().ok_or_else(|| {
            Error::Configuration("overlay network enabled without a remote connector".into())
        })?;
        let paths = &self.session.config.overlay;
        let target = RemoteTarget::from_ssh(public, &snapshot.provider_config.ssh);

        let mut session = match remote.connect(&target).await {
            Ok(session) => session,
            Err(e) => return Ok(Probe::Waiting(format!("remote connect failed: {}", e))),
        };

        let address = match session.read_file(&paths.address_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = session.close().await;
                return Ok(Probe::Waiting(format!("overlay address unavailable: {}", e)));
            }
        };
        let config = match session.read_file(&paths.client_config_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = session.close().await;
                return Ok(Probe::Waiting(format!("overlay config unavailable: {}", e)));
            }
        };

        let private = String::from_utf8_lossy(&address).replace('\n', "");
        let private = private.trim().to_string();
        let escaped = String::from_utf8_lossy(&config).replace('\n', "\\n");

        session.close().await?;

        if private.is_empty() {
            return Ok(Probe::Waiting("overlay address file is empty".into()));
        }

        Ok(Probe::Found(LocatedMaster {
            address: MasterAddress {
                public: public.to_string(),
                private,
            },
            overlay_config: Some(escaped),
        }))
    }
}

fn private_address(instance: &Instance) -> Result<String> {
    instance
        .private_address()
        .map(str::to_string)
        .ok_or_else(|| Error::PrivateAddressMissing {
            instance_id: instance.id.clone(),
        })
}
