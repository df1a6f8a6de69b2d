//! Cluster Facts
//!
//! Values resolved during converge that bootstrap scripts depend on.
//! Threaded explicitly into the renderer instead of being written into the
//! snapshot's free-form value map.

use crate::cluster::ClusterSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Template key for `<masterPrivateAddress>:<apiPort>`
pub const INJECTED_MASTER: &str = "INJECTEDMASTER";
/// Template key for the API port
pub const INJECTED_PORT: &str = "INJECTEDPORT";
/// Template key for the newline-escaped overlay client config
pub const INJECTED_CONF: &str = "INJECTEDCONF";

/// Addresses of the resolved master instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAddress {
    /// Public address, becomes the cluster API endpoint
    pub public: String,
    /// Private (or overlay) address nodes join through
    pub private: String,
}

/// Facts resolved for one converge call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFacts {
    pub api_port: u16,
    pub master: Option<MasterAddress>,
    /// Overlay client config with newlines escaped as `\n`
    pub overlay_config: Option<String>,
}

impl ClusterFacts {
    /// Facts known without any lookup
    pub fn for_snapshot(snapshot: &ClusterSnapshot) -> Self {
        Self {
            api_port: snapshot.provider_config.api.port,
            master: None,
            overlay_config: None,
        }
    }

    /// `<masterPrivateAddress>:<apiPort>`, once the master is resolved
    pub fn master_endpoint(&self) -> Option<String> {
        self.master
            .as_ref()
            .map(|m| format!("{}:{}", m.private, self.api_port))
    }

    /// Snapshot values merged with the injected keys, for template renderers
    pub fn template_values(&self, snapshot: &ClusterSnapshot) -> BTreeMap<String, String> {
        let mut values = snapshot.provider_config.values.clone();
        values.insert(INJECTED_PORT.to_string(), self.api_port.to_string());
        if let Some(endpoint) = self.master_endpoint() {
            values.insert(INJECTED_MASTER.to_string(), endpoint);
        }
        if let Some(config) = &self.overlay_config {
            values.insert(INJECTED_CONF.to_string(), config.clone());
        }
        values
    }
}
