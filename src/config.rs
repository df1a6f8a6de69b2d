//! Reconciler Configuration
//!
//! Fixed retry bounds for the locator and teardown loops, and the well-known
//! remote paths read in overlay mode. Loadable from YAML; every field has a
//! default.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry with a fixed (non-exponential) delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub attempts: u32,
    /// Delay between attempts in milliseconds
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Sleep one interval.
    ///
    /// Returns `false` without sleeping when the sleep would end past `deadline`.
    pub async fn sleep(&self, deadline: Option<Instant>) -> bool {
        let interval = self.interval();
        if let Some(deadline) = deadline {
            if Instant::now() + interval > deadline {
                return false;
            }
        }
        tokio::time::sleep(interval).await;
        true
    }
}

// =============================================================================
// Overlay Paths
// =============================================================================

/// Remote files written by the master when the overlay network is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPaths {
    /// Master's own overlay address
    pub address_file: String,
    /// Client configuration for joining the overlay
    pub client_config_file: String,
}

impl Default for OverlayPaths {
    fn default() -> Self {
        Self {
            address_file: "/tmp/.ip".to_string(),
            client_config_file: "/tmp/clients.conf".to_string(),
        }
    }
}

// =============================================================================
// Reconciler Configuration
// =============================================================================

/// Configuration shared by all reconcilers of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Polling bound while waiting for the master's address
    pub master_lookup: RetryPolicy,
    /// Re-listing bound while the tag count disagrees with the expected count
    pub delete_listing: RetryPolicy,
    /// Status polling bound for instances still initializing before deletion
    pub delete_status: RetryPolicy,
    /// Remote overlay files
    pub overlay: OverlayPaths,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            master_lookup: RetryPolicy::new(100, Duration::from_secs(5)),
            delete_listing: RetryPolicy::new(25, Duration::from_secs(5)),
            delete_status: RetryPolicy::new(25, Duration::from_secs(3)),
            overlay: OverlayPaths::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load a configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }
}
