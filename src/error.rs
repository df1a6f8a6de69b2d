//! Error types for the pool reconciler
//!
//! Provides structured error types for the reconciliation phases,
//! the master locator, and the provider/remote adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Provider {operation} failed: {reason}")]
    ProviderQuery { operation: String, reason: String },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Found {count} instances for tag {tag}, expected exactly one")]
    Ambiguity { tag: String, count: usize },

    #[error("Master pool {pool} unavailable after {attempts} attempts")]
    MasterUnavailable { pool: String, attempts: u32 },

    #[error("Master instance {instance_id} has no private address")]
    PrivateAddressMissing { instance_id: String },

    #[error("Unknown resource kind: {kind}")]
    UnknownResourceKind { kind: String },

    // =========================================================================
    // Remote Transport Errors
    // =========================================================================
    #[error("Remote transport error: {host} - {operation}: {reason}")]
    RemoteTransport {
        host: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Bootstrap render failed: {0}")]
    Render(String),

    #[error("Resource comparison failed: {0}")]
    Comparison(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action an outer driver should take when a phase fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, the snapshot or configuration must change first
    NoRequeue,
}

impl Error {
    /// Build a provider error for a failed operation
    pub fn provider(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::ProviderQuery {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a remote transport error for a failed operation against a host
    pub fn remote(
        host: impl Into<String>,
        operation: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::RemoteTransport {
            host: host.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::ProviderQuery { .. } | Error::RemoteTransport { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Master still booting - give it a while
            Error::MasterUnavailable { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Snapshot/configuration problems - don't retry automatically
            Error::Configuration(_)
            | Error::Precondition(_)
            | Error::Ambiguity { .. }
            | Error::PrivateAddressMissing { .. }
            | Error::UnknownResourceKind { .. }
            | Error::Render(_)
            | Error::YamlParse(_)
            | Error::JsonParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ProviderQuery { .. } | Error::RemoteTransport { .. }
        )
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;
