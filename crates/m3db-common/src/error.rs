//! Error types for the M3DB operator
//!
//! Errors carry enough context to be actionable from logs alone: which
//! cluster they relate to and what was being attempted. `is_retryable()`
//! classifies each variant for the controllers' error policies.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// DB admin API error
    #[error("admin error for {cluster}: {message}")]
    Admin {
        /// Name of the cluster whose admin endpoint failed
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Validation error for cluster specs
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "pod-handler")
        context: String,
    },
}

impl Error {
    /// Create an admin error without cluster context
    pub fn admin(msg: impl Into<String>) -> Self {
        Self::Admin {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create an admin error with cluster context
    pub fn admin_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Admin {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (they require a
    /// spec or code fix). Admin errors are retryable: the DB endpoint may be
    /// mid-bootstrap or briefly unreachable. Kubernetes errors depend on the
    /// status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient errors (connection, timeout, conflict).
                // Don't retry on 4xx other than 409.
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Admin { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Admin { cluster, .. } => Some(cluster),
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }
}
