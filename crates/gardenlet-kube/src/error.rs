//! Error types for gardenlet-kube
//!
//! The variants mirror how a failed deploy or wait is meant to be handled:
//! precondition failures are never retried, `NotReady` and `StillPresent`
//! are transient, `LastError` is what the owning controller reported, and
//! `Timeout` / `WaitFailed` are the outcomes of the status poller.

use std::time::Duration;
use thiserror::Error;

/// Result type for gardenlet-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{key} not found")]
    NotFound { key: String },

    /// Something required before deploying is missing
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Object exists but has not converged yet
    #[error("{key} is not ready yet: {reason}")]
    NotReady { key: String, reason: String },

    /// Owning controller reported an error
    #[error("{key} encountered error during reconciliation: {description}")]
    LastError {
        key: String,
        description: String,
        codes: Vec<String>,
    },

    /// Object has not disappeared yet
    #[error("{key} is still present{}", format_last_error(.last_error))]
    StillPresent {
        key: String,
        last_error: Option<String>,
    },

    /// Poll loop ran out of time
    #[error("{operation}: timed out after {timeout:?}{}", format_last_error(.last_error))]
    Timeout {
        operation: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    /// Poll loop stopped on a severe error
    #[error("{operation}: {source}")]
    WaitFailed {
        operation: String,
        #[source]
        source: Box<KubeError>,
    },

    /// GVK could not be resolved against the API server
    #[error("unknown resource type {api_version}/{kind}")]
    UnknownResourceType { api_version: String, kind: String },

    /// Desired object is malformed
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),
}

fn format_last_error(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<gardenlet_core::CoreError> for KubeError {
    fn from(e: gardenlet_core::CoreError) -> Self {
        match e {
            gardenlet_core::CoreError::InvalidConfig { message } => KubeError::Precondition(message),
            other => KubeError::InvalidObject(other.to_string()),
        }
    }
}

impl From<gardenlet_engine::EngineError> for KubeError {
    fn from(e: gardenlet_engine::EngineError) -> Self {
        let message = match &e {
            gardenlet_engine::EngineError::Template(t) => t.message.clone(),
            other => other.to_string(),
        };
        KubeError::Template(message)
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if the poller gave up because time ran out
    pub fn is_timeout(&self) -> bool {
        match self {
            KubeError::Timeout { .. } => true,
            KubeError::WaitFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Errors that may be escalated to severe once the severe threshold passed
    pub fn is_retriable(&self) -> bool {
        matches!(self, KubeError::LastError { .. })
    }

    /// Description reported by the owning controller, if any
    pub fn last_error_description(&self) -> Option<&str> {
        match self {
            KubeError::LastError { description, .. } => Some(description),
            KubeError::WaitFailed { source, .. } => source.last_error_description(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_last_error() {
        let err = KubeError::Timeout {
            operation: "waiting for Infrastructure ns/foo to be deleted".to_string(),
            timeout: Duration::from_millis(50),
            last_error: Some("Infrastructure ns/foo is still present".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out after 50ms"));
        assert!(msg.contains("is still present"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_wait_failed_delegates_predicates() {
        let err = KubeError::WaitFailed {
            operation: "waiting for DNSEntry ns/a to become ready".to_string(),
            source: Box::new(KubeError::LastError {
                key: "DNSEntry ns/a".to_string(),
                description: "zone not found".to_string(),
                codes: vec![],
            }),
        };
        assert!(!err.is_timeout());
        assert_eq!(err.last_error_description(), Some("zone not found"));
        assert!(err.to_string().contains("zone not found"));
    }

    #[test]
    fn test_not_found_predicate() {
        let err = KubeError::NotFound {
            key: "ConfigMap ns/a".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retriable());
    }
}
