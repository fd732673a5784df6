//! Controller-specific error types.
//!
//! `ControllerError` wraps the NSX client, Kubernetes and store errors and
//! adds the domain failures raised while reconciling VPCs and subnets.
//! `is_retryable` decides whether a failure is worth another attempt.

use crate::store::StoreError;
use kube::Error as KubeError;
use nsx_client::NsxError;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the NSX VPC controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// NSX API error
    #[error("NSX error: {0}")]
    Nsx(#[from] NsxError),

    /// Local store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Namespace (or the shared target namespace) does not exist
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    /// A referenced object is missing; usually resolves once caches catch up
    #[error("{0} not found")]
    ResourceNotFound(String),

    /// Malformed NSX policy path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The namespace shares a VPC that has not been created yet
    #[error("the shared VPC is not created yet, namespace {0}")]
    SharedVpcNotReady(String),

    /// Network configuration for the namespace is not usable yet
    #[error("network not ready: {0}")]
    NetworkNotReady(String),

    /// Realization did not converge within the polling budget
    #[error("realization of {path} timed out after {attempts} attempts")]
    RealizationTimeout { path: String, attempts: u32 },

    /// NSX reported an ERROR realization state
    #[error("realization of {path} failed: {detail}")]
    RealizationFailed { path: String, detail: String },

    /// Subnets still carry ports; the owner has to be requeued
    #[error("{0}")]
    StalePort(String),

    /// SubnetSet is referenced by a SubnetConnectionBindingMap
    #[error("{0}")]
    SubnetSetInUse(String),

    /// Container inventory object of an unsupported type
    #[error("unknown resource_type: {resource_type} for external_id {external_id}")]
    UnknownResourceType {
        resource_type: String,
        external_id: String,
    },

    /// Subnet sizing or addressing failure
    #[error("subnet allocation failed: {0}")]
    Allocation(String),

    /// Deleting one NSX object (or its dependents) failed
    #[error("failed to delete {what}: {source}")]
    DeleteFailed {
        what: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Finalizer add/remove failed
    #[error("{0}")]
    Finalizer(String),

    /// Several independent operations failed
    #[error(transparent)]
    Multiple(#[from] MultiError),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics/probe server failure
    #[error("Metrics server error: {0}")]
    Metrics(String),
}

impl ControllerError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Nsx(e) => e.is_retryable(),
            ControllerError::Kube(_)
            | ControllerError::NamespaceNotFound(_)
            | ControllerError::ResourceNotFound(_)
            | ControllerError::SharedVpcNotReady(_)
            | ControllerError::NetworkNotReady(_)
            | ControllerError::RealizationTimeout { .. }
            | ControllerError::StalePort(_)
            | ControllerError::SubnetSetInUse(_) => true,
            ControllerError::Multiple(m) => m.errors.iter().any(ControllerError::is_retryable),
            ControllerError::DeleteFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wrap a failed deletion of `what`
    pub fn delete_failed(what: impl Into<String>, source: impl Into<ControllerError>) -> Self {
        ControllerError::DeleteFailed {
            what: what.into(),
            source: Box::new(source.into()),
        }
    }

    /// NSX 404 on the underlying call
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Nsx(e) if e.is_not_found())
    }
}

/// Aggregate of failures collected while processing a batch.
/// Renders as `"{context}: [err1, err2]"`.
#[derive(Debug)]
pub struct MultiError {
    pub context: String,
    pub errors: Vec<ControllerError>,
}

impl MultiError {
    pub fn new(context: impl Into<String>, errors: Vec<ControllerError>) -> Self {
        Self {
            context: context.into(),
            errors,
        }
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error
    pub fn into_result(context: impl Into<String>, errors: Vec<ControllerError>) -> Result<(), ControllerError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Multiple(Self::new(context, errors)))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.context)?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_display() {
        let err = MultiError::new(
            "multiple errors occurred while deleting Subnets",
            vec![
                ControllerError::Reconciliation("a".to_string()),
                ControllerError::InvalidPath("b".to_string()),
            ],
        );
        assert_eq!(
            err.to_string(),
            "multiple errors occurred while deleting Subnets: [Reconciliation failed: a, invalid path: b]"
        );
    }

    #[test]
    fn test_into_result_empty_is_ok() {
        assert!(MultiError::into_result("ctx", Vec::new()).is_ok());
        assert!(MultiError::into_result("ctx", vec![ControllerError::InvalidConfig("x".to_string())]).is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ControllerError::Nsx(NsxError::Connection("reset".to_string())).is_retryable());
        assert!(!ControllerError::Nsx(NsxError::api(400, "bad")).is_retryable());
        assert!(ControllerError::SharedVpcNotReady("ns".to_string()).is_retryable());
        assert!(!ControllerError::InvalidPath("x".to_string()).is_retryable());

        let mixed = ControllerError::Multiple(MultiError::new(
            "ctx",
            vec![
                ControllerError::InvalidPath("x".to_string()),
                ControllerError::Nsx(NsxError::api(503, "busy")),
            ],
        ));
        assert!(mixed.is_retryable());
    }

    #[test]
    fn test_unknown_resource_type_message() {
        let err = ControllerError::UnknownResourceType {
            resource_type: "UnknownType".to_string(),
            external_id: "some-id".to_string(),
        };
        assert_eq!(err.to_string(), "unknown resource_type: UnknownType for external_id some-id");
    }

    #[test]
    fn test_delete_failed_message() {
        let err = ControllerError::delete_failed("NSX Subnet/net1", NsxError::api(500, "locked"));
        assert!(err.to_string().starts_with("failed to delete NSX Subnet/net1: "));
        assert!(err.is_retryable());
    }
}
