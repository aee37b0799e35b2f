//! Error types for the ALB operator
//!
//! Errors carry structured fields to aid debugging in production, and the
//! retryability split is the contract boundary between the reconciliation
//! core and its callers: recoverable conditions (a cloud operation still in
//! flight, a dependency not yet ready) are requeued on a fixed interval,
//! while configuration errors propagate to the user and wait for a spec
//! change.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for ALB operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or conflicting declarative configuration
    ///
    /// Not retryable: requires the user to fix the offending Ingress.
    #[error("configuration error for group {group}: {message}")]
    Configuration {
        /// Ingress group tag the bad configuration belongs to
        group: String,
        /// Description of what's invalid
        message: String,
        /// The offending Ingress (namespace/name), if known
        ingress: Option<String>,
    },

    /// A cloud async operation is still running
    ///
    /// The owning resource is immutable until the operation finishes, so the
    /// pass stops here and retries after the fixed requeue interval.
    #[error("operation {operation_id} on {kind} {name} has not completed")]
    OperationIncomplete {
        /// Cloud operation identifier
        operation_id: String,
        /// Resource kind the operation mutates
        kind: &'static str,
        /// Resource name the operation mutates
        name: String,
    },

    /// A dependency the desired graph needs does not yet exist remotely,
    /// or a live resource is in a state that forbids mutation
    #[error("{kind} {name} is not ready: {message}")]
    NotReady {
        /// Resource kind that is not ready
        kind: &'static str,
        /// Resource name that is not ready
        name: String,
        /// Description of what is missing
        message: String,
    },

    /// Cloud API error (network, permission, unexpected response)
    ///
    /// Fatal for this pass; a future pass may succeed.
    #[error("cloud api error on {kind} {name}: {message}")]
    CloudApi {
        /// Resource kind the call was about
        kind: &'static str,
        /// Resource name the call was about
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "builder")
        context: String,
    },
}

impl Error {
    /// Create a configuration error without group context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            group: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            ingress: None,
        }
    }

    /// Create a configuration error with group context
    pub fn configuration_for(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            group: group.into(),
            message: msg.into(),
            ingress: None,
        }
    }

    /// Create a configuration error naming the offending Ingress
    pub fn configuration_for_ingress(
        group: impl Into<String>,
        ingress: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            group: group.into(),
            message: msg.into(),
            ingress: Some(ingress.into()),
        }
    }

    /// Create an operation-incomplete error for a pending cloud operation
    pub fn operation_incomplete(
        operation_id: impl Into<String>,
        kind: &'static str,
        name: impl Into<String>,
    ) -> Self {
        Self::OperationIncomplete {
            operation_id: operation_id.into(),
            kind,
            name: name.into(),
        }
    }

    /// Create a not-ready error for a missing or unmodifiable dependency
    pub fn not_ready(kind: &'static str, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotReady {
            kind,
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a cloud API error with resource kind and name context
    pub fn cloud_api_for(
        kind: &'static str,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::CloudApi {
            kind,
            name: name.into(),
            message: msg.into(),
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
    /// Pending operations and missing dependencies resolve on their own and
    /// are requeued. Configuration errors require a spec fix and are not
    /// retried (a corrected Ingress naturally triggers a fresh pass). Cloud
    /// API errors abort the pass but a later pass may succeed, so they are
    /// requeued as well. Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry transient K8s errors, not 4xx client errors
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Configuration { .. } => false,
            Error::OperationIncomplete { .. } => true,
            Error::NotReady { .. } => true,
            Error::CloudApi { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for the recoverable conditions of the reconciliation contract
    /// (operation in flight, dependency not ready) as opposed to errors that
    /// merely happen to be worth retrying.
    pub fn is_recoverable_condition(&self) -> bool {
        matches!(
            self,
            Error::OperationIncomplete { .. } | Error::NotReady { .. }
        )
    }

    /// Get the group tag if this error is associated with a specific group
    pub fn group(&self) -> Option<&str> {
        match self {
            Error::Configuration { group, .. } => Some(group),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: annotation validation catches misconfigurations before any
    /// cloud call is made, with enough context to find the bad Ingress.
    #[test]
    fn story_configuration_errors_name_the_offender() {
        let err = Error::configuration_for("prod-gw", "unknown balancing mode 'fastest'");
        assert!(err.to_string().contains("prod-gw"));
        assert!(err.to_string().contains("fastest"));
        assert_eq!(err.group(), Some("prod-gw"));
        assert!(!err.is_retryable());

        let err = Error::configuration_for_ingress(
            "prod-gw",
            "default/shop",
            "more than one session affinity kind",
        );
        match &err {
            Error::Configuration { ingress, .. } => {
                assert_eq!(ingress.as_deref(), Some("default/shop"));
            }
            _ => panic!("Expected Configuration variant"),
        }
    }

    /// Story: an in-flight cloud operation stops the pass but is requeued,
    /// never surfaced as a user-visible failure.
    #[test]
    fn story_pending_operation_is_recoverable() {
        let err = Error::operation_incomplete("op-123", "BackendGroup", "bg-prod-gw-abcd");
        assert!(err.is_retryable());
        assert!(err.is_recoverable_condition());
        assert!(err.to_string().contains("op-123"));
        assert!(err.to_string().contains("bg-prod-gw-abcd"));
    }

    /// Story: a route referencing a backend group that exists neither in the
    /// graph nor remotely waits for the dependency instead of failing.
    #[test]
    fn story_missing_dependency_is_recoverable() {
        let err = Error::not_ready("BackendGroup", "bg-x", "not found in graph or cloud");
        assert!(err.is_retryable());
        assert!(err.is_recoverable_condition());
    }

    /// Story: cloud API failures retry on a later pass but are not part of
    /// the recoverable-condition contract.
    #[test]
    fn story_cloud_api_errors_retry_but_are_not_conditions() {
        let err = Error::cloud_api_for("Balancer", "alb-prod-gw", "permission denied");
        assert!(err.is_retryable());
        assert!(!err.is_recoverable_condition());
        assert!(err.to_string().contains("Balancer"));
        assert!(err.to_string().contains("alb-prod-gw"));
    }

    #[test]
    fn internal_errors_are_retryable() {
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[reconciler]"));
    }

    #[test]
    fn configuration_default_group_is_unknown() {
        match Error::configuration("oops") {
            Error::Configuration { group, .. } => assert_eq!(group, UNKNOWN_CONTEXT),
            _ => panic!("Expected Configuration variant"),
        }
    }
}
