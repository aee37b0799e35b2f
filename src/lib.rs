//! Kubernetes operator reconciling Ingress groups into cloud application
//! load balancers.
//!
//! Ingress objects sharing a group annotation form one logical group; each
//! group maps to one Balancer plus its HttpRouters, BackendGroups and
//! TargetGroups in the cloud. The operator builds the desired graph from
//! the group's annotations on every pass, diffs it against the live state
//! found by deterministic name, and converges in dependency order.

/// Annotation keys and parsing helpers
pub mod annotations;
/// Resource Graph Builder: Ingress group -> desired cloud graph
pub mod builder;
/// Remote cloud repository contract
pub mod cloud;
/// Operator wiring: watch loop, reconcile entry point, error policy
pub mod controller;
/// IngressGroupStatus custom resource
pub mod crd;
/// Update predicates per resource kind
pub mod diff;
/// Error types and retry classification
pub mod error;
/// Kubernetes Event recording
pub mod events;
/// Ingress group assembly and cluster input loading
pub mod group;
/// Typed cloud resource model
pub mod model;
/// Deterministic resource naming
pub mod naming;
/// Dependency-ordered reconciliation and garbage collection
pub mod reconcile;
/// Per-group pass serialization with trigger coalescing
pub mod scheduler;
/// Status record projection
pub mod status;

pub use error::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;
