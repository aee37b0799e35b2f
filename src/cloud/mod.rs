//! Remote cloud API contract
//!
//! The operator does not implement the cloud SDK; it only depends on the
//! client contract defined here. Every trait is an injection seam: the
//! production binary wires an SDK-backed implementation, tests use mockall
//! mocks. Create/update/delete calls return an optional [`Operation`]
//! handle; a not-yet-done operation makes the owning resource immutable
//! for the rest of the pass.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::model::{Balancer, BackendGroup, HttpRouter, Operation, ResourceKind, TargetGroup};
use crate::Result;

/// A resource discovered by tag lookup: just enough identity for garbage
/// collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedResource {
    /// Cloud id
    pub id: String,
    /// Deterministic name the operator gave the resource
    pub name: String,
}

/// A resolved cloud subnet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subnet {
    /// Subnet id
    pub id: String,
    /// Availability zone the subnet lives in
    pub zone_id: String,
    /// Network the subnet belongs to
    pub network_id: String,
}

/// Repository over the remote load-balancer resources
///
/// `find_*` looks a resource up by its deterministic name and returns the
/// live resource (with id and status populated) or `None`. Mutation calls
/// return `Ok(None)` when the API applied the change synchronously.
/// Implementations wrap transport failures with resource kind and name
/// context via [`crate::Error::cloud_api_for`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudRepository: Send + Sync {
    /// Find a balancer by name
    async fn find_balancer(&self, name: &str) -> Result<Option<Balancer>>;
    /// Create a balancer
    async fn create_balancer(&self, balancer: &Balancer) -> Result<Option<Operation>>;
    /// Update a balancer in place
    async fn update_balancer(&self, balancer: &Balancer) -> Result<Option<Operation>>;
    /// Delete a balancer by id
    async fn delete_balancer(&self, id: &str) -> Result<Option<Operation>>;

    /// Find an HTTP router by name
    async fn find_router(&self, name: &str) -> Result<Option<HttpRouter>>;
    /// Create an HTTP router
    async fn create_router(&self, router: &HttpRouter) -> Result<Option<Operation>>;
    /// Update an HTTP router in place
    async fn update_router(&self, router: &HttpRouter) -> Result<Option<Operation>>;
    /// Delete an HTTP router by id
    async fn delete_router(&self, id: &str) -> Result<Option<Operation>>;

    /// Find a backend group by name
    async fn find_backend_group(&self, name: &str) -> Result<Option<BackendGroup>>;
    /// Create a backend group
    async fn create_backend_group(&self, group: &BackendGroup) -> Result<Option<Operation>>;
    /// Update a backend group in place
    async fn update_backend_group(&self, group: &BackendGroup) -> Result<Option<Operation>>;
    /// Delete a backend group by id
    async fn delete_backend_group(&self, id: &str) -> Result<Option<Operation>>;

    /// Find a target group by name
    async fn find_target_group(&self, name: &str) -> Result<Option<TargetGroup>>;
    /// Create a target group
    async fn create_target_group(&self, group: &TargetGroup) -> Result<Option<Operation>>;
    /// Update a target group in place
    async fn update_target_group(&self, group: &TargetGroup) -> Result<Option<Operation>>;
    /// Delete a target group by id
    async fn delete_target_group(&self, id: &str) -> Result<Option<Operation>>;

    /// List operations still running against a live resource
    ///
    /// Called before any mutation: a non-terminal operation blocks further
    /// changes to that resource for this pass.
    async fn list_pending_operations(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Vec<Operation>>;

    /// List resources of one kind labelled with the given group tag
    ///
    /// Used by garbage collection to find remote resources with no desired
    /// counterpart.
    async fn list_tagged(&self, kind: ResourceKind, tag: &str) -> Result<Vec<TaggedResource>>;
}

/// Read-only subnet lookup used while folding listener addresses
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubnetResolver: Send + Sync {
    /// Resolve a subnet id into its zone and network
    async fn resolve_subnet(&self, id: &str) -> Result<Subnet>;
}

/// Read-only lookup for target groups that already exist remotely
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetGroupFinder: Send + Sync {
    /// Find the id of a pre-existing target group by name
    async fn find_target_group_id(&self, name: &str) -> Result<Option<String>>;
}
