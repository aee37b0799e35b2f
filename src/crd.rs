//! Status record custom resource
//!
//! One cluster-scoped `IngressGroupStatus` object exists per group tag and
//! records the cloud ids the operator currently manages for that group. It
//! is a projection for humans and tooling (kubectl get), never an input:
//! reconciliation always rediscovers state by deterministic name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ids of the cloud resources managed for one Ingress group
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "alb.cloud.io",
    version = "v1alpha1",
    kind = "IngressGroupStatus",
    plural = "ingressgroupstatuses",
    shortname = "igs"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressGroupStatusSpec {
    /// Balancer id, absent while the group has no balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer_id: Option<String>,
    /// Router ids, sorted
    #[serde(default)]
    pub router_ids: Vec<String>,
    /// Backend group ids, sorted
    #[serde(default)]
    pub backend_group_ids: Vec<String>,
    /// Target group ids, sorted
    #[serde(default)]
    pub target_group_ids: Vec<String>,
    /// RFC 3339 time of the last successful projection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}
