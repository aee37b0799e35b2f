//! Ingress group assembly
//!
//! A group is the set of Ingress objects sharing one `group-name`
//! annotation value. Groups are recomputed on every reconciliation and
//! never persisted. Because several Ingresses may contribute overlapping
//! hosts and routes, members are ordered deterministically (explicit
//! group-order annotation, then namespace/name) so first-applicable-wins
//! folding produces the same graph on every pass.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::annotations;
use crate::model::Target;
use crate::Result;

/// One logical group of Ingress objects, deterministically ordered
#[derive(Clone, Debug, Default)]
pub struct IngressGroup {
    /// The shared group tag
    pub tag: String,
    /// Live members, in group-order-then-name order
    pub items: Vec<Ingress>,
    /// Members currently being deleted (deletion timestamp set)
    pub deleted: Vec<Ingress>,
}

impl IngressGroup {
    /// Assemble a group, sorting members into their deterministic order
    pub fn new(tag: impl Into<String>, mut items: Vec<Ingress>, deleted: Vec<Ingress>) -> Self {
        items.sort_by_key(order_key);
        Self {
            tag: tag.into(),
            items,
            deleted,
        }
    }

    /// Whether the group has no live members left
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Sort key: explicit numeric group-order annotation (default 0), then
/// namespace/name for a total order
fn order_key(ingress: &Ingress) -> (i64, String, String) {
    let order = annotations::get(ingress, annotations::GROUP_ORDER)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    (
        order,
        ingress.metadata.namespace.clone().unwrap_or_default(),
        ingress.metadata.name.clone().unwrap_or_default(),
    )
}

/// Everything the graph builder needs for one pass over a group
#[derive(Clone, Debug, Default)]
pub struct GroupInputs {
    /// The ordered Ingress group
    pub group: IngressGroup,
    /// Referenced Services, keyed by (namespace, name)
    pub services: BTreeMap<(String, String), Service>,
    /// Cluster node addresses used as network targets
    pub node_targets: Vec<Target>,
}

/// Collaborator loading one group's declarative inputs from the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressLoader: Send + Sync {
    /// Load the Ingresses tagged with `tag`, the Services they reference
    /// and the cluster's node targets
    async fn load_group(&self, tag: &str) -> Result<GroupInputs>;
}

/// Production loader backed by the Kubernetes API
pub struct KubeIngressLoader {
    client: Client,
}

impl KubeIngressLoader {
    /// Create a loader using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IngressLoader for KubeIngressLoader {
    async fn load_group(&self, tag: &str) -> Result<GroupInputs> {
        let ingresses: Api<Ingress> = Api::all(self.client.clone());
        let all = ingresses.list(&ListParams::default()).await?;

        let mut items = Vec::new();
        let mut deleted = Vec::new();
        for ing in all.items {
            if annotations::get(&ing, annotations::GROUP_NAME) != Some(tag) {
                continue;
            }
            if ing.metadata.deletion_timestamp.is_some() {
                deleted.push(ing);
            } else {
                items.push(ing);
            }
        }
        let group = IngressGroup::new(tag, items, deleted);

        let services = self.load_referenced_services(&group).await?;
        let node_targets = self.load_node_targets().await?;

        debug!(
            tag = %tag,
            ingresses = group.items.len(),
            deleted = group.deleted.len(),
            services = services.len(),
            targets = node_targets.len(),
            "loaded ingress group"
        );

        Ok(GroupInputs {
            group,
            services,
            node_targets,
        })
    }
}

impl KubeIngressLoader {
    /// Fetch every Service referenced by a backend of the group's members
    async fn load_referenced_services(
        &self,
        group: &IngressGroup,
    ) -> Result<BTreeMap<(String, String), Service>> {
        let mut services = BTreeMap::new();
        for ing in &group.items {
            let namespace = match ing.metadata.namespace.as_deref() {
                Some(ns) => ns,
                None => continue,
            };
            for name in referenced_service_names(ing) {
                let key = (namespace.to_string(), name.clone());
                if services.contains_key(&key) {
                    continue;
                }
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                match api.get_opt(&name).await? {
                    Some(svc) => {
                        services.insert(key, svc);
                    }
                    None => {
                        // Left absent; the builder reports the missing
                        // service with Ingress context.
                        warn!(namespace = %namespace, service = %name, "referenced service not found");
                    }
                }
            }
        }
        Ok(services)
    }

    /// Resolve cluster nodes into network targets (internal addresses)
    async fn load_node_targets(&self) -> Result<Vec<Target>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        let mut targets = Vec::new();
        for node in list.items {
            let addresses = node
                .status
                .as_ref()
                .and_then(|s| s.addresses.as_ref())
                .map(Vec::as_slice)
                .unwrap_or_default();
            for addr in addresses {
                if addr.type_ == "InternalIP" {
                    targets.push(Target {
                        ip_address: addr.address.clone(),
                        subnet_id: None,
                    });
                }
            }
        }
        targets.sort();
        targets.dedup();
        Ok(targets)
    }
}

/// Service names referenced by any backend of an Ingress (default backend
/// plus every rule path)
fn referenced_service_names(ingress: &Ingress) -> Vec<String> {
    let mut names = Vec::new();
    let spec = match &ingress.spec {
        Some(spec) => spec,
        None => return names,
    };
    if let Some(backend) = spec
        .default_backend
        .as_ref()
        .and_then(|b| b.service.as_ref())
    {
        names.push(backend.name.clone());
    }
    for rule in spec.rules.as_deref().unwrap_or_default() {
        let paths = match &rule.http {
            Some(http) => &http.paths,
            None => continue,
        };
        for path in paths {
            if let Some(svc) = path.backend.service.as_ref() {
                if !names.contains(&svc.name) {
                    names.push(svc.name.clone());
                }
            }
        }
    }
    names
}

/// Extract the group tag of an Ingress, if it participates in any group
pub fn group_tag(ingress: &Ingress) -> Option<String> {
    annotations::get(ingress, annotations::GROUP_NAME).map(str::to_string)
}
