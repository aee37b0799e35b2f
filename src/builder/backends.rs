//! Backend and target group assembly
//!
//! One backend group exists per downstream service port; its name is
//! derived from (namespace, service, exposed NodePort), so an Ingress
//! referencing a port by number and another referencing the same port by
//! name land in the same group. Backends inside a group deduplicate on
//! (target group, exposed port): the first occurrence wins completely,
//! including weight, TLS and health-check settings. Backend options from
//! different group members merge with conflict detection.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressServiceBackend};

use crate::annotations::ingress_id;
use crate::builder::options::{BackendOptions, BackendProtocol};
use crate::model::{
    BackendGroup, BackendGroupKind, BackendGroupRef, BackendTls, GrpcBackend, HealthCheck,
    HealthCheckKind, HttpBackend, Target, TargetGroup, TargetGroupRef,
};
use crate::naming::ResourceNames;
use crate::{Error, Result};

/// A backend group under construction
struct PendingGroup {
    name: String,
    service: String,
    options: BackendOptions,
    /// (target group name, exposed NodePort), first occurrence wins
    entries: Vec<(String, u16)>,
}

/// Accumulates backend groups and target groups across a folding pass
pub struct BackendGroupAssembler<'a> {
    tag: &'a str,
    folder_id: &'a str,
    names: &'a ResourceNames,
    services: &'a BTreeMap<(String, String), Service>,
    node_targets: &'a [Target],
    /// Keyed by backend group name, insertion ordered
    groups: Vec<PendingGroup>,
    /// (namespace, service) pairs needing a target group
    target_groups: BTreeMap<(String, String), String>,
}

impl<'a> BackendGroupAssembler<'a> {
    pub fn new(
        tag: &'a str,
        folder_id: &'a str,
        names: &'a ResourceNames,
        services: &'a BTreeMap<(String, String), Service>,
        node_targets: &'a [Target],
    ) -> Self {
        Self {
            tag,
            folder_id,
            names,
            services,
            node_targets,
            groups: Vec::new(),
            target_groups: BTreeMap::new(),
        }
    }

    /// Register one declarative backend and return the reference routes
    /// should forward to
    ///
    /// Resolves the service port to its NodePort, creates or extends the
    /// owning backend group, and merges the contributing Ingress's backend
    /// options into it.
    pub fn add_backend(
        &mut self,
        ingress: &Ingress,
        namespace: &str,
        backend: &IngressServiceBackend,
        options: &BackendOptions,
    ) -> Result<BackendGroupRef> {
        let node_port = self.resolve_node_port(ingress, namespace, backend)?;

        let group_name = self
            .names
            .backend_group(namespace, &backend.name, node_port);
        let target_group_name = self.names.target_group(namespace, &backend.name);
        self.target_groups
            .entry((namespace.to_string(), backend.name.clone()))
            .or_insert_with(|| target_group_name.clone());

        match self.groups.iter_mut().find(|g| g.name == group_name) {
            Some(group) => {
                group.options.merge(options, self.tag, &group_name)?;
                let entry = (target_group_name, node_port);
                // First occurrence wins; a duplicate contributes nothing.
                if !group.entries.contains(&entry) {
                    group.entries.push(entry);
                }
            }
            None => {
                self.groups.push(PendingGroup {
                    name: group_name.clone(),
                    service: backend.name.clone(),
                    options: options.clone(),
                    entries: vec![(target_group_name, node_port)],
                });
            }
        }

        Ok(BackendGroupRef::by_name(group_name))
    }

    /// Resolve a declarative service port (by number or name) to the
    /// service's exposed NodePort
    fn resolve_node_port(
        &self,
        ingress: &Ingress,
        namespace: &str,
        backend: &IngressServiceBackend,
    ) -> Result<u16> {
        let key = (namespace.to_string(), backend.name.clone());
        let service = self.services.get(&key).ok_or_else(|| {
            Error::configuration_for_ingress(
                self.tag,
                ingress_id(ingress),
                format!("backend service {}/{} does not exist", namespace, backend.name),
            )
        })?;

        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_deref())
            .unwrap_or_default();

        let wanted = backend.port.as_ref();
        let matched = ports.iter().find(|p| {
            let by_number = wanted
                .and_then(|w| w.number)
                .map(|n| p.port == n)
                .unwrap_or(false);
            let by_name = wanted
                .and_then(|w| w.name.as_deref())
                .map(|n| p.name.as_deref() == Some(n))
                .unwrap_or(false);
            by_number || by_name
        });

        let port = matched.ok_or_else(|| {
            Error::configuration_for_ingress(
                self.tag,
                ingress_id(ingress),
                format!(
                    "service {}/{} exposes no matching port",
                    namespace, backend.name
                ),
            )
        })?;

        let node_port = port.node_port.ok_or_else(|| {
            Error::configuration_for_ingress(
                self.tag,
                ingress_id(ingress),
                format!(
                    "service {}/{} port {} has no NodePort; only NodePort services can back a balancer",
                    namespace, backend.name, port.port
                ),
            )
        })?;

        u16::try_from(node_port).map_err(|_| {
            Error::configuration_for_ingress(
                self.tag,
                ingress_id(ingress),
                format!("service {}/{} NodePort {} is out of range", namespace, backend.name, node_port),
            )
        })
    }

    /// Materialize the accumulated backend groups and target groups
    pub fn finish(self) -> (Vec<BackendGroup>, Vec<TargetGroup>) {
        let groups = self
            .groups
            .into_iter()
            .map(|g| build_group(self.folder_id, g))
            .collect();

        let target_groups = self
            .target_groups
            .into_values()
            .map(|name| TargetGroup {
                id: None,
                name,
                folder_id: self.folder_id.to_string(),
                targets: self.node_targets.to_vec(),
            })
            .collect();

        (groups, target_groups)
    }
}

fn build_group(folder_id: &str, pending: PendingGroup) -> BackendGroup {
    let options = &pending.options;
    let affinity = options.affinity.clone();
    let health_check = effective_health_check(options);

    let kind = match options.effective_protocol() {
        BackendProtocol::Grpc => BackendGroupKind::Grpc {
            backends: pending
                .entries
                .iter()
                .map(|(tg, port)| GrpcBackend {
                    name: backend_name(&pending.service, *port),
                    port: *port,
                    target_group: TargetGroupRef::by_name(tg.clone()),
                    weight: 1,
                    balancing_mode: options.effective_balancing_mode(),
                    health_checks: vec![health_check.clone()],
                    tls: backend_tls(options),
                })
                .collect(),
            affinity,
        },
        protocol => BackendGroupKind::Http {
            backends: pending
                .entries
                .iter()
                .map(|(tg, port)| HttpBackend {
                    name: backend_name(&pending.service, *port),
                    port: *port,
                    target_group: TargetGroupRef::by_name(tg.clone()),
                    weight: 1,
                    balancing_mode: options.effective_balancing_mode(),
                    health_checks: vec![health_check.clone()],
                    tls: backend_tls(options),
                    use_http2: protocol == BackendProtocol::Http2,
                })
                .collect(),
            affinity,
        },
    };

    BackendGroup {
        id: None,
        name: pending.name,
        folder_id: folder_id.to_string(),
        kind,
    }
}

/// Health check for a group: the annotation override, or the protocol's
/// default template
fn effective_health_check(options: &BackendOptions) -> HealthCheck {
    if let Some(check) = &options.health_check {
        return check.clone();
    }
    let mut check = HealthCheck::default_http();
    if options.effective_protocol() == BackendProtocol::Grpc {
        check.kind = HealthCheckKind::Grpc { service_name: None };
    }
    check
}

fn backend_tls(options: &BackendOptions) -> Option<BackendTls> {
    options
        .effective_transport_security()
        .then(BackendTls::default)
}

fn backend_name(service: &str, port: u16) -> String {
    format!("{}-{}", service, port)
}
