//! The desired-state graph for one Ingress group
//!
//! `DesiredState` is built fresh by the graph builder on every pass and
//! owned exclusively by that pass. Its injection helpers implement the
//! forward-reference pattern: routes and listeners are built with
//! name-only references, and the reconciler patches in real cloud ids as
//! parent resources are created or found.

use std::collections::BTreeMap;

use super::{
    Balancer, BackendGroup, BackendGroupKind, HttpRouter, ListenerKind, RouteAction, TargetGroup,
};

/// The full graph of target resources for one group tag
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    /// Group tag this graph was derived from
    pub tag: String,
    /// The balancer (root of the graph)
    pub balancer: Balancer,
    /// Plain-HTTP router, if any plain route exists
    pub router: Option<HttpRouter>,
    /// TLS router, if any TLS host exists
    pub tls_router: Option<HttpRouter>,
    /// Backend groups referenced by routes
    pub backend_groups: Vec<BackendGroup>,
    /// Target groups referenced by backends
    pub target_groups: Vec<TargetGroup>,
}

impl DesiredState {
    /// Total number of routes across both routers
    ///
    /// A graph with zero routes makes an existing balancer garbage.
    pub fn route_count(&self) -> usize {
        self.routers()
            .map(|r| r.virtual_hosts.iter().map(|vh| vh.routes.len()).sum::<usize>())
            .sum()
    }

    /// Iterate over the routers present in the graph
    pub fn routers(&self) -> impl Iterator<Item = &HttpRouter> {
        self.router.iter().chain(self.tls_router.iter())
    }

    /// Iterate mutably over the routers present in the graph
    pub fn routers_mut(&mut self) -> impl Iterator<Item = &mut HttpRouter> {
        self.router.iter_mut().chain(self.tls_router.iter_mut())
    }

    /// Look up an in-graph backend group by deterministic name
    pub fn backend_group(&self, name: &str) -> Option<&BackendGroup> {
        self.backend_groups.iter().find(|bg| bg.name == name)
    }

    /// Names of backend groups referenced by Forward routes that are not
    /// present in this graph
    ///
    /// These must resolve to already-deployed remote groups; otherwise the
    /// reconciler reports a recoverable "dependency not ready" condition.
    pub fn unresolved_backend_group_names(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for router in self.routers() {
            for vh in &router.virtual_hosts {
                for route in &vh.routes {
                    if let RouteAction::Forward { backend_group, .. } = &route.action {
                        if self.backend_group(&backend_group.name).is_none()
                            && !missing.contains(&backend_group.name)
                        {
                            missing.push(backend_group.name.clone());
                        }
                    }
                }
            }
        }
        missing
    }

    /// Patch backend-group ids into every Forward action referencing them
    /// by name, returning the names that had no id in the map
    pub fn inject_backend_group_ids(&mut self, ids: &BTreeMap<String, String>) -> Vec<String> {
        let mut unresolved = Vec::new();
        for router in self.routers_mut() {
            for vh in &mut router.virtual_hosts {
                for route in &mut vh.routes {
                    if let RouteAction::Forward { backend_group, .. } = &mut route.action {
                        match ids.get(&backend_group.name) {
                            Some(id) => backend_group.id = id.clone(),
                            None if !unresolved.contains(&backend_group.name) => {
                                unresolved.push(backend_group.name.clone());
                            }
                            None => {}
                        }
                    }
                }
            }
        }
        unresolved
    }

    /// Patch target-group ids into every backend referencing them by name
    pub fn inject_target_group_ids(&mut self, ids: &BTreeMap<String, String>) {
        for bg in &mut self.backend_groups {
            match &mut bg.kind {
                BackendGroupKind::Http { backends, .. } => {
                    for b in backends {
                        if let Some(id) = ids.get(&b.target_group.name) {
                            b.target_group.id = id.clone();
                        }
                    }
                }
                BackendGroupKind::Grpc { backends, .. } => {
                    for b in backends {
                        if let Some(id) = ids.get(&b.target_group.name) {
                            b.target_group.id = id.clone();
                        }
                    }
                }
            }
        }
    }

    /// Patch the named router's cloud id into every balancer handler that
    /// references it
    pub fn inject_router_id(&mut self, router_name: &str, id: &str) {
        for listener in &mut self.balancer.listeners {
            match &mut listener.kind {
                ListenerKind::Http { router } => {
                    if router.name == router_name {
                        router.id = id.to_string();
                    }
                }
                ListenerKind::Tls {
                    default_handler,
                    sni_handlers,
                } => {
                    if default_handler.router.name == router_name {
                        default_handler.router.id = id.to_string();
                    }
                    for sni in sni_handlers {
                        if sni.handler.router.name == router_name {
                            sni.handler.router.id = id.to_string();
                        }
                    }
                }
            }
        }
    }

    /// Deterministic names of all desired graph members, used by garbage
    /// collection to spot stale remote siblings
    pub fn member_names(&self) -> Vec<String> {
        let mut names = vec![self.balancer.name.clone()];
        names.extend(self.routers().map(|r| r.name.clone()));
        names.extend(self.backend_groups.iter().map(|bg| bg.name.clone()));
        names.extend(self.target_groups.iter().map(|tg| tg.name.clone()));
        names
    }
}
