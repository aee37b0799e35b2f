//! Virtual host and route folding
//!
//! Routes fold into virtual hosts keyed by (host, path, path kind) in
//! member order. The fold is asymmetric: a later forward action replaces
//! whatever sits at the key, while a later redirect or direct-response is
//! silently dropped when the key is taken. Insertion order is preserved
//! end to end because route order is match order on the remote router.

use std::collections::BTreeMap;

use crate::builder::OrdinalCounters;
use crate::model::{PathMatch, Route, RouteAction, RouteProtocol, VirtualHost};
use crate::naming::ResourceNames;

/// Key identifying one route slot inside the fold
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct RouteKey {
    host: String,
    path: String,
    path_kind: &'static str,
}

impl RouteKey {
    fn new(host: &str, path: &PathMatch) -> Self {
        Self {
            host: host.to_string(),
            path: path.value().to_string(),
            path_kind: path.kind(),
        }
    }
}

/// Insertion-ordered fold of routes into virtual hosts
pub struct VirtualHostFold<'a> {
    names: &'a ResourceNames,
    hosts: Vec<VirtualHost>,
    /// host authority -> index into `hosts`
    host_index: BTreeMap<String, usize>,
    /// route key -> (host index, route index)
    route_index: BTreeMap<RouteKey, (usize, usize)>,
}

impl<'a> VirtualHostFold<'a> {
    pub fn new(names: &'a ResourceNames) -> Self {
        Self {
            names,
            hosts: Vec::new(),
            host_index: BTreeMap::new(),
            route_index: BTreeMap::new(),
        }
    }

    /// Add a forwarding route; replaces any existing action at the key
    pub fn add_forward(
        &mut self,
        counters: &mut OrdinalCounters,
        host: &str,
        protocol: RouteProtocol,
        path: PathMatch,
        action: RouteAction,
    ) {
        let key = RouteKey::new(host, &path);
        match self.route_index.get(&key) {
            Some(&(h, r)) => {
                let route = &mut self.hosts[h].routes[r];
                route.protocol = protocol;
                route.action = action;
            }
            None => self.insert(counters, key, host, protocol, path, action),
        }
    }

    /// Add a redirect or direct-response route; dropped when the key is
    /// already taken
    pub fn add_non_forward(
        &mut self,
        counters: &mut OrdinalCounters,
        host: &str,
        protocol: RouteProtocol,
        path: PathMatch,
        action: RouteAction,
    ) {
        let key = RouteKey::new(host, &path);
        if self.route_index.contains_key(&key) {
            return;
        }
        self.insert(counters, key, host, protocol, path, action);
    }

    /// Whether the fold produced any routes at all
    pub fn is_empty(&self) -> bool {
        self.route_index.is_empty()
    }

    /// The folded virtual hosts, in first-seen host order
    pub fn finish(self) -> Vec<VirtualHost> {
        self.hosts
    }

    fn insert(
        &mut self,
        counters: &mut OrdinalCounters,
        key: RouteKey,
        host: &str,
        protocol: RouteProtocol,
        path: PathMatch,
        action: RouteAction,
    ) {
        let host_idx = match self.host_index.get(host) {
            Some(&idx) => idx,
            None => {
                let idx = self.hosts.len();
                self.hosts.push(VirtualHost {
                    name: self.names.virtual_host(counters.next_virtual_host()),
                    authority: vec![host.to_string()],
                    routes: Vec::new(),
                });
                self.host_index.insert(host.to_string(), idx);
                idx
            }
        };
        let route_idx = self.hosts[host_idx].routes.len();
        self.hosts[host_idx].routes.push(Route {
            name: self.names.route(counters.next_route()),
            protocol,
            path,
            action,
        });
        self.route_index.insert(key, (host_idx, route_idx));
    }
}
