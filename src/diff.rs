//! Update predicates over live vs desired resources
//!
//! Each predicate answers one question: does the live resource need an
//! update call to match the desired one? Comparisons are semantic, not
//! structural: unordered collections (locations, security groups,
//! certificate sets) compare as sets, while route order and listener
//! address order compare exactly. An auto-assign address on either side
//! matches any address of the same family at its position, so an
//! already-allocated address never causes a spurious update.

use std::collections::BTreeSet;

use crate::model::{
    Balancer, BackendGroup, BackendGroupKind, GrpcBackend, HttpBackend, HttpRouter, Listener,
    ListenerAddress, ListenerKind, RouterRef, TargetGroup, TlsHandler,
};

// =============================================================================
// Target groups
// =============================================================================

/// Whether a live target group needs an update to match the desired one
pub fn target_group_changed(live: &TargetGroup, desired: &TargetGroup) -> bool {
    let live_targets: BTreeSet<_> = live.targets.iter().collect();
    let desired_targets: BTreeSet<_> = desired.targets.iter().collect();
    live_targets != desired_targets
}

// =============================================================================
// Backend groups
// =============================================================================

/// Whether a live backend group needs an update to match the desired one
///
/// A protocol mismatch (http vs grpc payload) always counts as changed.
pub fn backend_group_changed(live: &BackendGroup, desired: &BackendGroup) -> bool {
    match (&live.kind, &desired.kind) {
        (
            BackendGroupKind::Http {
                backends: lb,
                affinity: la,
            },
            BackendGroupKind::Http {
                backends: db,
                affinity: da,
            },
        ) => la != da || http_backends_changed(lb, db),
        (
            BackendGroupKind::Grpc {
                backends: lb,
                affinity: la,
            },
            BackendGroupKind::Grpc {
                backends: db,
                affinity: da,
            },
        ) => la != da || grpc_backends_changed(lb, db),
        _ => true,
    }
}

fn http_backends_changed(live: &[HttpBackend], desired: &[HttpBackend]) -> bool {
    if live.len() != desired.len() {
        return true;
    }
    let mut live: Vec<_> = live.iter().collect();
    let mut desired: Vec<_> = desired.iter().collect();
    live.sort_by_key(|b| b.name.clone());
    desired.sort_by_key(|b| b.name.clone());
    live.iter().zip(&desired).any(|(l, d)| {
        l.name != d.name
            || l.port != d.port
            || l.target_group.name != d.target_group.name
            || l.weight != d.weight
            || l.balancing_mode != d.balancing_mode
            || l.health_checks != d.health_checks
            || l.tls != d.tls
            || l.use_http2 != d.use_http2
    })
}

fn grpc_backends_changed(live: &[GrpcBackend], desired: &[GrpcBackend]) -> bool {
    if live.len() != desired.len() {
        return true;
    }
    let mut live: Vec<_> = live.iter().collect();
    let mut desired: Vec<_> = desired.iter().collect();
    live.sort_by_key(|b| b.name.clone());
    desired.sort_by_key(|b| b.name.clone());
    live.iter().zip(&desired).any(|(l, d)| {
        l.name != d.name
            || l.port != d.port
            || l.target_group.name != d.target_group.name
            || l.weight != d.weight
            || l.balancing_mode != d.balancing_mode
            || l.health_checks != d.health_checks
            || l.tls != d.tls
    })
}

// =============================================================================
// Routers
// =============================================================================

/// Whether a live router needs an update to match the desired one
///
/// Virtual hosts compare as a set keyed by name; routes inside a host
/// compare in order because route order is match order.
pub fn router_changed(live: &HttpRouter, desired: &HttpRouter) -> bool {
    if live.virtual_hosts.len() != desired.virtual_hosts.len() {
        return true;
    }
    for vh in &desired.virtual_hosts {
        let matching = live.virtual_hosts.iter().find(|l| l.name == vh.name);
        match matching {
            Some(l) => {
                if l.authority != vh.authority || l.routes != vh.routes {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}

// =============================================================================
// Balancer
// =============================================================================

/// Whether a live balancer needs an update to match the desired one
pub fn balancer_changed(live: &Balancer, desired: &Balancer) -> bool {
    let live_locations: BTreeSet<_> = live.locations.iter().collect();
    let desired_locations: BTreeSet<_> = desired.locations.iter().collect();
    if live_locations != desired_locations {
        return true;
    }

    let live_sgs: BTreeSet<_> = live.security_group_ids.iter().collect();
    let desired_sgs: BTreeSet<_> = desired.security_group_ids.iter().collect();
    if live_sgs != desired_sgs {
        return true;
    }

    if live.log_options != desired.log_options {
        return true;
    }

    if live.listeners.len() != desired.listeners.len() {
        return true;
    }
    for listener in &desired.listeners {
        match live.listeners.iter().find(|l| l.name == listener.name) {
            Some(live_listener) => {
                if listener_changed(live_listener, listener) {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}

fn listener_changed(live: &Listener, desired: &Listener) -> bool {
    if live.endpoints.len() != desired.endpoints.len() {
        return true;
    }
    for (l, d) in live.endpoints.iter().zip(&desired.endpoints) {
        if l.ports != d.ports {
            return true;
        }
        if !addresses_match(&l.addresses, &d.addresses) {
            return true;
        }
    }

    match (&live.kind, &desired.kind) {
        (ListenerKind::Http { router: l }, ListenerKind::Http { router: d }) => {
            !router_refs_match(l, d)
        }
        (
            ListenerKind::Tls {
                default_handler: lh,
                sni_handlers: ls,
            },
            ListenerKind::Tls {
                default_handler: dh,
                sni_handlers: ds,
            },
        ) => {
            if tls_handler_changed(lh, dh) {
                return true;
            }
            if ls.len() != ds.len() {
                return true;
            }
            for sni in ds {
                match ls.iter().find(|l| l.name == sni.name) {
                    Some(l) => {
                        if l.server_names != sni.server_names
                            || tls_handler_changed(&l.handler, &sni.handler)
                        {
                            return true;
                        }
                    }
                    None => return true,
                }
            }
            false
        }
        _ => true,
    }
}

fn tls_handler_changed(live: &TlsHandler, desired: &TlsHandler) -> bool {
    let live_certs: BTreeSet<_> = live.certificate_ids.iter().collect();
    let desired_certs: BTreeSet<_> = desired.certificate_ids.iter().collect();
    live_certs != desired_certs || !router_refs_match(&live.router, &desired.router)
}

/// Router references compare by id when both sides know one, by name
/// otherwise (live resources may only report the id)
fn router_refs_match(live: &RouterRef, desired: &RouterRef) -> bool {
    if !live.id.is_empty() && !desired.id.is_empty() {
        return live.id == desired.id;
    }
    live.name == desired.name
}

/// Whether the address lists agree, compared position by position
///
/// An auto (empty) address on either side matches any address of the same
/// family at that position; two concrete addresses must be identical.
fn addresses_match(live: &[ListenerAddress], desired: &[ListenerAddress]) -> bool {
    live.len() == desired.len()
        && live.iter().zip(desired).all(|(l, d)| {
            if l.is_auto() || d.is_auto() {
                l.same_family(d)
            } else {
                l == d
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Endpoint, HealthCheck, LoadBalancingMode, Location, Route, RouteAction, RouteProtocol,
        PathMatch, Target, TargetGroupRef, VirtualHost,
    };

    fn target_group(targets: &[&str]) -> TargetGroup {
        TargetGroup {
            id: Some("tg-1".to_string()),
            name: "tg-g1".to_string(),
            folder_id: "folder".to_string(),
            targets: targets
                .iter()
                .map(|ip| Target {
                    ip_address: ip.to_string(),
                    subnet_id: None,
                })
                .collect(),
        }
    }

    fn http_backend(name: &str, port: u16) -> HttpBackend {
        HttpBackend {
            name: name.to_string(),
            port,
            target_group: TargetGroupRef::by_name("tg-g1"),
            weight: 1,
            balancing_mode: LoadBalancingMode::RoundRobin,
            health_checks: vec![HealthCheck::default_http()],
            tls: None,
            use_http2: false,
        }
    }

    fn http_group(backends: Vec<HttpBackend>) -> BackendGroup {
        BackendGroup {
            id: Some("bg-1".to_string()),
            name: "bg-g1".to_string(),
            folder_id: "folder".to_string(),
            kind: BackendGroupKind::Http {
                backends,
                affinity: None,
            },
        }
    }

    fn route(path: &str, bg: &str) -> Route {
        Route {
            name: format!("route-{}", path.len()),
            protocol: RouteProtocol::Http,
            path: PathMatch::Prefix(path.to_string()),
            action: RouteAction::Forward {
                backend_group: crate::model::BackendGroupRef::by_name(bg),
                timeout: None,
                idle_timeout: None,
                prefix_rewrite: None,
                upgrade_types: vec![],
                security_profile_id: None,
            },
        }
    }

    fn router(hosts: Vec<VirtualHost>) -> HttpRouter {
        HttpRouter {
            id: Some("rtr-1".to_string()),
            name: "rtr-g1".to_string(),
            virtual_hosts: hosts,
        }
    }

    fn vh(name: &str, routes: Vec<Route>) -> VirtualHost {
        VirtualHost {
            name: name.to_string(),
            authority: vec!["shop.example.com".to_string()],
            routes,
        }
    }

    fn balancer(locations: Vec<Location>, sgs: Vec<&str>) -> Balancer {
        Balancer {
            id: Some("alb-1".to_string()),
            name: "alb-g1".to_string(),
            folder_id: "folder".to_string(),
            network_id: "net-1".to_string(),
            locations,
            security_group_ids: sgs.iter().map(|s| s.to_string()).collect(),
            listeners: vec![],
            log_options: None,
            status: crate::model::BalancerStatus::Active,
        }
    }

    fn location(zone: &str) -> Location {
        Location {
            zone_id: zone.to_string(),
            subnet_id: format!("subnet-{}", zone),
            disable_traffic: false,
        }
    }

    #[test]
    fn identical_target_groups_do_not_change() {
        let live = target_group(&["10.0.0.1", "10.0.0.2"]);
        let desired = target_group(&["10.0.0.2", "10.0.0.1"]);
        assert!(!target_group_changed(&live, &desired));
    }

    #[test]
    fn added_target_changes_the_group() {
        let live = target_group(&["10.0.0.1"]);
        let desired = target_group(&["10.0.0.1", "10.0.0.3"]);
        assert!(target_group_changed(&live, &desired));
    }

    #[test]
    fn protocol_mismatch_always_changes_the_backend_group() {
        let live = http_group(vec![http_backend("b", 30080)]);
        let desired = BackendGroup {
            kind: BackendGroupKind::Grpc {
                backends: vec![],
                affinity: None,
            },
            ..live.clone()
        };
        assert!(backend_group_changed(&live, &desired));
    }

    #[test]
    fn equal_backend_groups_do_not_change() {
        let live = http_group(vec![http_backend("a", 30080), http_backend("b", 30081)]);
        let desired = http_group(vec![http_backend("b", 30081), http_backend("a", 30080)]);
        assert!(!backend_group_changed(&live, &desired));
    }

    #[test]
    fn backend_port_change_is_detected() {
        let live = http_group(vec![http_backend("a", 30080)]);
        let desired = http_group(vec![http_backend("a", 30090)]);
        assert!(backend_group_changed(&live, &desired));
    }

    #[test]
    fn route_order_is_significant() {
        let live = router(vec![vh("vh-0", vec![route("/a", "bg"), route("/b", "bg")])]);
        let desired = router(vec![vh("vh-0", vec![route("/b", "bg"), route("/a", "bg")])]);
        assert!(router_changed(&live, &desired));
    }

    #[test]
    fn virtual_host_order_is_not_significant() {
        let a = vh("vh-0", vec![route("/a", "bg")]);
        let b = vh("vh-1", vec![route("/b", "bg")]);
        let live = router(vec![a.clone(), b.clone()]);
        let desired = router(vec![b, a]);
        assert!(!router_changed(&live, &desired));
    }

    #[test]
    fn identical_balancers_do_not_change() {
        let live = balancer(vec![location("a"), location("b")], vec!["sg-1"]);
        let desired = balancer(vec![location("b"), location("a")], vec!["sg-1"]);
        assert!(!balancer_changed(&live, &desired));
    }

    #[test]
    fn security_group_change_is_detected() {
        let live = balancer(vec![location("a")], vec!["sg-1"]);
        let desired = balancer(vec![location("a")], vec!["sg-1", "sg-2"]);
        assert!(balancer_changed(&live, &desired));
    }

    #[test]
    fn auto_address_matches_any_concrete_address_of_the_family() {
        let listener = |addr: ListenerAddress| Listener {
            name: "http".to_string(),
            endpoints: vec![Endpoint {
                addresses: vec![addr],
                ports: vec![80],
            }],
            kind: ListenerKind::Http {
                router: RouterRef::by_name("rtr-g1"),
            },
        };

        let mut live = balancer(vec![location("a")], vec![]);
        live.listeners = vec![listener(ListenerAddress::ExternalIpv4 {
            address: "203.0.113.5".to_string(),
        })];
        let mut desired = balancer(vec![location("a")], vec![]);
        desired.listeners = vec![listener(ListenerAddress::ExternalIpv4 {
            address: String::new(),
        })];
        assert!(!balancer_changed(&live, &desired));

        // A concrete desired address must match verbatim.
        desired.listeners = vec![listener(ListenerAddress::ExternalIpv4 {
            address: "203.0.113.9".to_string(),
        })];
        assert!(balancer_changed(&live, &desired));
    }

    #[test]
    fn live_auto_address_matches_a_concrete_desired_address() {
        let listener = |addr: ListenerAddress| Listener {
            name: "http".to_string(),
            endpoints: vec![Endpoint {
                addresses: vec![addr],
                ports: vec![80],
            }],
            kind: ListenerKind::Http {
                router: RouterRef::by_name("rtr-g1"),
            },
        };

        // The cloud has not allocated the address yet; the desired side
        // already names one. Same family, no update.
        let mut live = balancer(vec![location("a")], vec![]);
        live.listeners = vec![listener(ListenerAddress::ExternalIpv4 {
            address: String::new(),
        })];
        let mut desired = balancer(vec![location("a")], vec![]);
        desired.listeners = vec![listener(ListenerAddress::ExternalIpv4 {
            address: "203.0.113.5".to_string(),
        })];
        assert!(!balancer_changed(&live, &desired));

        // A family change is never absorbed by the auto wildcard.
        desired.listeners = vec![listener(ListenerAddress::ExternalIpv6 {
            address: "2001:db8::1".to_string(),
        })];
        assert!(balancer_changed(&live, &desired));
    }

    #[test]
    fn listener_address_order_is_significant() {
        let v4 = ListenerAddress::ExternalIpv4 {
            address: "203.0.113.5".to_string(),
        };
        let v6 = ListenerAddress::ExternalIpv6 {
            address: "2001:db8::1".to_string(),
        };
        let listener = |addresses: Vec<ListenerAddress>| Listener {
            name: "http".to_string(),
            endpoints: vec![Endpoint {
                addresses,
                ports: vec![80],
            }],
            kind: ListenerKind::Http {
                router: RouterRef::by_name("rtr-g1"),
            },
        };

        let mut live = balancer(vec![location("a")], vec![]);
        live.listeners = vec![listener(vec![v4.clone(), v6.clone()])];
        let mut desired = balancer(vec![location("a")], vec![]);
        desired.listeners = vec![listener(vec![v6, v4])];
        assert!(balancer_changed(&live, &desired));
    }

    #[test]
    fn certificate_rotation_is_detected() {
        let tls_listener = |certs: Vec<&str>| Listener {
            name: "tls".to_string(),
            endpoints: vec![Endpoint {
                addresses: vec![],
                ports: vec![443],
            }],
            kind: ListenerKind::Tls {
                default_handler: TlsHandler {
                    certificate_ids: certs.iter().map(|c| c.to_string()).collect(),
                    router: RouterRef::by_name("rtr-tls-g1"),
                },
                sni_handlers: vec![],
            },
        };

        let mut live = balancer(vec![location("a")], vec![]);
        live.listeners = vec![tls_listener(vec!["cert-old"])];
        let mut desired = balancer(vec![location("a")], vec![]);
        desired.listeners = vec![tls_listener(vec!["cert-new"])];
        assert!(balancer_changed(&live, &desired));
    }

    #[test]
    fn router_refs_compare_by_id_when_known() {
        let live = RouterRef {
            name: String::new(),
            id: "r-1".to_string(),
        };
        let desired = RouterRef {
            name: "rtr-g1".to_string(),
            id: "r-1".to_string(),
        };
        assert!(router_refs_match(&live, &desired));

        let desired_unresolved = RouterRef::by_name("rtr-g1");
        let live_named = RouterRef {
            name: "rtr-g1".to_string(),
            id: "r-2".to_string(),
        };
        assert!(router_refs_match(&live_named, &desired_unresolved));
    }
}
