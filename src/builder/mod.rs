//! Resource graph builder
//!
//! Turns one loaded Ingress group into a [`DesiredState`] graph. The pass
//! is pure apart from read-only cloud lookups (subnet resolution and
//! pre-existing target group ids); it never writes to the remote API.
//! Folding walks group members in their deterministic order, so the same
//! inputs always yield the same graph.
//!
//! Hosts named by a TLS section get their routes on the TLS router; plain
//! HTTP traffic to those hosts gets an implicit redirect to HTTPS, except
//! for gRPC routes, which only exist on the TLS side.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress};
use tracing::debug;

use crate::annotations::ingress_id;
use crate::cloud::{SubnetResolver, TargetGroupFinder};
use crate::group::GroupInputs;
use crate::model::{
    Balancer, BalancerStatus, BackendGroupRef, DesiredState, Endpoint, HttpRouter, Listener,
    ListenerKind, LogOptions, PathMatch, RouteAction, RouteProtocol, RouterRef, SniHandler,
    TlsHandler,
};
use crate::naming::ResourceNames;
use crate::{Error, Result};

pub mod addresses;
pub mod backends;
pub mod options;
pub mod virtual_hosts;

use addresses::AddressFold;
use backends::BackendGroupAssembler;
use options::{resolve_backend_options, resolve_route_options, BackendProtocol, RouteOptions};
use virtual_hosts::VirtualHostFold;

/// Listener port for plain HTTP traffic
const HTTP_PORT: u16 = 80;
/// Listener port for TLS traffic
const TLS_PORT: u16 = 443;

/// Ordinal counters for display names, reset for every building pass
#[derive(Debug, Default)]
pub struct OrdinalCounters {
    virtual_hosts: usize,
    routes: usize,
}

impl OrdinalCounters {
    /// Next virtual host ordinal
    pub fn next_virtual_host(&mut self) -> usize {
        let n = self.virtual_hosts;
        self.virtual_hosts += 1;
        n
    }

    /// Next route ordinal
    pub fn next_route(&mut self) -> usize {
        let n = self.routes;
        self.routes += 1;
        n
    }
}

/// Static configuration for the graph builder
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// Cloud folder all resources are created in
    pub folder_id: String,
    /// Cluster-unique name prefix
    pub cluster_prefix: String,
    /// Default access-log group; `None` disables explicit log options
    pub default_log_group_id: Option<String>,
}

/// Builds the desired resource graph for one group
pub struct GraphBuilder<'a> {
    config: &'a BuilderConfig,
    subnets: &'a dyn SubnetResolver,
    target_groups: &'a dyn TargetGroupFinder,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        config: &'a BuilderConfig,
        subnets: &'a dyn SubnetResolver,
        target_groups: &'a dyn TargetGroupFinder,
    ) -> Self {
        Self {
            config,
            subnets,
            target_groups,
        }
    }

    /// Build the desired graph for one loaded group
    pub async fn build(&self, inputs: &GroupInputs) -> Result<DesiredState> {
        let tag = inputs.group.tag.clone();
        let names = ResourceNames::new(tag.clone(), self.config.cluster_prefix.clone());
        let mut counters = OrdinalCounters::default();

        let mut address_fold = AddressFold::new(&tag);
        for ing in &inputs.group.items {
            address_fold.fold(ing)?;
        }
        let placement = address_fold.finish(self.subnets).await?;

        let tls_hosts = collect_tls_hosts(&inputs.group.items);

        let mut assembler = BackendGroupAssembler::new(
            &tag,
            &self.config.folder_id,
            &names,
            &inputs.services,
            &inputs.node_targets,
        );
        let mut plain_fold = VirtualHostFold::new(&names);
        let mut tls_fold = VirtualHostFold::new(&names);

        for ing in &inputs.group.items {
            let route_opts = resolve_route_options(&tag, ing)?;
            let backend_opts = resolve_backend_options(&tag, ing)?;
            let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();

            let spec = match &ing.spec {
                Some(spec) => spec,
                None => continue,
            };

            if let Some(default) = &spec.default_backend {
                let action = backend_action(
                    &tag,
                    ing,
                    namespace,
                    default,
                    &backend_opts,
                    &route_opts,
                    &mut assembler,
                )?;
                let protocol = route_protocol(&backend_opts);
                plain_fold.add_forward(
                    &mut counters,
                    "*",
                    protocol,
                    PathMatch::Prefix("/".to_string()),
                    action,
                );
            }

            for rule in spec.rules.as_deref().unwrap_or_default() {
                let host = rule.host.as_deref().unwrap_or("*");
                let paths = match &rule.http {
                    Some(http) => &http.paths,
                    None => continue,
                };
                for path in paths {
                    let path_match = resolve_path(&tag, ing, path, &route_opts)?;
                    let action = backend_action(
                        &tag,
                        ing,
                        namespace,
                        &path.backend,
                        &backend_opts,
                        &route_opts,
                        &mut assembler,
                    )?;
                    let protocol = route_protocol(&backend_opts);

                    if tls_hosts.contains_key(host) {
                        tls_fold.add_forward(
                            &mut counters,
                            host,
                            protocol,
                            path_match.clone(),
                            action,
                        );
                        // gRPC has no cleartext variant to redirect from.
                        if protocol != RouteProtocol::Grpc {
                            plain_fold.add_non_forward(
                                &mut counters,
                                host,
                                protocol,
                                path_match,
                                https_redirect(),
                            );
                        }
                    } else {
                        plain_fold.add_forward(&mut counters, host, protocol, path_match, action);
                    }
                }
            }
        }

        let (mut backend_groups, mut target_groups) = assembler.finish();
        backend_groups.sort_by(|a, b| a.name.cmp(&b.name));
        target_groups.sort_by(|a, b| a.name.cmp(&b.name));

        // Pre-existing target groups keep their ids so the reconciler can
        // go straight to an update.
        for tg in &mut target_groups {
            tg.id = self.target_groups.find_target_group_id(&tg.name).await?;
        }

        let router = (!plain_fold.is_empty()).then(|| HttpRouter {
            id: None,
            name: names.router(),
            virtual_hosts: plain_fold.finish(),
        });
        let tls_router = (!tls_fold.is_empty()).then(|| HttpRouter {
            id: None,
            name: names.tls_router(),
            virtual_hosts: tls_fold.finish(),
        });

        let mut listeners = Vec::new();
        if router.is_some() {
            listeners.push(Listener {
                name: "http".to_string(),
                endpoints: vec![Endpoint {
                    addresses: placement.addresses.clone(),
                    ports: vec![HTTP_PORT],
                }],
                kind: ListenerKind::Http {
                    router: RouterRef::by_name(names.router()),
                },
            });
        }
        if let Some(tls) = &tls_router {
            let handlers = tls_handlers(&tls_hosts, &tls.name, &tag)?;
            listeners.push(Listener {
                name: "tls".to_string(),
                endpoints: vec![Endpoint {
                    addresses: placement.addresses.clone(),
                    ports: vec![TLS_PORT],
                }],
                kind: ListenerKind::Tls {
                    default_handler: handlers.default_handler,
                    sni_handlers: handlers.sni_handlers,
                },
            });
        }

        let balancer = Balancer {
            id: None,
            name: names.balancer(),
            folder_id: self.config.folder_id.clone(),
            network_id: placement.network_id,
            locations: placement.locations,
            security_group_ids: placement.security_group_ids,
            listeners,
            log_options: self
                .config
                .default_log_group_id
                .clone()
                .map(|log_group_id| LogOptions {
                    log_group_id: Some(log_group_id),
                    disable: false,
                }),
            status: BalancerStatus::Unknown,
        };

        let graph = DesiredState {
            tag: tag.clone(),
            balancer,
            router,
            tls_router,
            backend_groups,
            target_groups,
        };

        debug!(
            tag = %tag,
            routes = graph.route_count(),
            backend_groups = graph.backend_groups.len(),
            target_groups = graph.target_groups.len(),
            "built desired graph"
        );

        Ok(graph)
    }

}

/// Resolve one declarative backend into a forwarding action
///
/// A service backend goes through NodePort resolution; a resource backend
/// of kind `BackendGroup` references a pre-existing remote group by name
/// and stays unresolved until reconciliation. Anything else is a fatal
/// configuration error.
#[allow(clippy::too_many_arguments)]
fn backend_action(
    tag: &str,
    ing: &Ingress,
    namespace: &str,
    backend: &k8s_openapi::api::networking::v1::IngressBackend,
    backend_opts: &options::BackendOptions,
    route_opts: &RouteOptions,
    assembler: &mut BackendGroupAssembler<'_>,
) -> Result<RouteAction> {
    if let Some(svc) = &backend.service {
        let bg = assembler.add_backend(ing, namespace, svc, backend_opts)?;
        return Ok(forward_action(bg, route_opts));
    }
    if let Some(resource) = &backend.resource {
        if resource.kind == "BackendGroup" {
            return Ok(forward_action(
                BackendGroupRef::by_name(resource.name.clone()),
                route_opts,
            ));
        }
        return Err(Error::configuration_for_ingress(
            tag,
            ingress_id(ing),
            format!("unsupported backend resource kind '{}'", resource.kind),
        ));
    }
    Err(Error::configuration_for_ingress(
        tag,
        ingress_id(ing),
        "backend names neither a service nor a backend group",
    ))
}

/// TLS handlers derived from the collected per-host certificates
struct TlsHandlers {
    default_handler: TlsHandler,
    sni_handlers: Vec<SniHandler>,
}

fn tls_handlers(
    tls_hosts: &BTreeMap<String, Vec<String>>,
    router_name: &str,
    tag: &str,
) -> Result<TlsHandlers> {
    let mut iter = tls_hosts.iter();
    let (_, first_certs) = iter.next().ok_or_else(|| {
        Error::configuration_for(tag, "TLS routes exist but no TLS section names a certificate")
    })?;

    let default_handler = TlsHandler {
        certificate_ids: first_certs.clone(),
        router: RouterRef::by_name(router_name),
    };
    let sni_handlers = tls_hosts
        .iter()
        .map(|(host, certs)| SniHandler {
            name: format!("sni-{}", host),
            server_names: vec![host.clone()],
            handler: TlsHandler {
                certificate_ids: certs.clone(),
                router: RouterRef::by_name(router_name),
            },
        })
        .collect();

    Ok(TlsHandlers {
        default_handler,
        sni_handlers,
    })
}

/// Collect host -> certificate ids from the members' TLS sections
///
/// The secret name doubles as the certificate id in the cloud certificate
/// store; a host listed by several members accumulates certificates in
/// first-seen order without duplicates.
fn collect_tls_hosts(items: &[Ingress]) -> BTreeMap<String, Vec<String>> {
    let mut hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for ing in items {
        let tls = match ing.spec.as_ref().and_then(|s| s.tls.as_deref()) {
            Some(tls) => tls,
            None => continue,
        };
        for section in tls {
            let cert = match section.secret_name.as_deref() {
                Some(name) => name,
                None => continue,
            };
            for host in section.hosts.as_deref().unwrap_or_default() {
                let certs = hosts.entry(host.clone()).or_default();
                if !certs.iter().any(|c| c == cert) {
                    certs.push(cert.to_string());
                }
            }
        }
    }
    hosts
}

/// Resolve a declarative path into the typed path match
///
/// Regex mode turns implementation-specific paths into regex matches;
/// combining it with a prefix-typed path is a fatal configuration error.
fn resolve_path(
    tag: &str,
    ing: &Ingress,
    path: &HTTPIngressPath,
    route_opts: &RouteOptions,
) -> Result<PathMatch> {
    let value = path.path.clone().unwrap_or_else(|| "/".to_string());
    match path.path_type.as_str() {
        "Exact" => Ok(PathMatch::Exact(value)),
        "Prefix" => {
            if route_opts.use_regex {
                return Err(Error::configuration_for_ingress(
                    tag,
                    ingress_id(ing),
                    "regex paths cannot be combined with Prefix path type",
                ));
            }
            Ok(PathMatch::Prefix(value))
        }
        _ => {
            if route_opts.use_regex {
                Ok(PathMatch::Regex(value))
            } else {
                Ok(PathMatch::Prefix(value))
            }
        }
    }
}

fn route_protocol(backend_opts: &options::BackendOptions) -> RouteProtocol {
    if backend_opts.effective_protocol() == BackendProtocol::Grpc {
        RouteProtocol::Grpc
    } else {
        RouteProtocol::Http
    }
}

fn forward_action(backend_group: BackendGroupRef, opts: &RouteOptions) -> RouteAction {
    RouteAction::Forward {
        backend_group,
        timeout: opts.timeout,
        idle_timeout: opts.idle_timeout,
        prefix_rewrite: opts.prefix_rewrite.clone(),
        upgrade_types: opts.upgrade_types.clone(),
        security_profile_id: opts.security_profile_id.clone(),
    }
}

/// The implicit cleartext-to-TLS redirect for TLS hosts
fn https_redirect() -> RouteAction {
    RouteAction::Redirect {
        replace_scheme: Some("https".to_string()),
        replace_port: Some(TLS_PORT),
        remove_query: false,
        response_code: 301,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MockSubnetResolver, MockTargetGroupFinder, Subnet};
    use crate::group::{GroupInputs, IngressGroup};
    use crate::model::Target;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule,
        IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
    };
    use std::collections::BTreeMap;

    fn config() -> BuilderConfig {
        BuilderConfig {
            folder_id: "folder-1".to_string(),
            cluster_prefix: "cluster-1".to_string(),
            default_log_group_id: None,
        }
    }

    fn subnet_resolver() -> MockSubnetResolver {
        let mut resolver = MockSubnetResolver::new();
        resolver.expect_resolve_subnet().returning(|id| {
            Ok(Subnet {
                id: id.to_string(),
                zone_id: format!("zone-{}", id),
                network_id: "net-1".to_string(),
            })
        });
        resolver
    }

    fn no_existing_target_groups() -> MockTargetGroupFinder {
        let mut finder = MockTargetGroupFinder::new();
        finder.expect_find_target_group_id().returning(|_| Ok(None));
        finder
    }

    fn node_port_service(port: i32, node_port: i32) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    node_port: Some(node_port),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service_path(path: &str, svc: &str, port: i32) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some(path.to_string()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: svc.to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(port),
                        name: None,
                    }),
                }),
                resource: None,
            },
        }
    }

    fn ingress(
        name: &str,
        annotations: &[(&str, &str)],
        rules: Vec<IngressRule>,
        tls: Option<Vec<IngressTLS>>,
    ) -> Ingress {
        let mut ing = Ingress::default();
        ing.metadata.namespace = Some("default".to_string());
        ing.metadata.name = Some(name.to_string());
        let mut ann: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ann.insert(crate::annotations::GROUP_NAME.to_string(), "g1".to_string());
        ing.metadata.annotations = Some(ann);
        ing.spec = Some(IngressSpec {
            rules: Some(rules),
            tls,
            ..Default::default()
        });
        ing
    }

    fn rule(host: &str, paths: Vec<HTTPIngressPath>) -> IngressRule {
        IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue { paths }),
        }
    }

    fn inputs(items: Vec<Ingress>, services: &[(&str, &str, Service)]) -> GroupInputs {
        GroupInputs {
            group: IngressGroup::new("g1", items, vec![]),
            services: services
                .iter()
                .map(|(ns, name, svc)| ((ns.to_string(), name.to_string()), svc.clone()))
                .collect(),
            node_targets: vec![Target {
                ip_address: "10.0.0.1".to_string(),
                subnet_id: None,
            }],
        }
    }

    #[tokio::test]
    async fn story_single_ingress_builds_the_full_graph() {
        let ing = ingress(
            "shop",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule(
                "shop.example.com",
                vec![service_path("/", "shop", 8080)],
            )],
            None,
        );
        let inputs = inputs(vec![ing], &[("default", "shop", node_port_service(8080, 30080))]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");

        assert_eq!(graph.route_count(), 1);
        assert_eq!(graph.backend_groups.len(), 1);
        assert_eq!(graph.target_groups.len(), 1);
        assert!(graph.tls_router.is_none());
        assert!(graph.unresolved_backend_group_names().is_empty());

        let router = graph.router.as_ref().expect("plain router");
        assert_eq!(router.virtual_hosts.len(), 1);
        assert_eq!(router.virtual_hosts[0].authority, vec!["shop.example.com"]);

        assert_eq!(graph.balancer.listeners.len(), 1);
        assert_eq!(graph.balancer.network_id, "net-1");
        assert_eq!(graph.balancer.locations.len(), 1);
    }

    #[tokio::test]
    async fn building_twice_yields_the_same_graph() {
        let ing = ingress(
            "shop",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule(
                "shop.example.com",
                vec![service_path("/a", "shop", 8080), service_path("/b", "shop", 8080)],
            )],
            None,
        );
        let inputs = inputs(vec![ing], &[("default", "shop", node_port_service(8080, 30080))]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let first = builder.build(&inputs).await.expect("first");
        let second = builder.build(&inputs).await.expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn tls_hosts_get_tls_routes_and_a_cleartext_redirect() {
        let ing = ingress(
            "shop",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule(
                "shop.example.com",
                vec![service_path("/", "shop", 8080)],
            )],
            Some(vec![IngressTLS {
                hosts: Some(vec!["shop.example.com".to_string()]),
                secret_name: Some("cert-shop".to_string()),
            }]),
        );
        let inputs = inputs(vec![ing], &[("default", "shop", node_port_service(8080, 30080))]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");

        let tls_router = graph.tls_router.as_ref().expect("tls router");
        assert!(tls_router.virtual_hosts[0].routes[0].action.is_forward());

        let plain = graph.router.as_ref().expect("plain router");
        match &plain.virtual_hosts[0].routes[0].action {
            RouteAction::Redirect {
                replace_scheme,
                response_code,
                ..
            } => {
                assert_eq!(replace_scheme.as_deref(), Some("https"));
                assert_eq!(*response_code, 301);
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        assert_eq!(graph.balancer.listeners.len(), 2);
        match &graph.balancer.listeners[1].kind {
            ListenerKind::Tls {
                default_handler,
                sni_handlers,
            } => {
                assert_eq!(default_handler.certificate_ids, vec!["cert-shop"]);
                assert_eq!(sni_handlers.len(), 1);
                assert_eq!(sni_handlers[0].server_names, vec!["shop.example.com"]);
            }
            other => panic!("expected tls listener, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn grpc_tls_routes_get_no_cleartext_redirect() {
        let ing = ingress(
            "api",
            &[
                (crate::annotations::SUBNETS, "subnet-a"),
                (crate::annotations::PROTOCOL, "grpc"),
            ],
            vec![rule("api.example.com", vec![service_path("/", "api", 9090)])],
            Some(vec![IngressTLS {
                hosts: Some(vec!["api.example.com".to_string()]),
                secret_name: Some("cert-api".to_string()),
            }]),
        );
        let inputs = inputs(vec![ing], &[("default", "api", node_port_service(9090, 30090))]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");

        assert!(graph.tls_router.is_some());
        assert!(graph.router.is_none());
        // Only the TLS listener exists.
        assert_eq!(graph.balancer.listeners.len(), 1);
    }

    #[tokio::test]
    async fn resource_backend_references_a_remote_group_by_name() {
        let mut path = service_path("/", "ignored", 0);
        path.backend = IngressBackend {
            service: None,
            resource: Some(
                k8s_openapi::api::core::v1::TypedLocalObjectReference {
                    api_group: Some("alb.cloud.io".to_string()),
                    kind: "BackendGroup".to_string(),
                    name: "bg-prebuilt".to_string(),
                },
            ),
        };
        let ing = ingress(
            "shop",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule("shop.example.com", vec![path])],
            None,
        );
        let inputs = inputs(vec![ing], &[]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");

        assert!(graph.backend_groups.is_empty());
        assert_eq!(
            graph.unresolved_backend_group_names(),
            vec!["bg-prebuilt"]
        );
    }

    #[tokio::test]
    async fn regex_with_prefix_path_type_is_fatal() {
        let ing = ingress(
            "shop",
            &[
                (crate::annotations::SUBNETS, "subnet-a"),
                (crate::annotations::USE_REGEX, "true"),
            ],
            vec![rule(
                "shop.example.com",
                vec![service_path("/a.*", "shop", 8080)],
            )],
            None,
        );
        let inputs = inputs(vec![ing], &[("default", "shop", node_port_service(8080, 30080))]);

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let err = builder.build(&inputs).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("regex"));
    }

    #[tokio::test]
    async fn later_member_overwrites_forward_but_not_redirect() {
        let first = ingress(
            "alpha",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule(
                "shop.example.com",
                vec![service_path("/", "shop", 8080)],
            )],
            None,
        );
        let second = ingress(
            "beta",
            &[],
            vec![rule(
                "shop.example.com",
                vec![service_path("/", "cart", 8081)],
            )],
            None,
        );
        let inputs = inputs(
            vec![first, second],
            &[
                ("default", "shop", node_port_service(8080, 30080)),
                ("default", "cart", node_port_service(8081, 30081)),
            ],
        );

        let config = config();
        let subnets = subnet_resolver();
        let finder = no_existing_target_groups();
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");

        // Both groups are assembled, but the route forwards to the later one.
        assert_eq!(graph.backend_groups.len(), 2);
        let router = graph.router.as_ref().expect("router");
        assert_eq!(router.virtual_hosts[0].routes.len(), 1);
        let expected = ResourceNames::new("g1", "cluster-1").backend_group("default", "cart", 30081);
        match &router.virtual_hosts[0].routes[0].action {
            RouteAction::Forward { backend_group, .. } => {
                assert_eq!(backend_group.name, expected);
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn pre_existing_target_group_id_is_picked_up() {
        let ing = ingress(
            "shop",
            &[(crate::annotations::SUBNETS, "subnet-a")],
            vec![rule(
                "shop.example.com",
                vec![service_path("/", "shop", 8080)],
            )],
            None,
        );
        let inputs = inputs(vec![ing], &[("default", "shop", node_port_service(8080, 30080))]);

        let config = config();
        let subnets = subnet_resolver();
        let mut finder = MockTargetGroupFinder::new();
        finder
            .expect_find_target_group_id()
            .returning(|_| Ok(Some("tg-id-1".to_string())));
        let builder = GraphBuilder::new(&config, &subnets, &finder);
        let graph = builder.build(&inputs).await.expect("graph");
        assert_eq!(graph.target_groups[0].id.as_deref(), Some("tg-id-1"));
    }
}
