//! Typed model of the cloud load-balancer resource graph
//!
//! These types mirror the remote resources the operator manages: the
//! balancer with its listeners and locations, HTTP routers with virtual
//! hosts and routes, backend groups (http or grpc payload), and target
//! groups. The http/grpc split and the route action variants are tagged
//! unions; all builder and predicate logic switches on the tag explicitly.
//!
//! References between resources (`RouterRef`, `BackendGroupRef`,
//! `TargetGroupRef`) carry a deterministic name plus an id that stays empty
//! until the reconciler learns the real cloud id. Objects are built first
//! with these placeholder references and patched once the parent exists,
//! which avoids modeling pointer cycles between balancer handlers and
//! routers.

use std::time::Duration;

pub mod desired;

pub use desired::DesiredState;

// =============================================================================
// Resource kinds and operations
// =============================================================================

/// Kinds of remote resources forming the dependency graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Application load balancer
    Balancer,
    /// HTTP router (virtual hosts + routes)
    HttpRouter,
    /// Backend group (http or grpc)
    BackendGroup,
    /// Target group (resolved network targets)
    TargetGroup,
}

impl ResourceKind {
    /// Stable kind string used in names, errors and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Balancer => "Balancer",
            ResourceKind::HttpRouter => "HttpRouter",
            ResourceKind::BackendGroup => "BackendGroup",
            ResourceKind::TargetGroup => "TargetGroup",
        }
    }
}

/// Asynchronous handle returned by cloud create/update/delete calls
///
/// A not-yet-done operation makes the owning resource immutable until it
/// finishes; the reconciler converts that into a retry signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    /// Cloud operation id
    pub id: String,
    /// Human-readable description from the cloud API
    pub description: String,
    /// Whether the operation has reached a terminal state
    pub done: bool,
}

impl Operation {
    /// A finished operation (create/update applied synchronously)
    pub fn done(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            done: true,
        }
    }

    /// An operation still in flight
    pub fn pending(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            done: false,
        }
    }
}

// =============================================================================
// Balancer
// =============================================================================

/// Remote status of a balancer; only `Active` allows updates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BalancerStatus {
    /// Status not reported by the cloud API
    #[default]
    Unknown,
    /// Initial provisioning in progress
    Creating,
    /// Starting up after create or stop
    Starting,
    /// Stable, mutable state
    Active,
    /// Shutting down
    Stopping,
    /// Stopped by an operator or the cloud
    Stopped,
    /// Deletion in progress
    Deleting,
}

/// Application load balancer: the root of the resource graph
#[derive(Clone, Debug, PartialEq)]
pub struct Balancer {
    /// Cloud id; `None` until the resource exists remotely
    pub id: Option<String>,
    /// Deterministic name derived from the group tag
    pub name: String,
    /// Cloud folder the balancer lives in
    pub folder_id: String,
    /// Network the balancer attaches to
    pub network_id: String,
    /// Availability zones + subnets the balancer is placed in
    pub locations: Vec<Location>,
    /// Security groups applied to the balancer
    pub security_group_ids: Vec<String>,
    /// Listeners (plain HTTP and/or TLS)
    pub listeners: Vec<Listener>,
    /// Access-log shipping options
    pub log_options: Option<LogOptions>,
    /// Remote status (meaningful on live resources only)
    pub status: BalancerStatus,
}

/// Placement of the balancer in one availability zone
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    /// Availability zone id
    pub zone_id: String,
    /// Subnet the balancer node sits in
    pub subnet_id: String,
    /// Whether traffic to this zone is disabled
    pub disable_traffic: bool,
}

/// Access-log shipping configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Destination log group; `None` uses the folder default
    pub log_group_id: Option<String>,
    /// Disable access-log shipping entirely
    pub disable: bool,
}

/// A balancer listener, either plain HTTP or TLS
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    /// Listener name, unique within the balancer
    pub name: String,
    /// Network endpoints the listener binds
    pub endpoints: Vec<Endpoint>,
    /// Protocol-specific handler
    pub kind: ListenerKind,
}

/// Addresses and ports a listener binds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Listener addresses; an empty address string means auto-assigned
    pub addresses: Vec<ListenerAddress>,
    /// Ports, order-significant
    pub ports: Vec<u16>,
}

/// A single listener address
///
/// An empty `address` requests auto-assignment from the cloud; the diff
/// engine treats an auto address as matching any concrete address of the
/// same family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerAddress {
    /// Public IPv4 address
    ExternalIpv4 {
        /// Concrete address, or empty for auto-assignment
        address: String,
    },
    /// Private IPv4 address inside a subnet
    InternalIpv4 {
        /// Concrete address, or empty for auto-assignment
        address: String,
        /// Subnet the address is allocated from
        subnet_id: String,
    },
    /// Public IPv6 address
    ExternalIpv6 {
        /// Concrete address, or empty for auto-assignment
        address: String,
    },
}

impl ListenerAddress {
    /// Whether this address is auto-assigned (no concrete value yet)
    pub fn is_auto(&self) -> bool {
        self.address().is_empty()
    }

    /// The concrete address string (possibly empty)
    pub fn address(&self) -> &str {
        match self {
            ListenerAddress::ExternalIpv4 { address }
            | ListenerAddress::InternalIpv4 { address, .. }
            | ListenerAddress::ExternalIpv6 { address } => address,
        }
    }

    /// Whether two addresses belong to the same address family
    pub fn same_family(&self, other: &ListenerAddress) -> bool {
        matches!(
            (self, other),
            (
                ListenerAddress::ExternalIpv4 { .. },
                ListenerAddress::ExternalIpv4 { .. }
            ) | (
                ListenerAddress::InternalIpv4 { .. },
                ListenerAddress::InternalIpv4 { .. }
            ) | (
                ListenerAddress::ExternalIpv6 { .. },
                ListenerAddress::ExternalIpv6 { .. }
            )
        )
    }
}

/// Protocol-specific listener handler
#[derive(Clone, Debug, PartialEq)]
pub enum ListenerKind {
    /// Plain HTTP handler forwarding to a router
    Http {
        /// Router handling all traffic on this listener
        router: RouterRef,
    },
    /// TLS handler with SNI dispatch
    Tls {
        /// Handler for connections matching no SNI entry
        default_handler: TlsHandler,
        /// Per-server-name handlers
        sni_handlers: Vec<SniHandler>,
    },
}

/// TLS termination handler: certificates plus the router behind them
#[derive(Clone, Debug, PartialEq)]
pub struct TlsHandler {
    /// Certificate ids presented on this handler
    pub certificate_ids: Vec<String>,
    /// Router receiving decrypted traffic
    pub router: RouterRef,
}

/// SNI dispatch entry on a TLS listener
#[derive(Clone, Debug, PartialEq)]
pub struct SniHandler {
    /// Handler name, unique within the listener
    pub name: String,
    /// Server names this handler matches
    pub server_names: Vec<String>,
    /// Handler used for matching connections
    pub handler: TlsHandler,
}

/// Forward reference to a router by deterministic name
///
/// `id` is empty until the reconciler back-injects the real cloud id after
/// the router has been created or found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterRef {
    /// Deterministic router name
    pub name: String,
    /// Cloud id, empty while unresolved
    pub id: String,
}

impl RouterRef {
    /// Create an unresolved reference to the named router
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
        }
    }
}

// =============================================================================
// Router, virtual hosts, routes
// =============================================================================

/// HTTP router: an ordered list of virtual hosts
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRouter {
    /// Cloud id; `None` until the resource exists remotely
    pub id: Option<String>,
    /// Deterministic name
    pub name: String,
    /// Virtual hosts in insertion order
    pub virtual_hosts: Vec<VirtualHost>,
}

/// A virtual host: authority match plus ordered routes
///
/// Route order is semantically meaningful (first match wins), so it is
/// preserved exactly as built.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualHost {
    /// Host name, unique within the router
    pub name: String,
    /// Authority (Host/:authority) values this host matches
    pub authority: Vec<String>,
    /// Routes in first-seen order
    pub routes: Vec<Route>,
}

/// Protocol of a route
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteProtocol {
    /// Plain HTTP route
    Http,
    /// gRPC route
    Grpc,
}

/// Path matching for a route
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathMatch {
    /// Exact path match
    Exact(String),
    /// Path prefix match
    Prefix(String),
    /// Regular expression match (mutually exclusive with prefix paths)
    Regex(String),
}

impl PathMatch {
    /// The raw path or pattern
    pub fn value(&self) -> &str {
        match self {
            PathMatch::Exact(p) | PathMatch::Prefix(p) | PathMatch::Regex(p) => p,
        }
    }

    /// Stable discriminator for route keys and names
    pub const fn kind(&self) -> &'static str {
        match self {
            PathMatch::Exact(_) => "exact",
            PathMatch::Prefix(_) => "prefix",
            PathMatch::Regex(_) => "regex",
        }
    }
}

/// A single route inside a virtual host
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    /// Display name (ordinal-based, stable within one pass)
    pub name: String,
    /// HTTP or gRPC
    pub protocol: RouteProtocol,
    /// Path match
    pub path: PathMatch,
    /// What to do with matching requests
    pub action: RouteAction,
}

/// Route action: forward, redirect, or answer directly
#[derive(Clone, Debug, PartialEq)]
pub enum RouteAction {
    /// Forward to a backend group
    Forward {
        /// Backend group reference, id back-injected by the reconciler
        backend_group: BackendGroupRef,
        /// Overall request timeout
        timeout: Option<Duration>,
        /// Idle timeout between reads/writes
        idle_timeout: Option<Duration>,
        /// Rewrite the matched path prefix before forwarding
        prefix_rewrite: Option<String>,
        /// Protocol upgrades to allow (e.g. "websocket")
        upgrade_types: Vec<String>,
        /// Security profile gating requests on this route
        security_profile_id: Option<String>,
    },
    /// HTTP redirect
    Redirect {
        /// Scheme to redirect to (e.g. "https")
        replace_scheme: Option<String>,
        /// Port to redirect to
        replace_port: Option<u16>,
        /// Whether to drop the query string
        remove_query: bool,
        /// Redirect status code (301, 302, ...)
        response_code: u16,
    },
    /// Fixed response without contacting any backend
    DirectResponse {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
}

impl RouteAction {
    /// Whether this action forwards to a backend group
    pub fn is_forward(&self) -> bool {
        matches!(self, RouteAction::Forward { .. })
    }
}

/// Forward reference to a backend group by deterministic name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendGroupRef {
    /// Deterministic backend group name
    pub name: String,
    /// Cloud id, empty while unresolved
    pub id: String,
}

impl BackendGroupRef {
    /// Create an unresolved reference to the named backend group
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
        }
    }
}

// =============================================================================
// Backend groups
// =============================================================================

/// Backend group: a set of backends sharing protocol and affinity
#[derive(Clone, Debug, PartialEq)]
pub struct BackendGroup {
    /// Cloud id; `None` until the resource exists remotely
    pub id: Option<String>,
    /// Deterministic name
    pub name: String,
    /// Cloud folder
    pub folder_id: String,
    /// Protocol-specific payload
    pub kind: BackendGroupKind,
}

/// Protocol-specific backend group payload
///
/// A kind mismatch between live and desired (one http, the other grpc)
/// always counts as a difference.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendGroupKind {
    /// HTTP backends
    Http {
        /// Backends, first-occurrence order
        backends: Vec<HttpBackend>,
        /// Session affinity, at most one kind
        affinity: Option<SessionAffinity>,
    },
    /// gRPC backends
    Grpc {
        /// Backends, first-occurrence order
        backends: Vec<GrpcBackend>,
        /// Session affinity, at most one kind
        affinity: Option<SessionAffinity>,
    },
}

impl BackendGroupKind {
    /// Stable discriminator string
    pub const fn protocol(&self) -> &'static str {
        match self {
            BackendGroupKind::Http { .. } => "http",
            BackendGroupKind::Grpc { .. } => "grpc",
        }
    }
}

/// An HTTP backend inside a backend group
#[derive(Clone, Debug, PartialEq)]
pub struct HttpBackend {
    /// Backend name
    pub name: String,
    /// Exposed port on the targets
    pub port: u16,
    /// Target group this backend sends traffic to
    pub target_group: TargetGroupRef,
    /// Relative traffic weight
    pub weight: i64,
    /// Load-balancing mode
    pub balancing_mode: LoadBalancingMode,
    /// Active health checks
    pub health_checks: Vec<HealthCheck>,
    /// TLS towards the backend, if any
    pub tls: Option<BackendTls>,
    /// Use HTTP/2 towards the backend
    pub use_http2: bool,
}

/// A gRPC backend inside a backend group
#[derive(Clone, Debug, PartialEq)]
pub struct GrpcBackend {
    /// Backend name
    pub name: String,
    /// Exposed port on the targets
    pub port: u16,
    /// Target group this backend sends traffic to
    pub target_group: TargetGroupRef,
    /// Relative traffic weight
    pub weight: i64,
    /// Load-balancing mode
    pub balancing_mode: LoadBalancingMode,
    /// Active health checks
    pub health_checks: Vec<HealthCheck>,
    /// TLS towards the backend, if any
    pub tls: Option<BackendTls>,
}

/// Load-balancing mode, validated against this fixed enumeration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadBalancingMode {
    /// Round robin across healthy targets
    #[default]
    RoundRobin,
    /// Uniformly random target choice
    Random,
    /// Prefer the target with fewest in-flight requests
    LeastRequest,
    /// Consistent (maglev) hashing
    MaglevHash,
}

impl std::str::FromStr for LoadBalancingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ROUND_ROBIN" => Ok(LoadBalancingMode::RoundRobin),
            "RANDOM" => Ok(LoadBalancingMode::Random),
            "LEAST_REQUEST" => Ok(LoadBalancingMode::LeastRequest),
            "MAGLEV_HASH" => Ok(LoadBalancingMode::MaglevHash),
            _ => Err(format!("unknown load balancing mode '{}'", s)),
        }
    }
}

/// Active health check configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheck {
    /// Probe timeout
    pub timeout: Duration,
    /// Interval between probes
    pub interval: Duration,
    /// Consecutive successes before marking healthy
    pub healthy_threshold: u32,
    /// Consecutive failures before marking unhealthy
    pub unhealthy_threshold: u32,
    /// Probe port override; `None` probes the backend port
    pub port: Option<u16>,
    /// Protocol-specific probe
    pub kind: HealthCheckKind,
}

impl HealthCheck {
    /// Default health check template applied when an Ingress specifies none
    pub fn default_http() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            interval: Duration::from_secs(5),
            healthy_threshold: 1,
            unhealthy_threshold: 1,
            port: None,
            kind: HealthCheckKind::Http {
                path: "/".to_string(),
            },
        }
    }
}

/// Protocol-specific health check probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthCheckKind {
    /// HTTP GET probe
    Http {
        /// Path to probe
        path: String,
    },
    /// gRPC health-checking protocol probe
    Grpc {
        /// Service name to query; `None` checks overall health
        service_name: Option<String>,
    },
}

/// Session affinity; the builder rejects more than one kind per backend group
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAffinity {
    /// Stick by request header value
    Header {
        /// Header to hash on
        header_name: String,
    },
    /// Stick by cookie
    Cookie {
        /// Cookie name
        name: String,
        /// Cookie lifetime; `None` means session cookie
        ttl: Option<Duration>,
    },
    /// Stick by connection properties
    Connection {
        /// Hash on source IP
        source_ip: bool,
    },
}

/// TLS settings towards a backend
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendTls {
    /// SNI to present to the backend
    pub sni: Option<String>,
    /// PEM bundle of trusted CAs; `None` uses system roots
    pub trusted_ca: Option<String>,
}

// =============================================================================
// Target groups
// =============================================================================

/// Forward reference to a target group by deterministic name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetGroupRef {
    /// Deterministic target group name
    pub name: String,
    /// Cloud id, empty while unresolved
    pub id: String,
}

impl TargetGroupRef {
    /// Create an unresolved reference to the named target group
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
        }
    }
}

/// Target group: the resolved network targets behind backends
#[derive(Clone, Debug, PartialEq)]
pub struct TargetGroup {
    /// Cloud id; `None` until the resource exists remotely
    pub id: Option<String>,
    /// Deterministic name
    pub name: String,
    /// Cloud folder
    pub folder_id: String,
    /// Network targets
    pub targets: Vec<Target>,
}

/// A single network target (cluster node address)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target {
    /// Target IP address
    pub ip_address: String,
    /// Subnet the target sits in, when known
    pub subnet_id: Option<String>,
}
