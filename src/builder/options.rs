//! Per-Ingress annotation resolution
//!
//! Route and backend options are resolved once per Ingress and applied to
//! every route/backend that Ingress contributes. Backend options carry
//! their own set/unset state so that a later Ingress of the same group may
//! fill in values that are still unset; two Ingresses setting the same
//! option to different values for the same backend group is a fatal
//! configuration error.

use std::time::Duration;

use k8s_openapi::api::networking::v1::Ingress;

use crate::annotations::{self, ingress_id, parse_duration, parse_kv_pairs};
use crate::model::{HealthCheck, HealthCheckKind, LoadBalancingMode, SessionAffinity};
use crate::{Error, Result};

/// Options applied to every route contributed by one Ingress
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteOptions {
    /// Overall request timeout
    pub timeout: Option<Duration>,
    /// Idle timeout between reads/writes
    pub idle_timeout: Option<Duration>,
    /// Rewrite the matched prefix before forwarding
    pub prefix_rewrite: Option<String>,
    /// Allowed protocol upgrades
    pub upgrade_types: Vec<String>,
    /// Security profile for the routes
    pub security_profile_id: Option<String>,
    /// Treat path values as regular expressions
    pub use_regex: bool,
}

/// Resolve route options from one Ingress's annotations
pub fn resolve_route_options(tag: &str, ingress: &Ingress) -> Result<RouteOptions> {
    let mut opts = RouteOptions::default();

    if let Some(v) = annotations::get(ingress, annotations::REQUEST_TIMEOUT) {
        opts.timeout = Some(parse_annotation_duration(tag, ingress, annotations::REQUEST_TIMEOUT, v)?);
    }
    if let Some(v) = annotations::get(ingress, annotations::IDLE_TIMEOUT) {
        opts.idle_timeout =
            Some(parse_annotation_duration(tag, ingress, annotations::IDLE_TIMEOUT, v)?);
    }
    if let Some(v) = annotations::get(ingress, annotations::PREFIX_REWRITE) {
        opts.prefix_rewrite = Some(v.to_string());
    }
    if let Some(list) = annotations::get_list(ingress, annotations::UPGRADE_TYPES) {
        opts.upgrade_types = list;
    }
    if let Some(v) = annotations::get(ingress, annotations::SECURITY_PROFILE_ID) {
        opts.security_profile_id = Some(v.to_string());
    }
    if let Some(v) = annotations::get(ingress, annotations::USE_REGEX) {
        opts.use_regex = v.eq_ignore_ascii_case("true");
    }

    Ok(opts)
}

/// Backend protocol variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendProtocol {
    /// HTTP/1.1 towards backends
    Http,
    /// HTTP/2 towards backends
    Http2,
    /// gRPC towards backends
    Grpc,
}

/// Options applied to every backend contributed by one Ingress
///
/// Fields are `Option` so merging across group members can distinguish
/// "unset" from "set to the default value".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendOptions {
    /// Backend protocol; effective default HTTP/1.1
    pub protocol: Option<BackendProtocol>,
    /// Load balancing mode; effective default round robin
    pub balancing_mode: Option<LoadBalancingMode>,
    /// TLS towards backends
    pub transport_security: Option<bool>,
    /// Session affinity; the builder enforces at most one kind
    pub affinity: Option<SessionAffinity>,
    /// Health check override
    pub health_check: Option<HealthCheck>,
}

impl BackendOptions {
    /// Effective protocol with the default applied
    pub fn effective_protocol(&self) -> BackendProtocol {
        self.protocol.unwrap_or(BackendProtocol::Http)
    }

    /// Effective balancing mode with the default applied
    pub fn effective_balancing_mode(&self) -> LoadBalancingMode {
        self.balancing_mode.unwrap_or_default()
    }

    /// Whether TLS towards backends is enabled
    pub fn effective_transport_security(&self) -> bool {
        self.transport_security.unwrap_or(false)
    }

    /// Merge options from a later Ingress of the same group
    ///
    /// A later input may only set values that are previously unset; a real
    /// conflict (both set, different values) is a fatal configuration
    /// error naming the backend group.
    pub fn merge(&mut self, other: &BackendOptions, tag: &str, backend: &str) -> Result<()> {
        merge_field(&mut self.protocol, &other.protocol, tag, backend, "protocol")?;
        merge_field(
            &mut self.balancing_mode,
            &other.balancing_mode,
            tag,
            backend,
            "balancing-mode",
        )?;
        merge_field(
            &mut self.transport_security,
            &other.transport_security,
            tag,
            backend,
            "transport-security",
        )?;
        merge_field(
            &mut self.affinity,
            &other.affinity,
            tag,
            backend,
            "session-affinity",
        )?;
        merge_field(
            &mut self.health_check,
            &other.health_check,
            tag,
            backend,
            "health-checks",
        )?;
        Ok(())
    }
}

fn merge_field<T: Clone + PartialEq + std::fmt::Debug>(
    slot: &mut Option<T>,
    other: &Option<T>,
    tag: &str,
    backend: &str,
    option: &str,
) -> Result<()> {
    match (&slot, other) {
        (None, Some(v)) => {
            *slot = Some(v.clone());
            Ok(())
        }
        (Some(a), Some(b)) if a != b => Err(Error::configuration_for(
            tag,
            format!(
                "conflicting {} for backend {}: {:?} vs {:?}",
                option, backend, a, b
            ),
        )),
        _ => Ok(()),
    }
}

/// Resolve backend options from one Ingress's annotations
///
/// Fatal configuration errors: an unknown protocol or balancing-mode
/// token, more than one session-affinity kind, a malformed health-check or
/// affinity annotation.
pub fn resolve_backend_options(tag: &str, ingress: &Ingress) -> Result<BackendOptions> {
    let mut opts = BackendOptions::default();

    if let Some(v) = annotations::get(ingress, annotations::PROTOCOL) {
        opts.protocol = Some(match v.to_ascii_lowercase().as_str() {
            "http" => BackendProtocol::Http,
            "http2" => BackendProtocol::Http2,
            "grpc" => BackendProtocol::Grpc,
            other => {
                return Err(Error::configuration_for_ingress(
                    tag,
                    ingress_id(ingress),
                    format!("unknown protocol '{}'", other),
                ))
            }
        });
    }

    if let Some(v) = annotations::get(ingress, annotations::BALANCING_MODE) {
        let mode = v.parse::<LoadBalancingMode>().map_err(|e| {
            Error::configuration_for_ingress(tag, ingress_id(ingress), e)
        })?;
        opts.balancing_mode = Some(mode);
    }

    if let Some(v) = annotations::get(ingress, annotations::TRANSPORT_SECURITY) {
        if !v.eq_ignore_ascii_case("tls") {
            return Err(Error::configuration_for_ingress(
                tag,
                ingress_id(ingress),
                format!("transport-security must be 'tls', got '{}'", v),
            ));
        }
        opts.transport_security = Some(true);
    }

    opts.affinity = resolve_affinity(tag, ingress)?;

    if let Some(v) = annotations::get(ingress, annotations::HEALTH_CHECKS) {
        opts.health_check = Some(parse_health_check(tag, ingress, v)?);
    }

    Ok(opts)
}

/// Resolve session affinity, rejecting more than one kind
fn resolve_affinity(tag: &str, ingress: &Ingress) -> Result<Option<SessionAffinity>> {
    let header = annotations::get(ingress, annotations::AFFINITY_HEADER);
    let cookie = annotations::get(ingress, annotations::AFFINITY_COOKIE);
    let connection = annotations::get(ingress, annotations::AFFINITY_CONNECTION);

    let set = [header.is_some(), cookie.is_some(), connection.is_some()]
        .iter()
        .filter(|&&s| s)
        .count();
    if set > 1 {
        return Err(Error::configuration_for_ingress(
            tag,
            ingress_id(ingress),
            "at most one session-affinity kind may be specified",
        ));
    }

    if let Some(name) = header {
        return Ok(Some(SessionAffinity::Header {
            header_name: name.to_string(),
        }));
    }

    if let Some(v) = cookie {
        let pairs = parse_kv_pairs(v)
            .map_err(|e| Error::configuration_for_ingress(tag, ingress_id(ingress), e))?;
        let mut name = None;
        let mut ttl = None;
        for (k, val) in pairs {
            match k.as_str() {
                "name" => name = Some(val),
                "ttl" => {
                    ttl = Some(parse_annotation_duration(
                        tag,
                        ingress,
                        annotations::AFFINITY_COOKIE,
                        &val,
                    )?)
                }
                other => {
                    return Err(Error::configuration_for_ingress(
                        tag,
                        ingress_id(ingress),
                        format!("unknown cookie affinity key '{}'", other),
                    ))
                }
            }
        }
        let name = name.ok_or_else(|| {
            Error::configuration_for_ingress(
                tag,
                ingress_id(ingress),
                "cookie affinity requires name=<cookie>",
            )
        })?;
        return Ok(Some(SessionAffinity::Cookie { name, ttl }));
    }

    if let Some(v) = connection {
        let pairs = parse_kv_pairs(v)
            .map_err(|e| Error::configuration_for_ingress(tag, ingress_id(ingress), e))?;
        let mut source_ip = false;
        for (k, val) in pairs {
            match k.as_str() {
                "source-ip" => source_ip = val.eq_ignore_ascii_case("true"),
                other => {
                    return Err(Error::configuration_for_ingress(
                        tag,
                        ingress_id(ingress),
                        format!("unknown connection affinity key '{}'", other),
                    ))
                }
            }
        }
        return Ok(Some(SessionAffinity::Connection { source_ip }));
    }

    Ok(None)
}

/// Parse the health-check annotation into a check, starting from the
/// default template
fn parse_health_check(tag: &str, ingress: &Ingress, value: &str) -> Result<HealthCheck> {
    let pairs = parse_kv_pairs(value)
        .map_err(|e| Error::configuration_for_ingress(tag, ingress_id(ingress), e))?;

    let mut check = HealthCheck::default_http();
    for (k, v) in pairs {
        match k.as_str() {
            "port" => {
                let port = v.parse::<u16>().map_err(|_| {
                    Error::configuration_for_ingress(
                        tag,
                        ingress_id(ingress),
                        format!("invalid health check port '{}'", v),
                    )
                })?;
                check.port = Some(port);
            }
            "http-path" => {
                check.kind = HealthCheckKind::Http { path: v };
            }
            "grpc-service" => {
                check.kind = HealthCheckKind::Grpc {
                    service_name: Some(v),
                };
            }
            "timeout" => {
                check.timeout =
                    parse_annotation_duration(tag, ingress, annotations::HEALTH_CHECKS, &v)?
            }
            "interval" => {
                check.interval =
                    parse_annotation_duration(tag, ingress, annotations::HEALTH_CHECKS, &v)?
            }
            "healthy-threshold" => {
                check.healthy_threshold = parse_threshold(tag, ingress, &v)?;
            }
            "unhealthy-threshold" => {
                check.unhealthy_threshold = parse_threshold(tag, ingress, &v)?;
            }
            other => {
                return Err(Error::configuration_for_ingress(
                    tag,
                    ingress_id(ingress),
                    format!("unknown health check key '{}'", other),
                ))
            }
        }
    }
    Ok(check)
}

fn parse_threshold(tag: &str, ingress: &Ingress, v: &str) -> Result<u32> {
    v.parse::<u32>().map_err(|_| {
        Error::configuration_for_ingress(
            tag,
            ingress_id(ingress),
            format!("invalid health check threshold '{}'", v),
        )
    })
}

fn parse_annotation_duration(
    tag: &str,
    ingress: &Ingress,
    key: &str,
    value: &str,
) -> Result<Duration> {
    parse_duration(value).map_err(|e| {
        Error::configuration_for_ingress(tag, ingress_id(ingress), format!("{}: {}", key, e))
    })
}
