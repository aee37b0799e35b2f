//! Annotation vocabulary for Ingress objects
//!
//! All operator behavior beyond the core Ingress spec is driven by
//! annotations under the `alb.cloud.io/` prefix. This module holds the
//! keys and the typed accessors the builder uses; semantic validation
//! (conflicts, unknown enum tokens) lives in `builder::options`.

use std::time::Duration;

use k8s_openapi::api::networking::v1::Ingress;

/// Group tag: Ingresses sharing this value reconcile as one unit
pub const GROUP_NAME: &str = "alb.cloud.io/group-name";
/// Numeric ordering inside a group (lower first, default 0)
pub const GROUP_ORDER: &str = "alb.cloud.io/group-order";

/// Comma-separated subnet ids the balancer is placed in
pub const SUBNETS: &str = "alb.cloud.io/subnets";
/// Comma-separated security group ids
pub const SECURITY_GROUPS: &str = "alb.cloud.io/security-groups";
/// Concrete external IPv4 listener address, or `auto`
pub const EXTERNAL_IPV4_ADDRESS: &str = "alb.cloud.io/external-ipv4-address";
/// Concrete internal IPv4 listener address, or `auto`
pub const INTERNAL_IPV4_ADDRESS: &str = "alb.cloud.io/internal-ipv4-address";
/// Subnet an internal listener address is allocated from
pub const INTERNAL_ADDRESS_SUBNET: &str = "alb.cloud.io/internal-alb-subnet";

/// Overall request timeout for routes of this Ingress (e.g. "30s")
pub const REQUEST_TIMEOUT: &str = "alb.cloud.io/request-timeout";
/// Idle timeout for routes of this Ingress
pub const IDLE_TIMEOUT: &str = "alb.cloud.io/idle-timeout";
/// Rewrite the matched path prefix before forwarding
pub const PREFIX_REWRITE: &str = "alb.cloud.io/prefix-rewrite";
/// Comma-separated protocol upgrades to allow (e.g. "websocket")
pub const UPGRADE_TYPES: &str = "alb.cloud.io/upgrade-types";
/// Security profile applied to routes of this Ingress
pub const SECURITY_PROFILE_ID: &str = "alb.cloud.io/security-profile-id";
/// Treat path values of this Ingress as regular expressions
pub const USE_REGEX: &str = "alb.cloud.io/use-regex";

/// Backend protocol: `http`, `http2` or `grpc` (default `http`)
pub const PROTOCOL: &str = "alb.cloud.io/protocol";
/// Load balancing mode token, validated against a fixed enumeration
pub const BALANCING_MODE: &str = "alb.cloud.io/balancing-mode";
/// Enable TLS towards the backends (`tls`)
pub const TRANSPORT_SECURITY: &str = "alb.cloud.io/transport-security";
/// Session affinity on a request header (value = header name)
pub const AFFINITY_HEADER: &str = "alb.cloud.io/session-affinity-header";
/// Session affinity on a cookie (`name=<cookie>[,ttl=<duration>]`)
pub const AFFINITY_COOKIE: &str = "alb.cloud.io/session-affinity-cookie";
/// Session affinity on connection properties (`source-ip=true`)
pub const AFFINITY_CONNECTION: &str = "alb.cloud.io/session-affinity-connection";
/// Health check override (`port=<n>,http-path=<p>[,timeout=..][,interval=..]`)
pub const HEALTH_CHECKS: &str = "alb.cloud.io/health-checks";

/// Fetch a raw annotation value from an Ingress
pub fn get<'a>(ingress: &'a Ingress, key: &str) -> Option<&'a str> {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Fetch an annotation and split it on commas, trimming whitespace
pub fn get_list(ingress: &Ingress, key: &str) -> Option<Vec<String>> {
    get(ingress, key).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// The `namespace/name` of an Ingress for error context
pub fn ingress_id(ingress: &Ingress) -> String {
    format!(
        "{}/{}",
        ingress.metadata.namespace.as_deref().unwrap_or_default(),
        ingress.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Parse a duration like `250ms`, `30s`, `5m` or `1h`
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit", value))?;
    let (num, unit) = value.split_at(split);
    let num: u64 = num
        .parse()
        .map_err(|_| format!("duration '{}' has an invalid number", value))?;
    let seconds = |factor: u64| {
        num.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is out of range", value))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => seconds(60),
        "h" => seconds(3600),
        other => Err(format!("duration unit '{}' is not supported", other)),
    }
}

/// Parse a `key=value,key=value` annotation into pairs, preserving order
pub fn parse_kv_pairs(value: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (k, v) = part
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", part))?;
        pairs.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok(pairs)
}
