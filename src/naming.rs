//! Deterministic naming for cloud resources
//!
//! The operator never persists a map from Ingress groups to cloud ids;
//! instead every resource gets a name derived purely from its kind, the
//! group tag and kind-specific discriminators, and lookup happens by name
//! on every pass. Names use a truncated SHA-256 digest of the full
//! discriminator tuple so they are stable across reconciliations and
//! processes, independent of map iteration order, and collision-resistant
//! between distinct tuples.
//!
//! `DefaultHasher` is NOT guaranteed stable across Rust releases, so the
//! digest always comes from SHA-256.

use sha2::{Digest, Sha256};

/// Hex length of the truncated digest suffix (8 bytes)
const DIGEST_LEN: usize = 16;

/// Maximum length of the sanitized tag segment inside a name
const TAG_SEGMENT_LEN: usize = 24;

/// Compute a deterministic hash of the input, returning a 16-char hex digest
pub fn deterministic_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..DIGEST_LEN / 2])
}

/// Deterministic name factory for one Ingress group
///
/// Names look like `<prefix>-<sanitized-tag>-<digest>`. The digest covers
/// the complete discriminator tuple (kind, tag, discriminators), so two
/// resources of the same kind with different discriminators never share a
/// name, while the same tuple always produces the same name.
#[derive(Clone, Debug)]
pub struct ResourceNames {
    tag: String,
    /// Cluster-unique prefix so several clusters can share a cloud folder
    cluster_prefix: String,
}

impl ResourceNames {
    /// Create a name factory for the given group tag and cluster prefix
    pub fn new(tag: impl Into<String>, cluster_prefix: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            cluster_prefix: cluster_prefix.into(),
        }
    }

    /// The group tag these names belong to
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name of the balancer for this group
    pub fn balancer(&self) -> String {
        self.compose("alb", &[])
    }

    /// Name of the plain-HTTP router for this group
    pub fn router(&self) -> String {
        self.compose("rtr", &[])
    }

    /// Name of the TLS router for this group
    pub fn tls_router(&self) -> String {
        self.compose("rtr-tls", &[])
    }

    /// Name of the backend group for one downstream service port
    pub fn backend_group(&self, namespace: &str, service: &str, port: u16) -> String {
        self.compose("bg", &[namespace, service, &port.to_string()])
    }

    /// Name of the target group for one downstream service
    pub fn target_group(&self, namespace: &str, service: &str) -> String {
        self.compose("tg", &[namespace, service])
    }

    /// Display name of a virtual host, stable within one pass
    pub fn virtual_host(&self, ordinal: usize) -> String {
        format!("vh-{}-{}", sanitize(&self.tag), ordinal)
    }

    /// Display name of a route, stable within one pass
    pub fn route(&self, ordinal: usize) -> String {
        format!("route-{}-{}", sanitize(&self.tag), ordinal)
    }

    fn compose(&self, prefix: &str, discriminators: &[&str]) -> String {
        // The digest covers every part of the tuple; the readable segments
        // exist only for humans scanning the cloud console.
        let mut tuple = format!("{}|{}|{}", prefix, self.cluster_prefix, self.tag);
        for d in discriminators {
            tuple.push('|');
            tuple.push_str(d);
        }
        format!(
            "{}-{}-{}",
            prefix,
            sanitize(&self.tag),
            deterministic_hash(&tuple)
        )
    }
}

/// Sanitize a tag into a cloud-name-safe segment: lowercase alphanumerics
/// and hyphens, truncated, never empty
fn sanitize(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len().min(TAG_SEGMENT_LEN));
    for ch in tag.chars().take(TAG_SEGMENT_LEN) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "group".to_string()
    } else {
        trimmed.to_string()
    }
}
