//! Garbage collection of orphaned cloud resources
//!
//! After a pass converges, resources still carrying the group tag but
//! absent from the desired graph are deleted. The sweep runs root-first
//! (balancer, routers, backend groups, target groups) so a resource is
//! never deleted while a surviving parent still references it. A balancer
//! already in the Deleting state is not deleted again; the sweep records a
//! recoverable condition and the pass requeues. Deletion is best-effort:
//! a failed delete is logged and the sweep continues, with the first
//! failure reported at the end so the pass requeues.

use tracing::{debug, warn};

use crate::cloud::CloudRepository;
use crate::model::{BalancerStatus, ResourceKind};
use crate::{Error, Result};

/// Root-first deletion order
const SWEEP_ORDER: [ResourceKind; 4] = [
    ResourceKind::Balancer,
    ResourceKind::HttpRouter,
    ResourceKind::BackendGroup,
    ResourceKind::TargetGroup,
];

/// Delete every tagged resource that has no desired counterpart
///
/// `desired_names` are the deterministic names of all graph members; a
/// tagged remote resource with a name outside this set is an orphan.
pub async fn collect_garbage(
    repo: &dyn CloudRepository,
    tag: &str,
    desired_names: &[String],
) -> Result<()> {
    let mut first_error: Option<Error> = None;

    for kind in SWEEP_ORDER {
        let tagged = match repo.list_tagged(kind, tag).await {
            Ok(tagged) => tagged,
            Err(e) => {
                warn!(tag = %tag, kind = kind.as_str(), error = %e, "listing tagged resources failed");
                first_error.get_or_insert(e);
                continue;
            }
        };

        for resource in tagged {
            if desired_names.contains(&resource.name) {
                continue;
            }
            if kind == ResourceKind::Balancer {
                match repo.find_balancer(&resource.name).await {
                    Ok(Some(live)) if live.status == BalancerStatus::Deleting => {
                        debug!(tag = %tag, name = %resource.name, "balancer deletion already in progress");
                        first_error.get_or_insert(Error::not_ready(
                            kind.as_str(),
                            resource.name.clone(),
                            "deletion already in progress",
                        ));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(tag = %tag, name = %resource.name, error = %e, "checking balancer status failed");
                        first_error.get_or_insert(e);
                        continue;
                    }
                }
            }
            debug!(
                tag = %tag,
                kind = kind.as_str(),
                name = %resource.name,
                id = %resource.id,
                "deleting orphaned resource"
            );
            let deleted = match kind {
                ResourceKind::Balancer => repo.delete_balancer(&resource.id).await,
                ResourceKind::HttpRouter => repo.delete_router(&resource.id).await,
                ResourceKind::BackendGroup => repo.delete_backend_group(&resource.id).await,
                ResourceKind::TargetGroup => repo.delete_target_group(&resource.id).await,
            };
            if let Err(e) = deleted {
                warn!(
                    tag = %tag,
                    kind = kind.as_str(),
                    name = %resource.name,
                    error = %e,
                    "deleting orphaned resource failed"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
