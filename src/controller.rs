//! The Ingress controller loop
//!
//! Watches all Ingress objects and maps each event to its group tag; the
//! whole group reconciles as one unit regardless of which member changed.
//! The scheduler guarantees one pass per group at a time, coalescing
//! triggers that land mid-pass.
//!
//! One pass: load the group's inputs, build the desired graph, converge
//! the cloud resources, sweep orphans, project status. Recoverable
//! conditions requeue on a fixed interval; configuration errors emit a
//! warning Event and wait for a spec change.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::builder::{BuilderConfig, GraphBuilder};
use crate::cloud::{CloudRepository, SubnetResolver, TargetGroupFinder};
use crate::events::{actions, reasons, EventPublisher};
use crate::group::{group_tag, IngressLoader};
use crate::reconcile::{gc, ActiveResourceIds, Reconciler};
use crate::scheduler::GroupScheduler;
use crate::status::StatusProjector;
use crate::{Error, Result};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Everything one reconciliation pass needs, shared across the controller
pub struct Context {
    /// Loads a group's declarative inputs from the cluster
    pub loader: Arc<dyn IngressLoader>,
    /// Remote cloud resource repository
    pub repo: Arc<dyn CloudRepository>,
    /// Read-only subnet lookups for the builder
    pub subnets: Arc<dyn SubnetResolver>,
    /// Read-only target group lookups for the builder
    pub target_groups: Arc<dyn TargetGroupFinder>,
    /// Projects pass results into status records
    pub projector: Arc<dyn StatusProjector>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-group pass serialization
    pub scheduler: GroupScheduler,
    /// Builder configuration (folder, cluster prefix, log group)
    pub builder: BuilderConfig,
    /// Fixed interval for retrying recoverable conditions
    pub requeue_interval: Duration,
    /// Interval between periodic resyncs of a converged group
    pub resync_interval: Duration,
}

/// Reconcile one Ingress event by reconciling its whole group
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action> {
    let tag = match group_tag(&ingress) {
        Some(tag) => tag,
        // Not ours: no group annotation means no cloud resources.
        None => return Ok(Action::await_change()),
    };

    let pass_ctx = ctx.clone();
    let pass_tag = tag.clone();
    let outcome = ctx
        .scheduler
        .run(&tag, || reconcile_group(pass_ctx.clone(), pass_tag.clone()))
        .await;

    let result = match outcome {
        // A running pass absorbed this trigger.
        None => return Ok(Action::await_change()),
        Some(result) => result,
    };

    let obj_ref = object_reference(&ingress);
    match result {
        Ok(ids) => {
            let (reason, action) = if ids.is_empty() {
                (reasons::BALANCER_DELETED, actions::GARBAGE_COLLECT)
            } else {
                (reasons::GROUP_CONVERGED, actions::RECONCILE)
            };
            ctx.events
                .publish(&obj_ref, EventType::Normal, reason, action, None)
                .await;
            Ok(Action::requeue(ctx.resync_interval))
        }
        Err(e) if e.is_recoverable_condition() => {
            debug!(tag = %tag, condition = %e, "pass waiting on a recoverable condition");
            ctx.events
                .publish(
                    &obj_ref,
                    EventType::Normal,
                    reasons::WAITING,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            Ok(Action::requeue(ctx.requeue_interval))
        }
        Err(e) => {
            let reason = if e.is_retryable() {
                reasons::CLOUD_ERROR
            } else {
                reasons::INVALID_CONFIGURATION
            };
            ctx.events
                .publish(
                    &obj_ref,
                    EventType::Warning,
                    reason,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            Err(e)
        }
    }
}

/// One full pass over a group
async fn reconcile_group(ctx: Arc<Context>, tag: String) -> Result<ActiveResourceIds> {
    let inputs = ctx.loader.load_group(&tag).await?;

    // A group with no live members left sweeps everything it ever made.
    if inputs.group.is_empty() {
        info!(tag = %tag, "group has no members, collecting all resources");
        gc::collect_garbage(&*ctx.repo, &tag, &[]).await?;
        let ids = ActiveResourceIds::default();
        ctx.projector.project(&tag, &ids).await?;
        return Ok(ids);
    }

    let builder = GraphBuilder::new(&ctx.builder, &*ctx.subnets, &*ctx.target_groups);
    let mut desired = builder.build(&inputs).await?;

    let ids = Reconciler::new(&*ctx.repo).reconcile(&mut desired).await?;

    let survivors = if ids.is_empty() {
        vec![]
    } else {
        desired.member_names()
    };
    gc::collect_garbage(&*ctx.repo, &tag, &survivors).await?;

    ctx.projector.project(&tag, &ids).await?;
    Ok(ids)
}

/// Error policy: retryable errors requeue on the fixed interval, fatal
/// ones wait for a spec change
pub fn error_policy(ingress: Arc<Ingress>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(
            ingress = %ingress.name_any(),
            error = %err,
            "reconciliation failed, will retry"
        );
        Action::requeue(ctx.requeue_interval)
    } else {
        error!(
            ingress = %ingress.name_any(),
            error = %err,
            "reconciliation failed on configuration, waiting for a spec change"
        );
        Action::await_change()
    }
}

/// Run the controller until shutdown
pub async fn run(client: Client, ctx: Arc<Context>) {
    let ingresses: Api<Ingress> = Api::all(client);
    info!("starting ingress group controller");

    Controller::new(
        ingresses,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
        match result {
            Ok((obj, _)) => debug!(ingress = %obj.name, "reconciled"),
            Err(e) => warn!(error = %e, "reconciliation error"),
        }
    })
    .await;
}

/// Event target: the Ingress the trigger arrived on
fn object_reference(ingress: &Ingress) -> ObjectReference {
    ObjectReference {
        api_version: Some("networking.k8s.io/v1".to_string()),
        kind: Some("Ingress".to_string()),
        name: ingress.metadata.name.clone(),
        namespace: ingress.metadata.namespace.clone(),
        uid: ingress.metadata.uid.clone(),
        ..Default::default()
    }
}
