//! Dependency-ordered reconciliation
//!
//! Resources converge leaves-first: target groups, then backend groups,
//! then routers, then the balancer, with cloud ids injected into the
//! graph as each layer lands. Every step follows the same ensure shape:
//! find by deterministic name, list operations still running against the
//! resource, diff, then create or update. An in-flight operation aborts
//! the pass with a recoverable condition rather than racing the cloud,
//! even when the diff would have been empty: the live shape read under a
//! running operation is not trustworthy.
//!
//! A graph with zero routes makes the balancer itself garbage: it is
//! deleted here (the remaining resources are swept by [`gc`]).

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cloud::CloudRepository;
use crate::diff;
use crate::model::{
    Balancer, BalancerStatus, DesiredState, Operation, ResourceKind,
};
use crate::{Error, Result};

pub mod gc;

/// Cloud ids of every resource a pass converged, keyed by deterministic
/// name; consumed by status projection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveResourceIds {
    /// Balancer id, when the balancer exists
    pub balancer: Option<String>,
    /// Router name -> id
    pub routers: BTreeMap<String, String>,
    /// Backend group name -> id
    pub backend_groups: BTreeMap<String, String>,
    /// Target group name -> id
    pub target_groups: BTreeMap<String, String>,
}

impl ActiveResourceIds {
    /// Whether the pass left any resources alive
    pub fn is_empty(&self) -> bool {
        self.balancer.is_none()
            && self.routers.is_empty()
            && self.backend_groups.is_empty()
            && self.target_groups.is_empty()
    }
}

/// Drives one group's desired graph to the cloud
pub struct Reconciler<'a> {
    repo: &'a dyn CloudRepository,
}

impl<'a> Reconciler<'a> {
    pub fn new(repo: &'a dyn CloudRepository) -> Self {
        Self { repo }
    }

    /// Converge the desired graph, returning the ids of everything alive
    ///
    /// The graph is mutated in place as ids are learned. Recoverable
    /// conditions (pending operation, dependency not ready) abort the
    /// pass early; the caller requeues.
    pub async fn reconcile(&self, desired: &mut DesiredState) -> Result<ActiveResourceIds> {
        if desired.route_count() == 0 {
            return self.tear_down_balancer(desired).await;
        }

        let mut ids = ActiveResourceIds::default();

        for tg in &desired.target_groups {
            let id = self.ensure_target_group(tg).await?;
            ids.target_groups.insert(tg.name.clone(), id);
        }
        desired.inject_target_group_ids(&ids.target_groups);

        for bg in &desired.backend_groups {
            let id = self.ensure_backend_group(bg).await?;
            ids.backend_groups.insert(bg.name.clone(), id);
        }

        // Routes may reference groups built outside this graph; those must
        // already exist remotely.
        for name in desired.unresolved_backend_group_names() {
            match self.repo.find_backend_group(&name).await? {
                Some(live) => {
                    let id = required_id(live.id, ResourceKind::BackendGroup, &name)?;
                    ids.backend_groups.insert(name, id);
                }
                None => {
                    return Err(Error::not_ready(
                        ResourceKind::BackendGroup.as_str(),
                        name,
                        "referenced group exists neither in this graph nor in the cloud",
                    ))
                }
            }
        }
        desired.inject_backend_group_ids(&ids.backend_groups);

        let routers: Vec<_> = desired.routers().cloned().collect();
        for router in routers {
            let id = self.ensure_router(&router).await?;
            desired.inject_router_id(&router.name, &id);
            for r in desired.routers_mut() {
                if r.name == router.name {
                    r.id = Some(id.clone());
                }
            }
            ids.routers.insert(router.name, id);
        }

        ids.balancer = Some(self.ensure_balancer(&desired.balancer).await?);

        info!(
            tag = %desired.tag,
            balancer = ?ids.balancer,
            routers = ids.routers.len(),
            backend_groups = ids.backend_groups.len(),
            target_groups = ids.target_groups.len(),
            "group converged"
        );

        Ok(ids)
    }

    /// Delete the balancer of a group whose graph no longer routes traffic
    async fn tear_down_balancer(&self, desired: &DesiredState) -> Result<ActiveResourceIds> {
        let name = &desired.balancer.name;
        let live = match self.repo.find_balancer(name).await? {
            Some(live) => live,
            None => return Ok(ActiveResourceIds::default()),
        };

        if live.status == BalancerStatus::Deleting {
            return Err(Error::not_ready(
                ResourceKind::Balancer.as_str(),
                name.clone(),
                "deletion already in progress",
            ));
        }

        let id = required_id(live.id, ResourceKind::Balancer, name)?;
        self.no_pending_operations(ResourceKind::Balancer, &id, name)
            .await?;
        debug!(balancer = %name, "route graph is empty, deleting balancer");
        let op = self.repo.delete_balancer(&id).await?;
        require_done(op, ResourceKind::Balancer, name)?;
        Ok(ActiveResourceIds::default())
    }

    async fn ensure_target_group(&self, desired: &crate::model::TargetGroup) -> Result<String> {
        let kind = ResourceKind::TargetGroup;
        match self.repo.find_target_group(&desired.name).await? {
            Some(live) => {
                let id = required_id(live.id.clone(), kind, &desired.name)?;
                self.no_pending_operations(kind, &id, &desired.name).await?;
                if diff::target_group_changed(&live, desired) {
                    let mut update = desired.clone();
                    update.id = Some(id.clone());
                    debug!(target_group = %desired.name, "updating target group");
                    let op = self.repo.update_target_group(&update).await?;
                    require_done(op, kind, &desired.name)?;
                }
                Ok(id)
            }
            None => {
                debug!(target_group = %desired.name, "creating target group");
                let op = self.repo.create_target_group(desired).await?;
                require_done(op, kind, &desired.name)?;
                self.id_after_create(kind, &desired.name).await
            }
        }
    }

    async fn ensure_backend_group(&self, desired: &crate::model::BackendGroup) -> Result<String> {
        let kind = ResourceKind::BackendGroup;
        match self.repo.find_backend_group(&desired.name).await? {
            Some(live) => {
                let id = required_id(live.id.clone(), kind, &desired.name)?;
                self.no_pending_operations(kind, &id, &desired.name).await?;
                if diff::backend_group_changed(&live, desired) {
                    let mut update = desired.clone();
                    update.id = Some(id.clone());
                    debug!(backend_group = %desired.name, "updating backend group");
                    let op = self.repo.update_backend_group(&update).await?;
                    require_done(op, kind, &desired.name)?;
                }
                Ok(id)
            }
            None => {
                debug!(backend_group = %desired.name, "creating backend group");
                let op = self.repo.create_backend_group(desired).await?;
                require_done(op, kind, &desired.name)?;
                self.id_after_create(kind, &desired.name).await
            }
        }
    }

    async fn ensure_router(&self, desired: &crate::model::HttpRouter) -> Result<String> {
        let kind = ResourceKind::HttpRouter;
        match self.repo.find_router(&desired.name).await? {
            Some(live) => {
                let id = required_id(live.id.clone(), kind, &desired.name)?;
                self.no_pending_operations(kind, &id, &desired.name).await?;
                if diff::router_changed(&live, desired) {
                    let mut update = desired.clone();
                    update.id = Some(id.clone());
                    debug!(router = %desired.name, "updating router");
                    let op = self.repo.update_router(&update).await?;
                    require_done(op, kind, &desired.name)?;
                }
                Ok(id)
            }
            None => {
                debug!(router = %desired.name, "creating router");
                let op = self.repo.create_router(desired).await?;
                require_done(op, kind, &desired.name)?;
                self.id_after_create(kind, &desired.name).await
            }
        }
    }

    async fn ensure_balancer(&self, desired: &Balancer) -> Result<String> {
        let kind = ResourceKind::Balancer;
        match self.repo.find_balancer(&desired.name).await? {
            Some(live) => {
                let id = required_id(live.id.clone(), kind, &desired.name)?;
                self.no_pending_operations(kind, &id, &desired.name).await?;
                if diff::balancer_changed(&live, desired) {
                    // Only an active balancer accepts updates; anything else
                    // settles on its own and the pass retries.
                    if live.status != BalancerStatus::Active {
                        return Err(Error::not_ready(
                            kind.as_str(),
                            desired.name.clone(),
                            format!("status {:?} does not allow updates", live.status),
                        ));
                    }
                    let mut update = desired.clone();
                    update.id = Some(id.clone());
                    debug!(balancer = %desired.name, "updating balancer");
                    let op = self.repo.update_balancer(&update).await?;
                    require_done(op, kind, &desired.name)?;
                }
                Ok(id)
            }
            None => {
                debug!(balancer = %desired.name, "creating balancer");
                let op = self.repo.create_balancer(desired).await?;
                require_done(op, kind, &desired.name)?;
                self.id_after_create(kind, &desired.name).await
            }
        }
    }

    /// Fail with a recoverable condition if any operation is still running
    /// against the resource
    async fn no_pending_operations(
        &self,
        kind: ResourceKind,
        id: &str,
        name: &str,
    ) -> Result<()> {
        for op in self.repo.list_pending_operations(kind, id).await? {
            if !op.done {
                return Err(Error::operation_incomplete(op.id, kind.as_str(), name));
            }
        }
        Ok(())
    }

    /// Fetch the id of a just-created resource; a miss means creation is
    /// still settling and the pass retries
    async fn id_after_create(&self, kind: ResourceKind, name: &str) -> Result<String> {
        let id = match kind {
            ResourceKind::Balancer => self
                .repo
                .find_balancer(name)
                .await?
                .and_then(|r| r.id),
            ResourceKind::HttpRouter => self.repo.find_router(name).await?.and_then(|r| r.id),
            ResourceKind::BackendGroup => self
                .repo
                .find_backend_group(name)
                .await?
                .and_then(|r| r.id),
            ResourceKind::TargetGroup => self
                .repo
                .find_target_group(name)
                .await?
                .and_then(|r| r.id),
        };
        id.ok_or_else(|| {
            Error::not_ready(kind.as_str(), name.to_string(), "created but not yet visible")
        })
    }
}

/// A mutation that returned a still-running operation aborts the pass
fn require_done(op: Option<Operation>, kind: ResourceKind, name: &str) -> Result<()> {
    match op {
        Some(op) if !op.done => Err(Error::operation_incomplete(op.id, kind.as_str(), name)),
        _ => Ok(()),
    }
}

/// A live resource reported without an id is a cloud contract violation
fn required_id(id: Option<String>, kind: ResourceKind, name: &str) -> Result<String> {
    id.ok_or_else(|| {
        Error::internal_with_context(
            "reconciler",
            format!("live {} {} has no id", kind.as_str(), name),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloudRepository;
    use crate::model::{
        BackendGroup, BackendGroupKind, BackendGroupRef, Endpoint, HealthCheck, HttpBackend,
        HttpRouter, Listener, ListenerKind, LoadBalancingMode, PathMatch, Route, RouteAction,
        RouteProtocol, RouterRef, Target, TargetGroup, TargetGroupRef, VirtualHost,
    };
    use mockall::Sequence;

    fn target_group() -> TargetGroup {
        TargetGroup {
            id: None,
            name: "tg-g1".to_string(),
            folder_id: "folder".to_string(),
            targets: vec![Target {
                ip_address: "10.0.0.1".to_string(),
                subnet_id: None,
            }],
        }
    }

    fn backend_group() -> BackendGroup {
        BackendGroup {
            id: None,
            name: "bg-g1".to_string(),
            folder_id: "folder".to_string(),
            kind: BackendGroupKind::Http {
                backends: vec![HttpBackend {
                    name: "shop-30080".to_string(),
                    port: 30080,
                    target_group: TargetGroupRef::by_name("tg-g1"),
                    weight: 1,
                    balancing_mode: LoadBalancingMode::RoundRobin,
                    health_checks: vec![HealthCheck::default_http()],
                    tls: None,
                    use_http2: false,
                }],
                affinity: None,
            },
        }
    }

    fn forward_route(bg: &str, bg_id: &str) -> Route {
        Route {
            name: "route-g1-0".to_string(),
            protocol: RouteProtocol::Http,
            path: PathMatch::Prefix("/".to_string()),
            action: RouteAction::Forward {
                backend_group: BackendGroupRef {
                    name: bg.to_string(),
                    id: bg_id.to_string(),
                },
                timeout: None,
                idle_timeout: None,
                prefix_rewrite: None,
                upgrade_types: vec![],
                security_profile_id: None,
            },
        }
    }

    fn router(bg_id: &str) -> HttpRouter {
        HttpRouter {
            id: None,
            name: "rtr-g1".to_string(),
            virtual_hosts: vec![VirtualHost {
                name: "vh-g1-0".to_string(),
                authority: vec!["shop.example.com".to_string()],
                routes: vec![forward_route("bg-g1", bg_id)],
            }],
        }
    }

    fn balancer(router_id: &str) -> Balancer {
        Balancer {
            id: None,
            name: "alb-g1".to_string(),
            folder_id: "folder".to_string(),
            network_id: "net-1".to_string(),
            locations: vec![crate::model::Location {
                zone_id: "zone-a".to_string(),
                subnet_id: "subnet-a".to_string(),
                disable_traffic: false,
            }],
            security_group_ids: vec![],
            listeners: vec![Listener {
                name: "http".to_string(),
                endpoints: vec![Endpoint {
                    addresses: vec![crate::model::ListenerAddress::ExternalIpv4 {
                        address: String::new(),
                    }],
                    ports: vec![80],
                }],
                kind: ListenerKind::Http {
                    router: RouterRef {
                        name: "rtr-g1".to_string(),
                        id: router_id.to_string(),
                    },
                },
            }],
            log_options: None,
            status: BalancerStatus::Unknown,
        }
    }

    fn graph() -> DesiredState {
        DesiredState {
            tag: "g1".to_string(),
            balancer: balancer(""),
            router: Some(router("")),
            tls_router: None,
            backend_groups: vec![backend_group()],
            target_groups: vec![target_group()],
        }
    }

    fn live_target_group() -> TargetGroup {
        TargetGroup {
            id: Some("tg-id".to_string()),
            ..target_group()
        }
    }

    fn live_backend_group() -> BackendGroup {
        BackendGroup {
            id: Some("bg-id".to_string()),
            ..backend_group()
        }
    }

    fn live_router() -> HttpRouter {
        HttpRouter {
            id: Some("rtr-id".to_string()),
            ..router("bg-id")
        }
    }

    fn live_balancer(status: BalancerStatus) -> Balancer {
        Balancer {
            id: Some("alb-id".to_string()),
            status,
            ..balancer("rtr-id")
        }
    }

    #[tokio::test]
    async fn story_fresh_group_creates_everything_in_dependency_order() {
        let mut repo = MockCloudRepository::new();
        let mut seq = Sequence::new();

        repo.expect_find_target_group()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_target_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_find_target_group()
            .returning(|_| Ok(Some(live_target_group())));

        repo.expect_find_backend_group()
            .times(1)
            .returning(|_| Ok(None));
        repo.expect_create_backend_group()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|bg| {
                // Target group id was injected before the create call.
                matches!(&bg.kind, BackendGroupKind::Http { backends, .. }
                    if backends[0].target_group.id == "tg-id")
            })
            .returning(|_| Ok(None));
        repo.expect_find_backend_group()
            .returning(|_| Ok(Some(live_backend_group())));

        repo.expect_find_router().times(1).returning(|_| Ok(None));
        repo.expect_create_router()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_find_router()
            .returning(|_| Ok(Some(live_router())));

        repo.expect_find_balancer().times(1).returning(|_| Ok(None));
        repo.expect_create_balancer()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|b| {
                matches!(&b.listeners[0].kind, ListenerKind::Http { router }
                    if router.id == "rtr-id")
            })
            .returning(|_| Ok(None));
        repo.expect_find_balancer()
            .returning(|_| Ok(Some(live_balancer(BalancerStatus::Creating))));

        let mut desired = graph();
        let ids = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .expect("converged");

        assert_eq!(ids.balancer.as_deref(), Some("alb-id"));
        assert_eq!(ids.routers.get("rtr-g1").map(String::as_str), Some("rtr-id"));
        assert_eq!(
            ids.backend_groups.get("bg-g1").map(String::as_str),
            Some("bg-id")
        );
        assert_eq!(
            ids.target_groups.get("tg-g1").map(String::as_str),
            Some("tg-id")
        );
    }

    #[tokio::test]
    async fn story_converged_group_issues_no_mutations() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_target_group()
            .returning(|_| Ok(Some(live_target_group())));
        repo.expect_find_backend_group()
            .returning(|_| Ok(Some(live_backend_group())));
        repo.expect_find_router()
            .returning(|_| Ok(Some(live_router())));
        repo.expect_find_balancer()
            .returning(|_| Ok(Some(live_balancer(BalancerStatus::Active))));
        repo.expect_list_pending_operations()
            .returning(|_, _| Ok(vec![]));

        // No create/update/delete expectations: any mutation panics.
        let mut desired = graph();
        let ids = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .expect("no-op pass");
        assert_eq!(ids.balancer.as_deref(), Some("alb-id"));
    }

    #[tokio::test]
    async fn pending_operation_blocks_the_mutation() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_target_group().returning(|_| {
            let mut tg = live_target_group();
            tg.targets.push(Target {
                ip_address: "10.0.0.9".to_string(),
                subnet_id: None,
            });
            Ok(Some(tg))
        });
        repo.expect_list_pending_operations()
            .returning(|_, _| Ok(vec![Operation::pending("op-7", "updating target group")]));

        let mut desired = graph();
        let err = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .unwrap_err();
        assert!(err.is_recoverable_condition());
        assert!(err.to_string().contains("op-7"));
    }

    #[tokio::test]
    async fn pending_operation_blocks_even_an_unchanged_resource() {
        let mut repo = MockCloudRepository::new();
        // Live matches desired exactly; the in-flight operation still stops
        // the pass before the diff is trusted.
        repo.expect_find_target_group()
            .returning(|_| Ok(Some(live_target_group())));
        repo.expect_list_pending_operations()
            .withf(|kind, id| *kind == ResourceKind::TargetGroup && id == "tg-id")
            .returning(|_, _| Ok(vec![Operation::pending("op-3", "creating target group")]));

        let mut desired = graph();
        let err = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .unwrap_err();
        assert!(err.is_recoverable_condition());
        assert!(err.to_string().contains("op-3"));
    }

    #[tokio::test]
    async fn missing_external_backend_group_is_not_ready() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_backend_group().returning(|_| Ok(None));

        let mut desired = graph();
        desired.backend_groups.clear();
        desired.target_groups.clear();
        desired.router = Some(HttpRouter {
            id: None,
            name: "rtr-g1".to_string(),
            virtual_hosts: vec![VirtualHost {
                name: "vh-g1-0".to_string(),
                authority: vec!["shop.example.com".to_string()],
                routes: vec![forward_route("bg-prebuilt", "")],
            }],
        });

        let err = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .unwrap_err();
        assert!(err.is_recoverable_condition());
        assert!(err.to_string().contains("bg-prebuilt"));
    }

    #[tokio::test]
    async fn empty_graph_deletes_the_balancer() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_balancer()
            .returning(|_| Ok(Some(live_balancer(BalancerStatus::Active))));
        repo.expect_list_pending_operations()
            .returning(|_, _| Ok(vec![]));
        repo.expect_delete_balancer()
            .times(1)
            .withf(|id| id == "alb-id")
            .returning(|_| Ok(None));

        let mut desired = graph();
        desired.router = None;

        let ids = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .expect("teardown");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn empty_graph_with_no_balancer_is_a_clean_no_op() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_balancer().returning(|_| Ok(None));

        let mut desired = graph();
        desired.router = None;
        let ids = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .expect("nothing to do");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn balancer_already_deleting_waits() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_balancer()
            .returning(|_| Ok(Some(live_balancer(BalancerStatus::Deleting))));

        let mut desired = graph();
        desired.router = None;
        let err = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .unwrap_err();
        assert!(err.is_recoverable_condition());
    }

    #[tokio::test]
    async fn inactive_balancer_defers_its_update() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_target_group()
            .returning(|_| Ok(Some(live_target_group())));
        repo.expect_find_backend_group()
            .returning(|_| Ok(Some(live_backend_group())));
        repo.expect_find_router()
            .returning(|_| Ok(Some(live_router())));
        repo.expect_find_balancer().returning(|_| {
            let mut live = live_balancer(BalancerStatus::Starting);
            live.security_group_ids = vec!["sg-stale".to_string()];
            Ok(Some(live))
        });
        repo.expect_list_pending_operations()
            .returning(|_, _| Ok(vec![]));

        let mut desired = graph();
        let err = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .unwrap_err();
        assert!(err.is_recoverable_condition());
        assert!(err.to_string().contains("Starting"));
    }

    #[tokio::test]
    async fn drifted_router_is_updated_in_place() {
        let mut repo = MockCloudRepository::new();
        repo.expect_find_target_group()
            .returning(|_| Ok(Some(live_target_group())));
        repo.expect_find_backend_group()
            .returning(|_| Ok(Some(live_backend_group())));
        repo.expect_find_router().returning(|_| {
            let mut live = live_router();
            live.virtual_hosts[0].routes[0].path = PathMatch::Prefix("/stale".to_string());
            Ok(Some(live))
        });
        repo.expect_list_pending_operations()
            .returning(|_, _| Ok(vec![]));
        repo.expect_update_router()
            .times(1)
            .withf(|r| r.id.as_deref() == Some("rtr-id"))
            .returning(|_| Ok(None));
        repo.expect_find_balancer()
            .returning(|_| Ok(Some(live_balancer(BalancerStatus::Active))));

        let mut desired = graph();
        let ids = Reconciler::new(&repo)
            .reconcile(&mut desired)
            .await
            .expect("converged");
        assert_eq!(ids.routers.get("rtr-g1").map(String::as_str), Some("rtr-id"));
    }
}
