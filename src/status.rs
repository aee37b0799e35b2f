//! Status projection
//!
//! Writes the per-group `IngressGroupStatus` record after every
//! successful pass. Projection is idempotent: an unchanged record is left
//! alone (the timestamp only moves when the ids do), and a group whose
//! pass left nothing alive has its record deleted.

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{IngressGroupStatus, IngressGroupStatusSpec};
use crate::reconcile::ActiveResourceIds;
use crate::Result;

/// Field manager identifying the operator's server-side applies
const FIELD_MANAGER: &str = "alb-operator";

/// Collaborator projecting reconciliation results into cluster records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusProjector: Send + Sync {
    /// Record (or clear) the active ids for one group
    async fn project(&self, tag: &str, ids: &ActiveResourceIds) -> Result<()>;
}

/// Production projector writing `IngressGroupStatus` objects
pub struct KubeStatusProjector {
    client: Client,
}

impl KubeStatusProjector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusProjector for KubeStatusProjector {
    async fn project(&self, tag: &str, ids: &ActiveResourceIds) -> Result<()> {
        let api: Api<IngressGroupStatus> = Api::all(self.client.clone());
        let existing = api.get_opt(tag).await?;

        if ids.is_empty() {
            if existing.is_some() {
                debug!(tag = %tag, "group is gone, deleting status record");
                api.delete(tag, &DeleteParams::default()).await?;
            }
            return Ok(());
        }

        let spec = spec_from_ids(ids);
        match existing {
            Some(record) if specs_equal(&record.spec, &spec) => Ok(()),
            Some(record) => {
                let mut updated = record;
                updated.spec = spec;
                updated.spec.updated_at = Some(Utc::now().to_rfc3339());
                updated.metadata.managed_fields = None;
                debug!(tag = %tag, "updating status record");
                api.patch(
                    tag,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&updated),
                )
                .await?;
                Ok(())
            }
            None => {
                let mut record = IngressGroupStatus::new(tag, spec);
                record.spec.updated_at = Some(Utc::now().to_rfc3339());
                record.metadata = ObjectMeta {
                    name: Some(tag.to_string()),
                    ..Default::default()
                };
                debug!(tag = %tag, "creating status record");
                api.create(&PostParams::default(), &record).await?;
                Ok(())
            }
        }
    }
}

/// Build the projected spec from a pass's surviving ids
fn spec_from_ids(ids: &ActiveResourceIds) -> IngressGroupStatusSpec {
    IngressGroupStatusSpec {
        balancer_id: ids.balancer.clone(),
        router_ids: ids.routers.values().cloned().collect(),
        backend_group_ids: ids.backend_groups.values().cloned().collect(),
        target_group_ids: ids.target_groups.values().cloned().collect(),
        updated_at: None,
    }
}

/// Compare projected specs ignoring the timestamp
fn specs_equal(a: &IngressGroupStatusSpec, b: &IngressGroupStatusSpec) -> bool {
    a.balancer_id == b.balancer_id
        && a.router_ids == b.router_ids
        && a.backend_group_ids == b.backend_group_ids
        && a.target_group_ids == b.target_group_ids
}

/// Projector that records nothing, for runs without cluster write access
pub struct NoopStatusProjector;

#[async_trait]
impl StatusProjector for NoopStatusProjector {
    async fn project(&self, _tag: &str, _ids: &ActiveResourceIds) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ids() -> ActiveResourceIds {
        let mut routers = BTreeMap::new();
        routers.insert("rtr-g1".to_string(), "r-1".to_string());
        let mut backend_groups = BTreeMap::new();
        backend_groups.insert("bg-g1".to_string(), "b-1".to_string());
        let mut target_groups = BTreeMap::new();
        target_groups.insert("tg-g1".to_string(), "t-1".to_string());
        ActiveResourceIds {
            balancer: Some("alb-1".to_string()),
            routers,
            backend_groups,
            target_groups,
        }
    }

    #[test]
    fn spec_projection_keeps_ids_sorted_by_name() {
        let spec = spec_from_ids(&ids());
        assert_eq!(spec.balancer_id.as_deref(), Some("alb-1"));
        assert_eq!(spec.router_ids, vec!["r-1"]);
        assert_eq!(spec.backend_group_ids, vec!["b-1"]);
        assert_eq!(spec.target_group_ids, vec!["t-1"]);
        assert!(spec.updated_at.is_none());
    }

    #[test]
    fn specs_compare_ignoring_the_timestamp() {
        let a = spec_from_ids(&ids());
        let mut b = spec_from_ids(&ids());
        b.updated_at = Some("2026-01-01T00:00:00Z".to_string());
        assert!(specs_equal(&a, &b));

        b.balancer_id = Some("other".to_string());
        assert!(!specs_equal(&a, &b));
    }

    #[tokio::test]
    async fn mock_projector_is_injectable() {
        let mut projector = MockStatusProjector::new();
        projector
            .expect_project()
            .withf(|tag, ids| tag == "g1" && !ids.is_empty())
            .returning(|_, _| Ok(()));
        projector.project("g1", &ids()).await.expect("projected");
    }
}
