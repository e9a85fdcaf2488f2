//! Cluster operations
//!
//! A deliberately small surface: create clusters, attach hosts, list both.
//! It exists to give the host lifecycle controller real membership and
//! state rows to propagate readiness and editability into.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::model::EntityKind;
use crate::pipeline::{
    checks, ArgSchema, Permission, PipelineBuilder, Projection, Request, RequestContext,
    UserContext,
};
use crate::query::{Filters, OrderBy, QueryExecutor};
use crate::store::MemoryStore;

use super::{filters_of, require_id};

const SUPPORTED_FIELDS: &[&str] = &["name", "os_name", "owner", "distributed_system_name"];
const RESP_FIELDS: &[&str] = &[
    "id",
    "name",
    "os_name",
    "distributed_system_name",
    "reinstall_distributed_system",
    "owner",
    "created_at",
    "updated_at",
];
const RESP_CLUSTERHOST_FIELDS: &[&str] = &["id", "cluster_id", "host_id"];
const OPTIONAL_ADDED_FIELDS: &[&str] = &["os_name", "distributed_system_name", "owner"];
const IGNORE_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Cluster operation surface
pub struct ClusterService {
    store: Arc<MemoryStore>,
    executor: QueryExecutor,
}

impl ClusterService {
    /// Create the service over a shared store
    pub fn new(store: Arc<MemoryStore>) -> Self {
        let executor = QueryExecutor::new(store.clone());
        Self { store, executor }
    }

    fn cluster_projection() -> Projection {
        Projection::new(RESP_FIELDS)
    }

    /// List clusters matching the given attribute filters
    pub fn list_clusters(&self, user: &UserContext, filters: Filters) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], SUPPORTED_FIELDS, &[]))
            .permission(Permission::ListClusters)
            .transactional(self.store.clone())
            .project(Self::cluster_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            filters,
            &|req: &mut Request| {
                let clusters = self.executor.list(
                    EntityKind::Cluster,
                    &req.args,
                    &[OrderBy::asc("name")],
                )?;
                Ok(Value::Array(clusters.into_iter().map(Value::Object).collect()))
            },
        )
    }

    /// Create a cluster and its state record
    pub fn add_cluster(&self, user: &UserContext, name: &str, mut attrs: Filters) -> Result<Value> {
        attrs.insert("name".to_string(), json!(name));
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&["name"], OPTIONAL_ADDED_FIELDS, IGNORE_FIELDS))
            .validate_input("name", checks::check_name)
            .permission(Permission::AddCluster)
            .transactional(self.store.clone())
            .project(Self::cluster_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let name = req.args.get("name").cloned().unwrap_or(Value::Null);
                let mut extra = req.args.clone();
                extra.remove("name");
                if !extra.contains_key("owner") {
                    extra.insert("owner".to_string(), json!(req.ctx.user.email));
                }
                extra.insert("creator_id".to_string(), json!(req.ctx.user.id));

                let cluster =
                    self.executor
                        .add(EntityKind::Cluster, &[("name", name)], &extra, true)?;
                let cluster_id = require_id(&cluster)?;
                self.executor.add(
                    EntityKind::ClusterState,
                    &[("cluster_id", json!(cluster_id))],
                    &Filters::new(),
                    false,
                )?;
                Ok(Value::Object(cluster))
            },
        )
    }

    /// Attach a host to a cluster, creating the membership state record
    pub fn add_cluster_host(
        &self,
        user: &UserContext,
        cluster_id: i64,
        host_id: i64,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::UpdateCluster)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_CLUSTERHOST_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                // both ends must exist
                self.executor.get_by_id(EntityKind::Cluster, cluster_id)?;
                self.executor.get_by_id(EntityKind::Host, host_id)?;

                let clusterhost = self.executor.add(
                    EntityKind::ClusterHost,
                    &[("cluster_id", json!(cluster_id)), ("host_id", json!(host_id))],
                    &Filters::new(),
                    true,
                )?;
                let clusterhost_id = require_id(&clusterhost)?;
                self.executor.add(
                    EntityKind::ClusterHostState,
                    &[("clusterhost_id", json!(clusterhost_id))],
                    &Filters::new(),
                    false,
                )?;
                Ok(Value::Object(clusterhost))
            },
        )
    }

    /// List the membership rows of one cluster
    pub fn list_cluster_hosts(&self, user: &UserContext, cluster_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListClusters)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_CLUSTERHOST_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                self.executor.get_by_id(EntityKind::Cluster, cluster_id)?;
                let members = self.executor.list(
                    EntityKind::ClusterHost,
                    &filters_of(&[("cluster_id", json!(cluster_id))]),
                    &[],
                )?;
                Ok(Value::Array(members.into_iter().map(Value::Object).collect()))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ClusterService {
        ClusterService::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_add_cluster_creates_state_row() {
        let service = service();
        let user = UserContext::admin(1, "root@local");
        let cluster = service.add_cluster(&user, "c1", Filters::new()).unwrap();
        assert_eq!(cluster["name"], json!("c1"));
        assert_eq!(cluster["owner"], json!("root@local"));

        let state = service
            .executor
            .get(
                EntityKind::ClusterState,
                &filters_of(&[("cluster_id", cluster["id"].clone())]),
                true,
            )
            .unwrap()
            .unwrap();
        assert_eq!(state.get("state"), Some(&json!("UNINITIALIZED")));
    }

    #[test]
    fn test_duplicate_cluster_name_rejected() {
        let service = service();
        let user = UserContext::admin(1, "root@local");
        service.add_cluster(&user, "c1", Filters::new()).unwrap();
        let err = service.add_cluster(&user, "c1", Filters::new()).unwrap_err();
        assert_eq!(err.code(), "DUPLICATED_RECORD");
    }

    #[test]
    fn test_add_cluster_host_requires_both_records() {
        let service = service();
        let user = UserContext::admin(1, "root@local");
        service.add_cluster(&user, "c1", Filters::new()).unwrap();
        let err = service.add_cluster_host(&user, 1, 99).unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_EXISTS");
    }

    #[test]
    fn test_list_clusters_projects_fields() {
        let service = service();
        let user = UserContext::admin(1, "root@local");
        service.add_cluster(&user, "c1", Filters::new()).unwrap();

        let listed = service.list_clusters(&user, Filters::new()).unwrap();
        let first = &listed.as_array().unwrap()[0];
        assert!(first.get("name").is_some());
        assert!(first.get("creator_id").is_none());
    }
}
