//! Host operations
//!
//! The pipeline-wrapped surface for hosts and their config, network, state
//! and log-history sub-records, plus the lifecycle decisions: when a host
//! may be mutated, when deletion is synchronous versus handed to the task
//! system, and how readiness propagates into cluster memberships.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::{EntityKind, StateValue};
use crate::observability::Logger;
use crate::pipeline::{
    checks, ArgSchema, Permission, PipelineBuilder, Projection, Request, RequestContext,
    UserContext,
};
use crate::query::{Filters, OrderBy, QueryExecutor};
use crate::store::{bool_field, i64_field, merge_values, str_field, MemoryStore, Record};
use crate::tasks::{TaskDispatcher, TaskRequest};

use super::rules;
use super::{filters_of, require_id};

const SUPPORTED_FIELDS: &[&str] = &["name", "hostname", "os_name", "os_id", "owner"];
const SUPPORTED_NETWORK_FIELDS: &[&str] = &["interface", "ip", "is_mgmt", "is_promiscuous"];
const RESPONSE_FILTER_FIELDS: &[&str] = &["os_name", "os_id", "owner"];
const RESP_FIELDS: &[&str] = &[
    "id",
    "name",
    "hostname",
    "os_name",
    "os_id",
    "owner",
    "reinstall_os",
    "networks",
    "created_at",
    "updated_at",
];
const RESP_CLUSTER_FIELDS: &[&str] = &[
    "id",
    "name",
    "os_name",
    "distributed_system_name",
    "reinstall_distributed_system",
    "owner",
    "created_at",
    "updated_at",
];
const RESP_NETWORK_FIELDS: &[&str] = &[
    "id",
    "ip",
    "interface",
    "subnet_id",
    "is_mgmt",
    "is_promiscuous",
    "created_at",
    "updated_at",
];
const RESP_CONFIG_FIELDS: &[&str] = &[
    "os_config",
    "config_validated",
    "networks",
    "created_at",
    "updated_at",
];
const RESP_DEPLOYED_CONFIG_FIELDS: &[&str] = &["deployed_os_config"];
const RESP_DEPLOY_FIELDS: &[&str] = &["status", "host"];
const RESP_STATE_FIELDS: &[&str] = &["id", "state", "percentage", "message", "severity", "ready"];
const RESP_LOG_FIELDS: &[&str] = &[
    "id",
    "filename",
    "position",
    "partial_line",
    "percentage",
    "message",
    "severity",
    "line_matcher_name",
];
const ADDED_HOST_FIELDS: &[&str] = &["name"];
const OPTIONAL_ADDED_HOST_FIELDS: &[&str] =
    &["hostname", "os_name", "os_id", "owner", "reinstall_os"];
const UPDATED_FIELDS: &[&str] = &["name", "reinstall_os"];
const UPDATED_CONFIG_FIELDS: &[&str] = &["put_os_config"];
const PATCHED_CONFIG_FIELDS: &[&str] = &["patched_os_config"];
const UPDATED_DEPLOYED_CONFIG_FIELDS: &[&str] = &["deployed_os_config"];
const ADDED_NETWORK_FIELDS: &[&str] = &["interface", "ip", "subnet_id"];
const OPTIONAL_ADDED_NETWORK_FIELDS: &[&str] = &["is_mgmt", "is_promiscuous"];
const UPDATED_NETWORK_FIELDS: &[&str] =
    &["interface", "ip", "subnet_id", "is_mgmt", "is_promiscuous"];
const UPDATED_STATE_FIELDS: &[&str] = &["state", "percentage", "message", "severity"];
const UPDATED_STATE_INTERNAL_FIELDS: &[&str] = &["ready"];
const ADDED_LOG_FIELDS: &[&str] = &["filename"];
const UPDATED_LOG_FIELDS: &[&str] = &[
    "position",
    "partial_line",
    "percentage",
    "message",
    "severity",
    "line_matcher_name",
];
const IGNORE_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// A host addressed by id or by unique name
#[derive(Debug, Clone)]
pub enum HostRef {
    Id(i64),
    Name(String),
}

impl From<i64> for HostRef {
    fn from(id: i64) -> Self {
        HostRef::Id(id)
    }
}

impl From<&str> for HostRef {
    fn from(name: &str) -> Self {
        HostRef::Name(name.to_string())
    }
}

/// Host operation surface and lifecycle controller
pub struct HostService {
    store: Arc<MemoryStore>,
    executor: QueryExecutor,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl HostService {
    /// Create the service over a shared store and task dispatcher
    pub fn new(store: Arc<MemoryStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let executor = QueryExecutor::new(store.clone());
        Self {
            store,
            executor,
            dispatcher,
        }
    }

    fn network_projection() -> Projection {
        Projection::new(RESP_NETWORK_FIELDS)
    }

    fn host_projection() -> Projection {
        Projection::new(RESP_FIELDS).with_nested("networks", Self::network_projection())
    }

    fn config_projection() -> Projection {
        Projection::new(RESP_CONFIG_FIELDS).with_nested("networks", Self::network_projection())
    }

    fn deploy_projection() -> Projection {
        Projection::new(RESP_DEPLOY_FIELDS).with_nested("host", Self::config_projection())
    }

    fn del_host_projection() -> Projection {
        let mut fields: Vec<&str> = RESP_FIELDS.to_vec();
        fields.push("status");
        Projection::new(&fields)
            .with_nested("networks", Self::network_projection())
            .with_nested("host", Self::host_projection())
    }

    fn networks_of(&self, host_id: i64) -> Result<Vec<Record>> {
        self.executor.list(
            EntityKind::HostNetwork,
            &filters_of(&[("host_id", json!(host_id))]),
            &[],
        )
    }

    fn clusterhosts_of(&self, host_id: i64) -> Result<Vec<Record>> {
        self.executor.list(
            EntityKind::ClusterHost,
            &filters_of(&[("host_id", json!(host_id))]),
            &[],
        )
    }

    fn get_required(&self, kind: EntityKind, filters: &Filters) -> Result<Record> {
        self.executor.get(kind, filters, true)?.ok_or_else(|| {
            Error::record_not_exists(format!(
                "cannot find the record in table {}",
                kind.table()
            ))
        })
    }

    fn host_state(&self, host_id: i64) -> Result<Record> {
        self.get_required(
            EntityKind::HostState,
            &filters_of(&[("host_id", json!(host_id))]),
        )
    }

    /// Host record with its networks embedded, ready for projection
    fn host_view(&self, host: Record) -> Result<Value> {
        let host_id = require_id(&host)?;
        let networks = self.networks_of(host_id)?;
        let mut view = host;
        view.insert(
            "networks".to_string(),
            Value::Array(networks.into_iter().map(Value::Object).collect()),
        );
        Ok(Value::Object(view))
    }

    // ------------------------------------------------------------------
    // hosts
    // ------------------------------------------------------------------

    /// List hosts matching attribute filters; response predicates
    /// (`resp_eq` and friends) on os/owner fields filter records
    pub fn list_hosts(&self, user: &UserContext, filters: Filters) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], SUPPORTED_FIELDS, &[]))
            .permission(Permission::ListHosts)
            .transactional(self.store.clone())
            .response_filters(RESPONSE_FILTER_FIELDS, true)
            .project(Self::host_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            filters,
            &|req: &mut Request| {
                let hosts =
                    self.executor
                        .list(EntityKind::Host, &req.args, &[OrderBy::asc("name")])?;
                let mut views = Vec::with_capacity(hosts.len());
                for host in hosts {
                    views.push(self.host_view(host)?);
                }
                Ok(Value::Array(views))
            },
        )
    }

    /// One host by id; a miss is `RecordNotExists` or `null` per
    /// `exception_when_missing`
    pub fn get_host(
        &self,
        user: &UserContext,
        host_id: i64,
        exception_when_missing: bool,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHosts)
            .transactional(self.store.clone())
            .project(Self::host_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let host = self.executor.get(
                    EntityKind::Host,
                    &filters_of(&[("id", json!(host_id))]),
                    exception_when_missing,
                )?;
                match host {
                    Some(host) => self.host_view(host),
                    None => Ok(Value::Null),
                }
            },
        )
    }

    /// Create a host and its state record
    pub fn add_host(&self, user: &UserContext, name: &str, mut attrs: Filters) -> Result<Value> {
        attrs.insert("name".to_string(), json!(name));
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(
                ADDED_HOST_FIELDS,
                OPTIONAL_ADDED_HOST_FIELDS,
                IGNORE_FIELDS,
            ))
            .validate_input("name", checks::check_name)
            .permission(Permission::AddHost)
            .transactional(self.store.clone())
            .project(Self::host_projection())
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

                let host = self
                    .executor
                    .add(EntityKind::Host, &[("name", name)], &extra, true)?;
                let host_id = require_id(&host)?;
                self.executor.add(
                    EntityKind::HostState,
                    &[("host_id", json!(host_id))],
                    &Filters::new(),
                    false,
                )?;
                self.host_view(host)
            },
        )
    }

    fn update_host_inner(
        &self,
        user: &UserContext,
        host_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], UPDATED_FIELDS, IGNORE_FIELDS))
            .validate_input("name", checks::check_name)
            .project(Self::host_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                let reinstall_os_set = req
                    .args
                    .get("reinstall_os")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                rules::is_host_editable(&host, &state, &req.ctx.user, reinstall_os_set, true)?;
                let updated = self.executor.update(EntityKind::Host, host_id, &req.args)?;
                self.host_view(updated)
            },
        )
    }

    /// Update one host's mutable fields
    pub fn update_host(&self, user: &UserContext, host_id: i64, attrs: Filters) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::UpdateHost)
            .transactional(self.store.clone())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| self.update_host_inner(&req.ctx.user, host_id, attrs.clone()),
        )
    }

    /// Update several hosts in one scope; each entry carries `host_id`
    /// alongside the fields to write
    pub fn update_hosts(&self, user: &UserContext, data: Vec<Filters>) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::UpdateHost)
            .transactional(self.store.clone())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let mut updated = Vec::with_capacity(data.len());
                for entry in &data {
                    let mut attrs = entry.clone();
                    let host_id = attrs
                        .remove("host_id")
                        .and_then(|v| v.as_i64())
                        .ok_or_else(|| {
                            Error::invalid_parameter("host_id not found in update entry")
                        })?;
                    updated.push(self.update_host_inner(&req.ctx.user, host_id, attrs)?);
                }
                Ok(Value::Array(updated))
            },
        )
    }

    /// Delete a host.
    ///
    /// Uninitialized hosts (or `from_database_only`) are removed
    /// synchronously with their sub-records. Otherwise the record stays and
    /// a delete task is enqueued carrying the caller and the affected
    /// cluster ids; `force` first marks dependent states `ERROR`.
    pub fn del_host(
        &self,
        user: &UserContext,
        host_id: i64,
        force: bool,
        from_database_only: bool,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::DelHost)
            .transactional(self.store.clone())
            .project(Self::del_host_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let mut state = self.host_state(host_id)?;
                if str_field(&state, "state") != Some(StateValue::Uninitialized.as_str()) && force
                {
                    state = self.executor.update(
                        EntityKind::HostState,
                        require_id(&state)?,
                        &filters_of(&[("state", json!(StateValue::Error.as_str()))]),
                    )?;
                }
                rules::is_host_editable(&host, &state, &req.ctx.user, true, true)?;

                let mut cluster_ids = Vec::new();
                for clusterhost in self.clusterhosts_of(host_id)? {
                    let clusterhost_id = require_id(&clusterhost)?;
                    let membership_state = self.get_required(
                        EntityKind::ClusterHostState,
                        &filters_of(&[("clusterhost_id", json!(clusterhost_id))]),
                    )?;
                    if str_field(&membership_state, "state")
                        != Some(StateValue::Uninitialized.as_str())
                        && force
                    {
                        self.executor.update(
                            EntityKind::ClusterHostState,
                            require_id(&membership_state)?,
                            &filters_of(&[("state", json!(StateValue::Error.as_str()))]),
                        )?;
                    }
                    let cluster_id = i64_field(&clusterhost, "cluster_id").ok_or_else(|| {
                        Error::database_exception("clusterhost has no cluster_id")
                    })?;
                    let cluster = self.executor.get_by_id(EntityKind::Cluster, cluster_id)?;
                    let cluster_state = self.get_required(
                        EntityKind::ClusterState,
                        &filters_of(&[("cluster_id", json!(cluster_id))]),
                    )?;
                    rules::is_cluster_editable(&cluster, &cluster_state, &req.ctx.user, true)?;
                    cluster_ids.push(cluster_id);
                }

                if str_field(&state, "state") == Some(StateValue::Uninitialized.as_str())
                    || from_database_only
                {
                    let view = self.host_view(host.clone())?;
                    self.cascade_delete_host(host_id)?;
                    Logger::info("host_deleted", &[("host_id", host_id.to_string())]);
                    Ok(view)
                } else {
                    Logger::info(
                        "host_delete_enqueued",
                        &[("host_id", host_id.to_string())],
                    );
                    self.dispatcher.enqueue(TaskRequest::DeleteHost {
                        initiator: req.ctx.user.email.clone(),
                        host_id,
                        cluster_ids,
                    })?;
                    let view = self.host_view(host)?;
                    Ok(json!({
                        "status": "delete action sent",
                        "host": view,
                    }))
                }
            },
        )
    }

    fn cascade_delete_host(&self, host_id: i64) -> Result<()> {
        let host_filter = filters_of(&[("host_id", json!(host_id))]);
        self.executor
            .delete_many(EntityKind::HostNetwork, &host_filter)?;
        self.executor
            .delete_many(EntityKind::HostLogHistory, &host_filter)?;
        for clusterhost in self.clusterhosts_of(host_id)? {
            let clusterhost_id = require_id(&clusterhost)?;
            self.executor.delete_many(
                EntityKind::ClusterHostState,
                &filters_of(&[("clusterhost_id", json!(clusterhost_id))]),
            )?;
        }
        self.executor
            .delete_many(EntityKind::ClusterHost, &host_filter)?;
        self.executor
            .delete_many(EntityKind::HostState, &host_filter)?;
        self.executor.delete(EntityKind::Host, host_id)?;
        Ok(())
    }

    /// Clusters the host belongs to
    pub fn get_host_clusters(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHostClusters)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_CLUSTER_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                self.executor.get_by_id(EntityKind::Host, host_id)?;
                let mut clusters = Vec::new();
                for clusterhost in self.clusterhosts_of(host_id)? {
                    let cluster_id = i64_field(&clusterhost, "cluster_id").ok_or_else(|| {
                        Error::database_exception("clusterhost has no cluster_id")
                    })?;
                    clusters.push(Value::Object(
                        self.executor.get_by_id(EntityKind::Cluster, cluster_id)?,
                    ));
                }
                Ok(Value::Array(clusters))
            },
        )
    }

    /// Structural validation of a host: hostname, networks, one
    /// non-promiscuous management interface
    pub fn validate_host(&self, host_id: i64) -> Result<()> {
        let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
        let networks = self.networks_of(host_id)?;
        rules::validate_host(&host, &networks)
    }

    // ------------------------------------------------------------------
    // config
    // ------------------------------------------------------------------

    /// Editable configuration of a host
    pub fn get_host_config(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHostConfig)
            .transactional(self.store.clone())
            .project(Self::config_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                self.host_view(host)
            },
        )
    }

    /// Replace a host's os config wholesale (exposed as `os_config`)
    pub fn update_host_config(
        &self,
        user: &UserContext,
        host_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .rename("os_config", "put_os_config")
            .args(ArgSchema::new(UPDATED_CONFIG_FIELDS, &[], IGNORE_FIELDS))
            .permission(Permission::AddHostConfig)
            .transactional(self.store.clone())
            .validate_input("put_os_config", checks::check_os_config)
            .project(Self::config_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                rules::is_host_editable(&host, &state, &req.ctx.user, false, true)?;
                let config = req
                    .args
                    .get("put_os_config")
                    .cloned()
                    .ok_or_else(|| Error::invalid_parameter("put_os_config not found"))?;
                let updated = self.executor.update(
                    EntityKind::Host,
                    host_id,
                    &filters_of(&[("os_config", config)]),
                )?;
                self.host_view(updated)
            },
        )
    }

    /// Deep-merge a partial os config into the existing one
    pub fn patch_host_config(
        &self,
        user: &UserContext,
        host_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .rename("os_config", "patched_os_config")
            .args(ArgSchema::new(PATCHED_CONFIG_FIELDS, &[], IGNORE_FIELDS))
            .permission(Permission::AddHostConfig)
            .transactional(self.store.clone())
            .validate_output("os_config", checks::check_os_config)
            .project(Self::config_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                rules::is_host_editable(&host, &state, &req.ctx.user, false, true)?;
                let patch = req
                    .args
                    .get("patched_os_config")
                    .cloned()
                    .ok_or_else(|| Error::invalid_parameter("patched_os_config not found"))?;
                let mut config = host.get("os_config").cloned().unwrap_or_else(|| json!({}));
                merge_values(&mut config, &patch);
                let updated = self.executor.update(
                    EntityKind::Host,
                    host_id,
                    &filters_of(&[("os_config", config)]),
                )?;
                self.host_view(updated)
            },
        )
    }

    /// Configuration actually deployed onto the host
    pub fn get_host_deployed_config(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHostConfig)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_DEPLOYED_CONFIG_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                Ok(Value::Object(host))
            },
        )
    }

    /// Record the deployed config; requires an editable, validated host
    pub fn update_host_deployed_config(
        &self,
        user: &UserContext,
        host_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .rename("os_config", "deployed_os_config")
            .args(ArgSchema::new(
                UPDATED_DEPLOYED_CONFIG_FIELDS,
                &[],
                IGNORE_FIELDS,
            ))
            .permission(Permission::AddHostConfig)
            .transactional(self.store.clone())
            .validate_input("deployed_os_config", checks::check_os_config)
            .project(Self::config_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                rules::is_host_editable(&host, &state, &req.ctx.user, false, true)?;
                rules::is_host_validated(&host)?;
                let config = req
                    .args
                    .get("deployed_os_config")
                    .cloned()
                    .ok_or_else(|| Error::invalid_parameter("deployed_os_config not found"))?;
                let updated = self.executor.update(
                    EntityKind::Host,
                    host_id,
                    &filters_of(&[("deployed_os_config", config)]),
                )?;
                self.host_view(updated)
            },
        )
    }

    /// Clear the editable config and reset the validation flag
    pub fn del_host_config(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::DelHostConfig)
            .transactional(self.store.clone())
            .project(Self::config_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                rules::is_host_editable(&host, &state, &req.ctx.user, false, true)?;
                let updated = self.executor.update(
                    EntityKind::Host,
                    host_id,
                    &filters_of(&[
                        ("os_config", json!({})),
                        ("config_validated", json!(false)),
                    ]),
                )?;
                self.host_view(updated)
            },
        )
    }

    // ------------------------------------------------------------------
    // networks
    // ------------------------------------------------------------------

    /// Networks of one host
    pub fn list_host_networks(
        &self,
        user: &UserContext,
        host_id: i64,
        filters: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], SUPPORTED_NETWORK_FIELDS, &[]))
            .permission(Permission::ListHostNetworks)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            filters,
            &|req: &mut Request| {
                let mut filters = req.args.clone();
                filters.insert("host_id".to_string(), json!(host_id));
                let networks =
                    self.executor
                        .list(EntityKind::HostNetwork, &filters, &[OrderBy::asc("ip")])?;
                Ok(Value::Array(
                    networks.into_iter().map(Value::Object).collect(),
                ))
            },
        )
    }

    /// Networks across all hosts
    pub fn list_hostnetworks(&self, user: &UserContext, filters: Filters) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], SUPPORTED_NETWORK_FIELDS, &[]))
            .permission(Permission::ListHostNetworks)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            filters,
            &|req: &mut Request| {
                let networks = self.executor.list(
                    EntityKind::HostNetwork,
                    &req.args,
                    &[OrderBy::asc("ip")],
                )?;
                Ok(Value::Array(
                    networks.into_iter().map(Value::Object).collect(),
                ))
            },
        )
    }

    /// One network of one host; claiming the wrong host is a miss
    pub fn get_host_network(
        &self,
        user: &UserContext,
        host_id: i64,
        host_network_id: i64,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHostNetworks)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let network = self
                    .executor
                    .get_by_id(EntityKind::HostNetwork, host_network_id)?;
                if i64_field(&network, "host_id") != Some(host_id) {
                    return Err(Error::record_not_exists(format!(
                        "host {} does not own host network {}",
                        host_id, host_network_id
                    )));
                }
                Ok(Value::Object(network))
            },
        )
    }

    /// One network by id
    pub fn get_hostnetwork(&self, user: &UserContext, host_network_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::ListHostNetworks)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                Ok(Value::Object(
                    self.executor
                        .get_by_id(EntityKind::HostNetwork, host_network_id)?,
                ))
            },
        )
    }

    fn add_host_network_inner(
        &self,
        user: &UserContext,
        host_id: i64,
        exception_when_existing: bool,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(
                ADDED_NETWORK_FIELDS,
                OPTIONAL_ADDED_NETWORK_FIELDS,
                IGNORE_FIELDS,
            ))
            .validate_input("ip", checks::check_ip)
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                rules::is_host_editable(&host, &state, &req.ctx.user, false, true)?;

                let interface = req
                    .args
                    .get("interface")
                    .cloned()
                    .ok_or_else(|| Error::invalid_parameter("interface not found"))?;
                let mut extra = req.args.clone();
                extra.remove("interface");
                let network = self.executor.add(
                    EntityKind::HostNetwork,
                    &[("host_id", json!(host_id)), ("interface", interface)],
                    &extra,
                    exception_when_existing,
                )?;
                Ok(Value::Object(network))
            },
        )
    }

    /// Attach a network interface to a host
    pub fn add_host_network(
        &self,
        user: &UserContext,
        host_id: i64,
        exception_when_existing: bool,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::AddHostNetwork)
            .transactional(self.store.clone())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                self.add_host_network_inner(
                    &req.ctx.user,
                    host_id,
                    exception_when_existing,
                    attrs.clone(),
                )
            },
        )
    }

    /// Bulk network creation across hosts.
    ///
    /// Entries whose IP already belongs to a different host/interface are
    /// split out into `failed_hosts` instead of failing the call.
    pub fn add_host_networks(
        &self,
        user: &UserContext,
        exception_when_existing: bool,
        data: Vec<Filters>,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::AddHostNetwork)
            .transactional(self.store.clone())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let mut hosts = Vec::new();
                let mut failed_hosts = Vec::new();
                for entry in &data {
                    let host_id = entry
                        .get("host_id")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| {
                            Error::invalid_parameter("host_id not found in networks entry")
                        })?;
                    let networks = entry
                        .get("networks")
                        .and_then(Value::as_array)
                        .ok_or_else(|| {
                            Error::invalid_parameter("networks not found in networks entry")
                        })?;

                    let mut added = Vec::new();
                    let mut failed = Vec::new();
                    for network in networks {
                        let fields = network.as_object().ok_or_else(|| {
                            Error::invalid_parameter("network entry is not an object")
                        })?;
                        let conflict = match fields.get("ip") {
                            Some(ip) => self
                                .executor
                                .get(
                                    EntityKind::HostNetwork,
                                    &filters_of(&[("ip", ip.clone())]),
                                    false,
                                )?
                                .filter(|existing| {
                                    i64_field(existing, "host_id") != Some(host_id)
                                        || str_field(existing, "interface")
                                            != fields.get("interface").and_then(Value::as_str)
                                }),
                            None => None,
                        };
                        if let Some(existing) = conflict {
                            Logger::error(
                                "ip_conflict",
                                &[
                                    ("ip", format!("{}", fields.get("ip").unwrap_or(&Value::Null))),
                                    (
                                        "host_network_id",
                                        require_id(&existing)?.to_string(),
                                    ),
                                ],
                            );
                            failed.push(network.clone());
                            continue;
                        }
                        added.push(self.add_host_network_inner(
                            &req.ctx.user,
                            host_id,
                            exception_when_existing,
                            fields.clone(),
                        )?);
                    }
                    if !added.is_empty() {
                        hosts.push(json!({"host_id": host_id, "networks": added}));
                    }
                    if !failed.is_empty() {
                        failed_hosts.push(json!({"host_id": host_id, "networks": failed}));
                    }
                }
                Ok(json!({"hosts": hosts, "failed_hosts": failed_hosts}))
            },
        )
    }

    fn update_host_network_body(
        &self,
        user: &UserContext,
        network: Record,
        attrs: &Filters,
    ) -> Result<Value> {
        let host_id = i64_field(&network, "host_id")
            .ok_or_else(|| Error::database_exception("host network has no host_id"))?;
        let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
        let state = self.host_state(host_id)?;
        rules::is_host_editable(&host, &state, user, false, true)?;
        let updated =
            self.executor
                .update(EntityKind::HostNetwork, require_id(&network)?, attrs)?;
        Ok(Value::Object(updated))
    }

    /// Update a network of one host; claiming the wrong host is a miss
    pub fn update_host_network(
        &self,
        user: &UserContext,
        host_id: i64,
        host_network_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], UPDATED_NETWORK_FIELDS, IGNORE_FIELDS))
            .validate_input("ip", checks::check_ip)
            .permission(Permission::AddHostNetwork)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let network = self
                    .executor
                    .get_by_id(EntityKind::HostNetwork, host_network_id)?;
                if i64_field(&network, "host_id") != Some(host_id) {
                    return Err(Error::record_not_exists(format!(
                        "host {} does not own host network {}",
                        host_id, host_network_id
                    )));
                }
                self.update_host_network_body(&req.ctx.user, network, &req.args)
            },
        )
    }

    /// Update a network by id
    pub fn update_hostnetwork(
        &self,
        user: &UserContext,
        host_network_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], UPDATED_NETWORK_FIELDS, IGNORE_FIELDS))
            .validate_input("ip", checks::check_ip)
            .permission(Permission::AddHostNetwork)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let network = self
                    .executor
                    .get_by_id(EntityKind::HostNetwork, host_network_id)?;
                self.update_host_network_body(&req.ctx.user, network, &req.args)
            },
        )
    }

    /// Remove a network of one host; claiming the wrong host is a miss
    pub fn del_host_network(
        &self,
        user: &UserContext,
        host_id: i64,
        host_network_id: i64,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::DelHostNetwork)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let network = self
                    .executor
                    .get_by_id(EntityKind::HostNetwork, host_network_id)?;
                if i64_field(&network, "host_id") != Some(host_id) {
                    return Err(Error::record_not_exists(format!(
                        "host {} does not own host network {}",
                        host_id, host_network_id
                    )));
                }
                self.del_host_network_body(&req.ctx.user, network)
            },
        )
    }

    /// Remove a network by id
    pub fn del_hostnetwork(&self, user: &UserContext, host_network_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::DelHostNetwork)
            .transactional(self.store.clone())
            .project(Self::network_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|req: &mut Request| {
                let network = self
                    .executor
                    .get_by_id(EntityKind::HostNetwork, host_network_id)?;
                self.del_host_network_body(&req.ctx.user, network)
            },
        )
    }

    fn del_host_network_body(&self, user: &UserContext, network: Record) -> Result<Value> {
        let host_id = i64_field(&network, "host_id")
            .ok_or_else(|| Error::database_exception("host network has no host_id"))?;
        let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
        let state = self.host_state(host_id)?;
        rules::is_host_editable(&host, &state, user, false, true)?;
        let removed = self
            .executor
            .delete(EntityKind::HostNetwork, require_id(&network)?)?;
        Ok(Value::Object(removed))
    }

    // ------------------------------------------------------------------
    // state
    // ------------------------------------------------------------------

    /// Current lifecycle state of a host
    pub fn get_host_state(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .permission(Permission::GetHostState)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_STATE_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                self.executor.get_by_id(EntityKind::Host, host_id)?;
                Ok(Value::Object(self.host_state(host_id)?))
            },
        )
    }

    /// Caller-driven state update (progress, message, severity)
    pub fn update_host_state(
        &self,
        user: &UserContext,
        host_id: i64,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], UPDATED_STATE_FIELDS, IGNORE_FIELDS))
            .validate_input("state", checks::check_state)
            .validate_input("percentage", checks::check_percentage)
            .permission(Permission::UpdateHostState)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_STATE_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                self.executor.get_by_id(EntityKind::Host, host_id)?;
                let state = self.host_state(host_id)?;
                let updated =
                    self.executor
                        .update(EntityKind::HostState, require_id(&state)?, &req.args)?;
                Ok(Value::Object(updated))
            },
        )
    }

    /// State update from the task system, driving readiness propagation.
    ///
    /// A rising `ready` edge computes, per cluster the host belongs to,
    /// whether the membership is immediately ready (no distributed system)
    /// and whether every other member already reports OS-ready, and
    /// forwards both maps as an os-installed notification. Otherwise the
    /// fields are written directly, and a not-ready result cascades
    /// `ready=false` into every membership and cluster of the host.
    pub fn update_host_state_internal(
        &self,
        user: &UserContext,
        host: HostRef,
        from_database_only: bool,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(
                &[],
                UPDATED_STATE_INTERNAL_FIELDS,
                IGNORE_FIELDS,
            ))
            .permission(Permission::UpdateHostState)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_DEPLOY_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let host = match &host {
                    HostRef::Id(id) => self.executor.get_by_id(EntityKind::Host, *id)?,
                    HostRef::Name(name) => self.get_required(
                        EntityKind::Host,
                        &filters_of(&[("name", json!(name))]),
                    )?,
                };
                let host_id = require_id(&host)?;
                let host_name = str_field(&host, "name").unwrap_or("<unnamed>").to_string();
                let state = self.host_state(host_id)?;

                let ready_requested = req
                    .args
                    .get("ready")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let ready_triggered = ready_requested && !bool_field(&state, "ready");

                let mut clusterhost_ready = BTreeMap::new();
                let mut cluster_os_ready = BTreeMap::new();
                if ready_triggered {
                    for clusterhost in self.clusterhosts_of(host_id)? {
                        let cluster_id =
                            i64_field(&clusterhost, "cluster_id").ok_or_else(|| {
                                Error::database_exception("clusterhost has no cluster_id")
                            })?;
                        let cluster = self.executor.get_by_id(EntityKind::Cluster, cluster_id)?;
                        // no distributed system: the membership is ready as
                        // soon as the OS is
                        let no_distributed_system = str_field(&cluster, "distributed_system_name")
                            .map_or(true, str::is_empty);
                        clusterhost_ready.insert(cluster_id, no_distributed_system);

                        let mut all_os_ready = true;
                        for member in self.executor.list(
                            EntityKind::ClusterHost,
                            &filters_of(&[("cluster_id", json!(cluster_id))]),
                            &[],
                        )? {
                            let member_host_id =
                                i64_field(&member, "host_id").ok_or_else(|| {
                                    Error::database_exception("clusterhost has no host_id")
                                })?;
                            if member_host_id == host_id {
                                continue;
                            }
                            let member_state = self.get_required(
                                EntityKind::HostState,
                                &filters_of(&[("host_id", json!(member_host_id))]),
                            )?;
                            if !bool_field(&member_state, "ready") {
                                all_os_ready = false;
                            }
                        }
                        cluster_os_ready.insert(cluster_id, all_os_ready);
                    }
                }
                Logger::info(
                    "host_ready_update",
                    &[
                        ("host", host_name.clone()),
                        ("ready_triggered", ready_triggered.to_string()),
                    ],
                );

                if !ready_triggered || from_database_only {
                    let updated = self.executor.update(
                        EntityKind::HostState,
                        require_id(&state)?,
                        &req.args,
                    )?;
                    if !bool_field(&updated, "ready") {
                        for clusterhost in self.clusterhosts_of(host_id)? {
                            let clusterhost_id = require_id(&clusterhost)?;
                            let membership_state = self.get_required(
                                EntityKind::ClusterHostState,
                                &filters_of(&[("clusterhost_id", json!(clusterhost_id))]),
                            )?;
                            self.executor.update(
                                EntityKind::ClusterHostState,
                                require_id(&membership_state)?,
                                &filters_of(&[("ready", json!(false))]),
                            )?;
                            let cluster_id =
                                i64_field(&clusterhost, "cluster_id").ok_or_else(|| {
                                    Error::database_exception("clusterhost has no cluster_id")
                                })?;
                            let cluster_state = self.get_required(
                                EntityKind::ClusterState,
                                &filters_of(&[("cluster_id", json!(cluster_id))]),
                            )?;
                            self.executor.update(
                                EntityKind::ClusterState,
                                require_id(&cluster_state)?,
                                &filters_of(&[("ready", json!(false))]),
                            )?;
                        }
                    }
                    Ok(json!({
                        "status": format!("{} state is updated", host_name),
                        "host": updated,
                    }))
                } else {
                    self.dispatcher.enqueue(TaskRequest::OsInstalled {
                        host_id,
                        clusterhost_ready: clusterhost_ready.clone(),
                        cluster_os_ready: cluster_os_ready.clone(),
                    })?;
                    let status = format!(
                        "{}: clusterhost ready {:?} cluster os ready {:?}",
                        host_name, clusterhost_ready, cluster_os_ready
                    );
                    Logger::info("os_installed_enqueued", &[("status", status.clone())]);
                    Ok(json!({
                        "status": status,
                        "host": state,
                    }))
                }
            },
        )
    }

    // ------------------------------------------------------------------
    // log histories
    // ------------------------------------------------------------------

    /// All log-history records of a host
    pub fn get_host_log_histories(&self, user: &UserContext, host_id: i64) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .transactional(self.store.clone())
            .project(Projection::new(RESP_LOG_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let logs = self.executor.list(
                    EntityKind::HostLogHistory,
                    &filters_of(&[("host_id", json!(host_id))]),
                    &[OrderBy::asc("filename")],
                )?;
                Ok(Value::Array(logs.into_iter().map(Value::Object).collect()))
            },
        )
    }

    /// One log-history record keyed by (host, filename)
    pub fn get_host_log_history(
        &self,
        user: &UserContext,
        host_id: i64,
        filename: &str,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::none())
            .transactional(self.store.clone())
            .project(Projection::new(RESP_LOG_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            Filters::new(),
            &|_req: &mut Request| {
                let log = self.get_required(
                    EntityKind::HostLogHistory,
                    &filters_of(&[("host_id", json!(host_id)), ("filename", json!(filename))]),
                )?;
                Ok(Value::Object(log))
            },
        )
    }

    /// Track a new log file for a host
    pub fn add_host_log_history(
        &self,
        user: &UserContext,
        host_id: i64,
        exception_when_existing: bool,
        filename: &str,
        mut attrs: Filters,
    ) -> Result<Value> {
        attrs.insert("filename".to_string(), json!(filename));
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(
                ADDED_LOG_FIELDS,
                UPDATED_LOG_FIELDS,
                IGNORE_FIELDS,
            ))
            .transactional(self.store.clone())
            .project(Projection::new(RESP_LOG_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                self.executor.get_by_id(EntityKind::Host, host_id)?;
                let filename = req
                    .args
                    .get("filename")
                    .cloned()
                    .ok_or_else(|| Error::invalid_parameter("filename not found"))?;
                let mut extra = req.args.clone();
                extra.remove("filename");
                let log = self.executor.add(
                    EntityKind::HostLogHistory,
                    &[("host_id", json!(host_id)), ("filename", filename)],
                    &extra,
                    exception_when_existing,
                )?;
                Ok(Value::Object(log))
            },
        )
    }

    /// Advance the stream position and matcher bookkeeping of a log file
    pub fn update_host_log_history(
        &self,
        user: &UserContext,
        host_id: i64,
        filename: &str,
        attrs: Filters,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(ArgSchema::new(&[], UPDATED_LOG_FIELDS, IGNORE_FIELDS))
            .validate_input("percentage", checks::check_percentage)
            .transactional(self.store.clone())
            .project(Projection::new(RESP_LOG_FIELDS))
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            attrs,
            &|req: &mut Request| {
                let log = self.get_required(
                    EntityKind::HostLogHistory,
                    &filters_of(&[("host_id", json!(host_id)), ("filename", json!(filename))]),
                )?;
                let updated = self.executor.update(
                    EntityKind::HostLogHistory,
                    require_id(&log)?,
                    &req.args,
                )?;
                Ok(Value::Object(updated))
            },
        )
    }

    // ------------------------------------------------------------------
    // power actions
    // ------------------------------------------------------------------

    fn power_action(
        &self,
        user: &UserContext,
        host_id: i64,
        args: Filters,
        schema: ArgSchema,
        make_request: fn(i64) -> TaskRequest,
        verb: &'static str,
    ) -> Result<Value> {
        let pipeline = PipelineBuilder::new()
            .args(schema)
            .permission(Permission::DeployHost)
            .transactional(self.store.clone())
            .project(Self::deploy_projection())
            .build();
        pipeline.execute(
            RequestContext::new(user.clone()),
            args,
            &|_req: &mut Request| {
                let host = self.executor.get_by_id(EntityKind::Host, host_id)?;
                rules::is_host_validated(&host)?;
                self.dispatcher.enqueue(make_request(host_id))?;
                let name = str_field(&host, "name").unwrap_or("<unnamed>").to_string();
                let view = self.host_view(host.clone())?;
                Ok(json!({
                    "status": format!("{} {} action sent", verb, name),
                    "host": view,
                }))
            },
        )
    }

    /// Power a host on via the task system
    pub fn poweron_host(&self, user: &UserContext, host_id: i64, args: Filters) -> Result<Value> {
        self.power_action(
            user,
            host_id,
            args,
            ArgSchema::new(&[], &["poweron"], &[]),
            |host_id| TaskRequest::PowerOnHost { host_id },
            "poweron",
        )
    }

    /// Power a host off via the task system
    pub fn poweroff_host(&self, user: &UserContext, host_id: i64, args: Filters) -> Result<Value> {
        self.power_action(
            user,
            host_id,
            args,
            ArgSchema::new(&[], &["poweroff"], &[]),
            |host_id| TaskRequest::PowerOffHost { host_id },
            "poweroff",
        )
    }

    /// Reset a host via the task system
    pub fn reset_host(&self, user: &UserContext, host_id: i64, args: Filters) -> Result<Value> {
        self.power_action(
            user,
            host_id,
            args,
            ArgSchema::new(&[], &["reset"], &[]),
            |host_id| TaskRequest::ResetHost { host_id },
            "reset",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::RecordingDispatcher;

    fn setup() -> (HostService, Arc<RecordingDispatcher>, UserContext) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let service = HostService::new(store, dispatcher.clone());
        let user = UserContext::admin(1, "root@local");
        (service, dispatcher, user)
    }

    fn add_host(service: &HostService, user: &UserContext, name: &str) -> i64 {
        let host = service.add_host(user, name, Filters::new()).unwrap();
        host["id"].as_i64().unwrap()
    }

    fn add_network(service: &HostService, user: &UserContext, host_id: i64, ip: &str) -> i64 {
        let attrs = json!({"interface": "eth0", "ip": ip, "subnet_id": 1, "is_mgmt": true})
            .as_object()
            .cloned()
            .unwrap();
        let network = service
            .add_host_network(user, host_id, true, attrs)
            .unwrap();
        network["id"].as_i64().unwrap()
    }

    #[test]
    fn test_add_and_get_host() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");

        let host = service.get_host(&user, host_id, true).unwrap();
        assert_eq!(host["name"], json!("web-1"));
        assert_eq!(host["hostname"], json!("web-1"));
        assert_eq!(host["networks"], json!([]));
        // undeclared fields never survive projection
        assert!(host.get("creator_id").is_none());
    }

    #[test]
    fn test_get_host_missing_modes() {
        let (service, _dispatcher, user) = setup();
        let err = service.get_host(&user, 42, true).unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_EXISTS");
        assert_eq!(service.get_host(&user, 42, false).unwrap(), Value::Null);
    }

    #[test]
    fn test_list_hosts_unsupported_filter_key() {
        let (service, _dispatcher, user) = setup();
        let filters = json!({"flavor": "large"}).as_object().cloned().unwrap();
        let err = service.list_hosts(&user, filters).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
        assert!(err.to_string().contains("flavor"));
    }

    #[test]
    fn test_list_hosts_with_response_filter() {
        let (service, _dispatcher, user) = setup();
        let a = add_host(&service, &user, "a");
        add_host(&service, &user, "b");
        service
            .update_host_config(
                &user,
                a,
                json!({"os_config": {"general": {}}}).as_object().cloned().unwrap(),
            )
            .unwrap();

        // os_name is unset on both hosts; missing_ok keeps them
        let filters = json!({"os_name": {"resp_eq": "CentOS"}})
            .as_object()
            .cloned()
            .unwrap();
        let listed = service.list_hosts(&user, filters).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_update_host_requires_permission() {
        let (service, _dispatcher, admin) = setup();
        let host_id = add_host(&service, &admin, "web-1");

        let outsider = UserContext::new(9, "nobody@local");
        let err = service
            .update_host(&outsider, host_id, Filters::new())
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_update_host_rejects_unknown_field() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");
        let attrs = json!({"os_config": {}}).as_object().cloned().unwrap();
        let err = service.update_host(&user, host_id, attrs).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_update_host_ignored_keys_dropped() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");
        let attrs = json!({"name": "web-2", "id": 777, "created_at": "bogus"})
            .as_object()
            .cloned()
            .unwrap();
        let updated = service.update_host(&user, host_id, attrs).unwrap();
        assert_eq!(updated["name"], json!("web-2"));
        assert_eq!(updated["id"], json!(host_id));
    }

    #[test]
    fn test_config_put_and_patch() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");

        service
            .update_host_config(
                &user,
                host_id,
                json!({"os_config": {"general": {"lang": "EN"}}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .unwrap();
        let patched = service
            .patch_host_config(
                &user,
                host_id,
                json!({"os_config": {"general": {"timezone": "UTC"}}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(
            patched["os_config"],
            json!({"general": {"lang": "EN", "timezone": "UTC"}})
        );

        let cleared = service.del_host_config(&user, host_id).unwrap();
        assert_eq!(cleared["os_config"], json!({}));
        assert_eq!(cleared["config_validated"], json!(false));
    }

    #[test]
    fn test_deployed_config_requires_validated_host() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");
        let attrs = json!({"os_config": {"general": {}}})
            .as_object()
            .cloned()
            .unwrap();
        let err = service
            .update_host_deployed_config(&user, host_id, attrs.clone())
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        service
            .executor
            .update(
                EntityKind::Host,
                host_id,
                &filters_of(&[("config_validated", json!(true))]),
            )
            .unwrap();
        let updated = service
            .update_host_deployed_config(&user, host_id, attrs)
            .unwrap();
        assert_eq!(updated["config_validated"], json!(true));
        let deployed = service.get_host_deployed_config(&user, host_id).unwrap();
        assert_eq!(deployed, json!({"deployed_os_config": {"general": {}}}));
    }

    #[test]
    fn test_network_ownership_check() {
        let (service, _dispatcher, user) = setup();
        let a = add_host(&service, &user, "a");
        let b = add_host(&service, &user, "b");
        let network_id = add_network(&service, &user, a, "10.0.0.1");

        let err = service.get_host_network(&user, b, network_id).unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_EXISTS");
        assert!(service.get_host_network(&user, a, network_id).is_ok());
    }

    #[test]
    fn test_duplicate_ip_across_hosts_rejected() {
        let (service, _dispatcher, user) = setup();
        let a = add_host(&service, &user, "a");
        let b = add_host(&service, &user, "b");
        add_network(&service, &user, a, "10.0.0.1");

        let attrs = json!({"interface": "eth0", "ip": "10.0.0.1", "subnet_id": 1})
            .as_object()
            .cloned()
            .unwrap();
        let err = service.add_host_network(&user, b, true, attrs).unwrap_err();
        assert_eq!(err.code(), "DUPLICATED_RECORD");
    }

    #[test]
    fn test_add_host_networks_bulk_splits_failures() {
        let (service, _dispatcher, user) = setup();
        let a = add_host(&service, &user, "a");
        let b = add_host(&service, &user, "b");
        add_network(&service, &user, a, "10.0.0.1");

        let data = vec![json!({
            "host_id": b,
            "networks": [
                {"interface": "eth0", "ip": "10.0.0.1", "subnet_id": 1},
                {"interface": "eth1", "ip": "10.0.0.2", "subnet_id": 1}
            ]
        })
        .as_object()
        .cloned()
        .unwrap()];
        let result = service.add_host_networks(&user, false, data).unwrap();
        assert_eq!(result["hosts"].as_array().unwrap().len(), 1);
        assert_eq!(result["failed_hosts"].as_array().unwrap().len(), 1);
        assert_eq!(
            result["failed_hosts"][0]["networks"][0]["ip"],
            json!("10.0.0.1")
        );
    }

    #[test]
    fn test_log_history_round_trip() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");

        service
            .add_host_log_history(&user, host_id, false, "install.log", Filters::new())
            .unwrap();
        let updated = service
            .update_host_log_history(
                &user,
                host_id,
                "install.log",
                json!({"position": 2048, "percentage": 35, "line_matcher_name": "start"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(updated["position"], json!(2048));
        assert_eq!(updated["line_matcher_name"], json!("start"));

        let listed = service.get_host_log_histories(&user, host_id).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_power_actions_require_validated_config() {
        let (service, dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");

        let err = service
            .poweron_host(&user, host_id, Filters::new())
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert!(dispatcher.sent().is_empty());

        service
            .executor
            .update(
                EntityKind::Host,
                host_id,
                &filters_of(&[("config_validated", json!(true))]),
            )
            .unwrap();
        let result = service.poweron_host(&user, host_id, Filters::new()).unwrap();
        assert_eq!(result["status"], json!("poweron web-1 action sent"));
        assert_eq!(dispatcher.sent(), vec![TaskRequest::PowerOnHost { host_id }]);
    }

    #[test]
    fn test_power_action_rejects_unknown_kwarg() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");
        let args = json!({"reset": {}}).as_object().cloned().unwrap();
        let err = service.poweron_host(&user, host_id, args).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_validate_host_requires_mgmt_interface() {
        let (service, _dispatcher, user) = setup();
        let host_id = add_host(&service, &user, "web-1");
        assert!(service.validate_host(host_id).is_err());
        add_network(&service, &user, host_id, "10.0.0.1");
        assert!(service.validate_host(host_id).is_ok());
    }
}
