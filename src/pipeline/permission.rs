//! Permission check stage
//!
//! Every operation declares the capability its caller must hold; the stage
//! fails the request with `Forbidden` otherwise.

use serde_json::Value;

use crate::error::{Error, Result};

use super::{Next, Request, Stage};

/// Capabilities guarding the operation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ListHosts,
    ListHostClusters,
    AddHost,
    UpdateHost,
    DelHost,
    ListHostConfig,
    AddHostConfig,
    DelHostConfig,
    ListHostNetworks,
    AddHostNetwork,
    DelHostNetwork,
    GetHostState,
    UpdateHostState,
    DeployHost,
    ListClusters,
    AddCluster,
    UpdateCluster,
}

impl Permission {
    /// Stable name used in error messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            Permission::ListHosts => "list_hosts",
            Permission::ListHostClusters => "list_host_clusters",
            Permission::AddHost => "add_host",
            Permission::UpdateHost => "update_host",
            Permission::DelHost => "del_host",
            Permission::ListHostConfig => "list_host_config",
            Permission::AddHostConfig => "add_host_config",
            Permission::DelHostConfig => "del_host_config",
            Permission::ListHostNetworks => "list_host_networks",
            Permission::AddHostNetwork => "add_host_network",
            Permission::DelHostNetwork => "del_host_network",
            Permission::GetHostState => "get_host_state",
            Permission::UpdateHostState => "update_host_state",
            Permission::DeployHost => "deploy_host",
            Permission::ListClusters => "list_clusters",
            Permission::AddCluster => "add_cluster",
            Permission::UpdateCluster => "update_cluster",
        }
    }
}

pub(super) struct PermissionStage {
    permission: Permission,
}

impl PermissionStage {
    pub(super) fn new(permission: Permission) -> Self {
        Self { permission }
    }
}

impl Stage for PermissionStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        if !req.ctx.user.allowed(self.permission) {
            return Err(Error::forbidden(format!(
                "user {} does not have permission {}",
                req.ctx.user.email,
                self.permission.name()
            )));
        }
        next.run(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, RequestContext, UserContext};
    use crate::query::Filters;
    use serde_json::json;

    fn handler(_req: &mut Request) -> Result<Value> {
        Ok(json!({"ok": true}))
    }

    #[test]
    fn test_holder_passes() {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::ListHosts)
            .build();
        let user = UserContext::new(1, "ops@local").grant(Permission::ListHosts);
        let result = pipeline
            .execute(RequestContext::new(user), Filters::new(), &handler)
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[test]
    fn test_missing_capability_is_forbidden() {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::DelHost)
            .build();
        let user = UserContext::new(1, "ops@local").grant(Permission::ListHosts);
        let err = pipeline
            .execute(RequestContext::new(user), Filters::new(), &handler)
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_admin_bypasses() {
        let pipeline = PipelineBuilder::new()
            .permission(Permission::DelHost)
            .build();
        let user = UserContext::admin(1, "root@local");
        assert!(pipeline
            .execute(RequestContext::new(user), Filters::new(), &handler)
            .is_ok());
    }
}
