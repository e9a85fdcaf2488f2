//! Request context
//!
//! Carried through the pipeline: caller identity plus a request id for
//! tracing.

use std::collections::HashSet;

use uuid::Uuid;

use super::permission::Permission;

/// Context carried through the pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request id for tracing
    pub request_id: Uuid,
    /// Caller identity
    pub user: UserContext,
}

impl RequestContext {
    /// Create a context for the given caller
    pub fn new(user: UserContext) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user,
        }
    }
}

/// Caller identity and capabilities
#[derive(Debug, Clone)]
pub struct UserContext {
    /// Stable user id; hosts record it as `creator_id`
    pub id: i64,
    /// Email, forwarded to the task system as the action initiator
    pub email: String,
    /// Administrators hold every capability
    pub is_admin: bool,
    permissions: HashSet<Permission>,
}

impl UserContext {
    /// A regular user with no capabilities yet
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            is_admin: false,
            permissions: HashSet::new(),
        }
    }

    /// An administrator
    pub fn admin(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            is_admin: true,
            permissions: HashSet::new(),
        }
    }

    /// Grant a capability
    pub fn grant(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    /// Whether the caller holds a capability
    pub fn allowed(&self, permission: Permission) -> bool {
        self.is_admin || self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_holds_everything() {
        let user = UserContext::admin(1, "root@local");
        assert!(user.allowed(Permission::DelHost));
        assert!(user.allowed(Permission::ListHosts));
    }

    #[test]
    fn test_grants_are_explicit() {
        let user = UserContext::new(2, "ops@local").grant(Permission::ListHosts);
        assert!(user.allowed(Permission::ListHosts));
        assert!(!user.allowed(Permission::DelHost));
    }

    #[test]
    fn test_contexts_get_distinct_request_ids() {
        let user = UserContext::new(2, "ops@local");
        let a = RequestContext::new(user.clone());
        let b = RequestContext::new(user);
        assert_ne!(a.request_id, b.request_id);
    }
}
