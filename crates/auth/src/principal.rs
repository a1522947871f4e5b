use serde::{Deserialize, Serialize};

use lotledger_core::TenantId;

use crate::{Permission, Role};

/// An operator's membership in a tenant.
///
/// This is an authorization boundary object: it states *which tenant* the
/// operator is acting within and which roles/permissions are granted there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl TenantMembership {
    pub fn new(tenant_id: TenantId, roles: Vec<Role>) -> Self {
        Self {
            tenant_id,
            roles,
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Explicit permissions plus everything granted through roles.
    pub fn effective_permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.permissions
            .iter()
            .cloned()
            .chain(self.roles.iter().flat_map(Role::permissions))
    }
}
