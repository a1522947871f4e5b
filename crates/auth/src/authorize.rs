use serde::{Deserialize, Serialize};
use thiserror::Error;

use lotledger_core::{TenantId, UserId};

use crate::{Permission, TenantMembership};

/// A fully resolved operator for authorization decisions.
///
/// Construction is decoupled from storage and transport: the hosting
/// application derives the membership from whatever identity provider it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    pub fn new(user_id: UserId, membership: TenantMembership) -> Self {
        Self {
            user_id,
            active_tenant_id: membership.tenant_id,
            membership,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let granted = principal
        .membership
        .effective_permissions()
        .any(|p| p.is_wildcard() || p == *required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
