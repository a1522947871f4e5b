use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const OWNER: Role = Role(Cow::Borrowed("owner"));
    pub const PHARMACIST: Role = Role(Cow::Borrowed("pharmacist"));
    pub const CASHIER: Role = Role(Cow::Borrowed("cashier"));
    pub const VIEWER: Role = Role(Cow::Borrowed("viewer"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Permissions granted by a built-in role. Unknown roles grant nothing.
    pub fn permissions(&self) -> Vec<Permission> {
        match self.as_str() {
            "owner" => vec![Permission::WILDCARD],
            "pharmacist" => vec![
                Permission::LOTS_READ,
                Permission::LOTS_WRITE,
                Permission::RECONCILE,
                Permission::TRANSFER,
                Permission::RETURNS,
            ],
            // Cashier sessions apply their own sales but never edit stock directly.
            "cashier" => vec![Permission::LOTS_READ, Permission::RECONCILE],
            "viewer" => vec![Permission::LOTS_READ],
            _ => Vec::new(),
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
