use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "lots.read").
/// The wildcard permission `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Read the lot read model.
    pub const LOTS_READ: Permission = Permission::from_static("lots.read");
    /// Create, edit and delete lots.
    pub const LOTS_WRITE: Permission = Permission::from_static("lots.write");
    /// Run purchase sync and sale deductions.
    pub const RECONCILE: Permission = Permission::from_static("lots.reconcile");
    /// Split bin-A stock into a transfer-derived lot.
    pub const TRANSFER: Permission = Permission::from_static("lots.transfer");
    /// Drive the return/credit-note workflow.
    pub const RETURNS: Permission = Permission::from_static("lots.returns");
    /// Grants every permission.
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
