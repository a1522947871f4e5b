use serde::{Deserialize, Serialize};

use lotledger_core::TenantId;

/// Logical collections the engine reads or writes (per tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Engine-owned stock lots.
    Lots,
    /// Write-once idempotency markers, one per consumed sale line.
    AppliedOperations,
    /// Externally-owned purchase records (engine writes consumption only).
    Purchases,
    /// Externally-owned sale records (read-only).
    Sales,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Lots,
        Collection::AppliedOperations,
        Collection::Purchases,
        Collection::Sales,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Lots => "lots",
            Collection::AppliedOperations => "applied_operations",
            Collection::Purchases => "purchases",
            Collection::Sales => "sales",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription topic: one collection inside one tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub tenant_id: TenantId,
    pub collection: Collection,
}

impl Topic {
    pub fn new(tenant_id: TenantId, collection: Collection) -> Self {
        Self {
            tenant_id,
            collection,
        }
    }
}
