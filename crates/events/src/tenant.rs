use lotledger_core::TenantId;

use crate::SnapshotEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Session workers are pinned to one tenant and drop deliveries for any other
/// tenant before they reach reconciliation code.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<D> TenantScoped for SnapshotEnvelope<D> {
    fn tenant_id(&self) -> TenantId {
        SnapshotEnvelope::tenant_id(self)
    }
}
