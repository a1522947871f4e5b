use serde::{Deserialize, Serialize};

use lotledger_core::TenantId;

use crate::collection::{Collection, Topic};

/// Envelope for one full-collection snapshot delivery.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - `revision` is the store-wide commit counter at the time the snapshot was
///   taken; a consumer holding several deliveries keeps the highest one.
/// - `documents` is the complete collection content, never a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEnvelope<D> {
    tenant_id: TenantId,
    collection: Collection,
    revision: u64,
    documents: Vec<D>,
}

impl<D> SnapshotEnvelope<D> {
    pub fn new(tenant_id: TenantId, collection: Collection, revision: u64, documents: Vec<D>) -> Self {
        Self {
            tenant_id,
            collection,
            revision,
            documents,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn topic(&self) -> Topic {
        Topic::new(self.tenant_id, self.collection)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn documents(&self) -> &[D] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<D> {
        self.documents
    }
}
