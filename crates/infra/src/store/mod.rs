//! Transactional document store abstraction.
//!
//! The engine does not own persistence. It talks to a tenant-scoped document
//! store that offers three things: keyed reads, atomic multi-document commits
//! guarded by per-document version expectations, and full-snapshot change
//! subscriptions per collection.

mod in_memory;

pub use in_memory::InMemoryDocumentStore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use lotledger_core::{ExpectedVersion, TenantId, Version};
use lotledger_events::{Collection, SnapshotEnvelope, Subscription};

/// A document as held by the store.
///
/// `version` is the store revision of the commit that last wrote the
/// document. Revisions only grow, so a document deleted and recreated never
/// reuses a version a stale reader may have observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub key: String,
    pub version: Version,
    pub body: JsonValue,
}

/// What a commit does to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Validate the expectation only (a read recorded by a transaction).
    Check,
    Put(JsonValue),
    Delete,
}

/// One entry of an atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub collection: Collection,
    pub key: String,
    pub expected: ExpectedVersion,
    pub change: Change,
}

impl WriteOp {
    pub fn put(collection: Collection, key: impl Into<String>, expected: ExpectedVersion, body: JsonValue) -> Self {
        Self {
            collection,
            key: key.into(),
            expected,
            change: Change::Put(body),
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self.change, Change::Check)
    }
}

/// Full-snapshot delivery of one collection.
pub type CollectionSnapshot = SnapshotEnvelope<StoredDocument>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A version expectation failed; nothing from the commit was applied.
    #[error("optimistic concurrency conflict on {collection}/{key}: expected {expected:?}, found {actual}")]
    Conflict {
        collection: Collection,
        key: String,
        expected: ExpectedVersion,
        actual: Version,
    },

    /// A transaction kept conflicting until its retry budget ran out.
    #[error("transaction retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("document serialization failed: {0}")]
    Serialization(String),

    #[error("document store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(value.to_string())
    }
}

/// Tenant-isolated transactional document store.
pub trait DocumentStore: Send + Sync {
    fn get(&self, tenant_id: TenantId, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Every document of a collection, ordered by key.
    fn list(&self, tenant_id: TenantId, collection: Collection) -> Result<Vec<StoredDocument>, StoreError>;

    /// Atomically validate every expectation and apply every write.
    ///
    /// Either all ops apply or none do. Returns the store revision of the
    /// commit (the current revision when the batch holds no writes).
    fn commit(&self, tenant_id: TenantId, ops: Vec<WriteOp>) -> Result<u64, StoreError>;

    /// Subscribe to full snapshots of a collection. The current snapshot is
    /// delivered first, then one snapshot per commit touching the collection.
    fn subscribe(&self, tenant_id: TenantId, collection: Collection) -> Subscription<CollectionSnapshot>;
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn get(&self, tenant_id: TenantId, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        (**self).get(tenant_id, collection, key)
    }

    fn list(&self, tenant_id: TenantId, collection: Collection) -> Result<Vec<StoredDocument>, StoreError> {
        (**self).list(tenant_id, collection)
    }

    fn commit(&self, tenant_id: TenantId, ops: Vec<WriteOp>) -> Result<u64, StoreError> {
        (**self).commit(tenant_id, ops)
    }

    fn subscribe(&self, tenant_id: TenantId, collection: Collection) -> Subscription<CollectionSnapshot> {
        (**self).subscribe(tenant_id, collection)
    }
}
