use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use lotledger_core::{TenantId, Version};
use lotledger_events::{ChangeFeed, Collection, InMemoryChangeFeed, SnapshotEnvelope, Subscription, Topic};

use super::{Change, CollectionSnapshot, DocumentStore, StoreError, StoredDocument, WriteOp};

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    collections: HashMap<Topic, BTreeMap<String, StoredDocument>>,
}

impl Inner {
    fn current_version(&self, topic: Topic, key: &str) -> Version {
        self.collections
            .get(&topic)
            .and_then(|docs| docs.get(key))
            .map_or(Version::ABSENT, |d| d.version)
    }

    fn snapshot(&self, topic: Topic) -> CollectionSnapshot {
        let documents = self
            .collections
            .get(&topic)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        SnapshotEnvelope::new(topic.tenant_id, topic.collection, self.revision, documents)
    }
}

/// In-memory transactional document store.
///
/// Intended for tests/dev. A single mutex serializes commits, and snapshots
/// are published while it is held, so every subscriber sees revisions of a
/// collection in commit order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: Mutex<Inner>,
    feed: InMemoryChangeFeed<CollectionSnapshot>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store-wide commit counter.
    pub fn revision(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.revision)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, tenant_id: TenantId, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .collections
            .get(&Topic::new(tenant_id, collection))
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn list(&self, tenant_id: TenantId, collection: Collection) -> Result<Vec<StoredDocument>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.snapshot(Topic::new(tenant_id, collection)).into_documents())
    }

    fn commit(&self, tenant_id: TenantId, ops: Vec<WriteOp>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;

        // Validate everything before touching anything.
        for op in &ops {
            let actual = inner.current_version(Topic::new(tenant_id, op.collection), &op.key);
            if !op.expected.matches(actual) {
                return Err(StoreError::Conflict {
                    collection: op.collection,
                    key: op.key.clone(),
                    expected: op.expected,
                    actual,
                });
            }
        }

        if !ops.iter().any(WriteOp::is_write) {
            return Ok(inner.revision);
        }

        inner.revision += 1;
        let version = Version::new(inner.revision);
        let mut touched = BTreeSet::new();

        for op in ops {
            let topic = Topic::new(tenant_id, op.collection);
            match op.change {
                Change::Check => continue,
                Change::Put(body) => {
                    inner.collections.entry(topic).or_default().insert(
                        op.key.clone(),
                        StoredDocument {
                            key: op.key,
                            version,
                            body,
                        },
                    );
                }
                Change::Delete => {
                    if let Some(docs) = inner.collections.get_mut(&topic) {
                        docs.remove(&op.key);
                    }
                }
            }
            touched.insert(op.collection);
        }

        for collection in touched {
            let topic = Topic::new(tenant_id, collection);
            // The commit is already applied; a failed fan-out only delays
            // subscribers until the next snapshot.
            if let Err(e) = self.feed.publish(topic, inner.snapshot(topic)) {
                tracing::warn!(tenant_id = %tenant_id, collection = %collection, error = ?e, "snapshot publish failed");
            }
        }

        tracing::trace!(tenant_id = %tenant_id, revision = inner.revision, "commit applied");
        Ok(inner.revision)
    }

    fn subscribe(&self, tenant_id: TenantId, collection: Collection) -> Subscription<CollectionSnapshot> {
        let topic = Topic::new(tenant_id, collection);
        match self.inner.lock() {
            // Holding the store lock keeps the initial snapshot ahead of any
            // later commit's delivery.
            Ok(inner) => self.feed.subscribe(topic, Some(inner.snapshot(topic))),
            Err(_) => {
                tracing::warn!(tenant_id = %tenant_id, collection = %collection, "document store poisoned; subscribing without snapshot");
                self.feed.subscribe(topic, None)
            }
        }
    }
}
