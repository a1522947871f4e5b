//! Optimistic read-modify-write transactions.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use lotledger_core::{ExpectedVersion, TenantId, Version};
use lotledger_events::Collection;

use crate::documents::Document;
use crate::store::{Change, DocumentStore, StoreError, WriteOp};

type DocKey = (Collection, String);

#[derive(Debug, Clone)]
enum Pending {
    Put(JsonValue),
    Insert(JsonValue),
    Delete,
}

/// A unit of optimistic work against one tenant.
///
/// Every read records the version it observed. `commit` sends those versions
/// along with the buffered writes, so the store applies the writes only if
/// nothing read has changed in the meantime. Reads see the transaction's own
/// buffered writes.
pub struct Transaction<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    tenant_id: TenantId,
    reads: HashMap<DocKey, Version>,
    writes: HashMap<DocKey, Pending>,
    order: Vec<DocKey>,
}

impl<'s, S: DocumentStore + ?Sized> Transaction<'s, S> {
    pub fn new(store: &'s S, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            reads: HashMap::new(),
            writes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Raw read, recording the observed version.
    pub fn read(&mut self, collection: Collection, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let doc_key = (collection, key.to_string());
        if let Some(pending) = self.writes.get(&doc_key) {
            return Ok(match pending {
                Pending::Put(body) | Pending::Insert(body) => Some(body.clone()),
                Pending::Delete => None,
            });
        }

        let stored = self.store.get(self.tenant_id, collection, key)?;
        let observed = stored.as_ref().map_or(Version::ABSENT, |d| d.version);

        match self.reads.get(&doc_key) {
            Some(&first) if first != observed => {
                return Err(StoreError::Conflict {
                    collection,
                    key: key.to_string(),
                    expected: ExpectedVersion::observed(first),
                    actual: observed,
                });
            }
            Some(_) => {}
            None => {
                self.reads.insert(doc_key.clone(), observed);
                self.order.push(doc_key);
            }
        }

        Ok(stored.map(|d| d.body))
    }

    pub fn get<T: Document>(&mut self, key: &str) -> Result<Option<T>, StoreError> {
        match self.read(T::COLLECTION, key)? {
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}/{key}: {e}", T::COLLECTION))),
            None => Ok(None),
        }
    }

    /// Buffer an overwrite. Guarded by the version read earlier, if any.
    pub fn put<T: Document>(&mut self, doc: &T) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc)?;
        self.buffer((T::COLLECTION, doc.document_key()), Pending::Put(body));
        Ok(())
    }

    /// Buffer a create that must not overwrite an existing document.
    pub fn insert<T: Document>(&mut self, doc: &T) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc)?;
        self.buffer((T::COLLECTION, doc.document_key()), Pending::Insert(body));
        Ok(())
    }

    pub fn delete<T: Document>(&mut self, key: &str) {
        self.buffer((T::COLLECTION, key.to_string()), Pending::Delete);
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    fn buffer(&mut self, doc_key: DocKey, pending: Pending) {
        if !self.reads.contains_key(&doc_key) && !self.writes.contains_key(&doc_key) {
            self.order.push(doc_key.clone());
        }
        self.writes.insert(doc_key, pending);
    }

    /// Commit buffered writes. Read-only transactions never reach the store.
    ///
    /// Returns the commit revision, or `None` when there was nothing to write.
    pub fn commit(mut self) -> Result<Option<u64>, StoreError> {
        if self.writes.is_empty() {
            return Ok(None);
        }

        let mut ops = Vec::with_capacity(self.order.len());
        for doc_key in std::mem::take(&mut self.order) {
            let read = self.reads.get(&doc_key).copied();
            let pending = self.writes.remove(&doc_key);

            let expected = match (read, &pending) {
                (Some(v), _) => ExpectedVersion::observed(v),
                (None, Some(Pending::Insert(_))) => ExpectedVersion::Absent,
                (None, _) => ExpectedVersion::Any,
            };
            let change = match pending {
                None => Change::Check,
                Some(Pending::Put(body)) | Some(Pending::Insert(body)) => Change::Put(body),
                Some(Pending::Delete) => Change::Delete,
            };

            let (collection, key) = doc_key;
            ops.push(WriteOp {
                collection,
                key,
                expected,
                change,
            });
        }

        self.store.commit(self.tenant_id, ops).map(Some)
    }
}
