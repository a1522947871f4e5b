//! Typed documents on top of the JSON store.

use serde::Serialize;
use serde::de::DeserializeOwned;

use lotledger_core::{ExpectedVersion, TenantId};
use lotledger_events::Collection;
use lotledger_inventory::Lot;
use lotledger_purchasing::PurchaseRecord;
use lotledger_sales::SaleRecord;

use crate::store::{DocumentStore, StoreError, StoredDocument, WriteOp};

/// A domain type persisted as one JSON document in a fixed collection.
pub trait Document: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn document_key(&self) -> String;
}

impl Document for Lot {
    const COLLECTION: Collection = Collection::Lots;

    fn document_key(&self) -> String {
        self.id().to_string()
    }
}

impl Document for PurchaseRecord {
    const COLLECTION: Collection = Collection::Purchases;

    fn document_key(&self) -> String {
        self.id.to_string()
    }
}

impl Document for SaleRecord {
    const COLLECTION: Collection = Collection::Sales;

    fn document_key(&self) -> String {
        self.id.to_string()
    }
}

/// Deserialize a stored document into its domain type.
pub fn decode<T: Document>(doc: &StoredDocument) -> Result<T, StoreError> {
    serde_json::from_value(doc.body.clone()).map_err(|e| {
        StoreError::Serialization(format!("{}/{}: {e}", T::COLLECTION, doc.key))
    })
}

/// Single-document write outside a transaction.
///
/// This is how the external purchase and sale domains land their documents;
/// the engine itself writes through [`crate::Transaction`].
pub fn put_document<S, T>(store: &S, tenant_id: TenantId, doc: &T, expected: ExpectedVersion) -> Result<u64, StoreError>
where
    S: DocumentStore + ?Sized,
    T: Document,
{
    let body = serde_json::to_value(doc)?;
    store.commit(tenant_id, vec![WriteOp::put(T::COLLECTION, doc.document_key(), expected, body)])
}
