//! Infrastructure layer: the document-store seam, its in-memory
//! implementation, optimistic transactions and retry policy.

pub mod documents;
pub mod retry;
pub mod store;
pub mod transaction;

pub use documents::{Document, decode, put_document};
pub use retry::{BackoffStrategy, RetryPolicy, TransactionError, run_transaction};
pub use store::{
    Change, CollectionSnapshot, DocumentStore, InMemoryDocumentStore, StoreError, StoredDocument, WriteOp,
};
pub use transaction::Transaction;
