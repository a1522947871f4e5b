//! `lotledger-core`: foundation building blocks shared by every lot-ledger crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, optimistic-concurrency versions and
//! audit stamps.

pub mod audit;
pub mod error;
pub mod id;
pub mod normalize;
pub mod version;

pub use audit::AuditStamp;
pub use error::{DomainError, DomainResult};
pub use id::{PurchaseId, RecordId, SaleId, TenantId, UserId};
pub use normalize::normalize_key;
pub use version::{ExpectedVersion, Version};
