//! Purchase record mirror.
//!
//! Purchase documents belong to the purchasing domain. The engine reads them
//! to materialize lots and owns exactly one field per line, `consumed_qty`,
//! which it moves through compensation writes.

pub mod record;

pub use record::{LineKey, PurchaseLine, PurchaseRecord, ReceivedLot, ReceivedStatus};
