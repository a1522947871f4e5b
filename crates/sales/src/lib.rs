//! Sale record mirror (read-only to the engine) and sale-line operation ids.

pub mod operation;
pub mod record;

pub use operation::OperationId;
pub use record::{SaleLine, SaleRecord};
