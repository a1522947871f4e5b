//! `lotledger-reconciliation`: the inventory reconciliation engine.
//!
//! Keeps a pharmacy's lot ledger consistent across three independently
//! arriving streams: supplier receipts (purchase sync), point-of-sale
//! deductions, and operator transfers/returns. Every mutation is one
//! optimistic transaction against the document store; sale deductions are
//! made exactly-once by write-once markers keyed `saleId#lineIndex`.

mod compensation;
pub mod config;
pub mod deduction;
pub mod engine;
pub mod error;
pub mod index;
pub mod ledger;
pub mod lots;
pub mod purchase_sync;
pub mod returns;
pub mod session;
pub mod transfer;
pub mod worker;

mod integration_tests;

pub use config::EngineConfig;
pub use deduction::{
    DeductionPlan, DeductionReport, DeductionTask, TaskOutcome, UnresolvedDeduction, UnresolvedReason, plan_deductions,
};
pub use engine::LotEngine;
pub use error::{ReconcileError, ReconcileResult};
pub use index::{LotIndex, Resolution};
pub use ledger::{AppliedOperation, LotDraw};
pub use lots::LotEdit;
pub use purchase_sync::{PurchaseSyncReport, lot_id_for};
pub use session::{EngineObserver, EngineStatus, ReconciliationSession};
pub use transfer::CancellationToken;
pub use worker::{SessionWorker, WorkerHandle};
