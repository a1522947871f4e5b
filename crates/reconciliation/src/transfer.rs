//! Transfer workflow: split bin-A stock into a new, transfer-derived lot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lotledger_auth::Permission;
use lotledger_infra::DocumentStore;
use lotledger_inventory::{Lot, LotId};

use crate::compensation::compensate_source;
use crate::engine::LotEngine;
use crate::error::{ReconcileError, ReconcileResult};
use crate::lots::load_lot;

/// Cooperative cancellation for operator actions (transfers, settlements).
///
/// Checked right before commit; once the commit starts the operation can no
/// longer be cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> ReconcileResult<()> {
        if self.is_cancelled() {
            Err(ReconcileError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl<S: DocumentStore> LotEngine<S> {
    /// Move `qty` units out of the source lot's bin A into a new lot's bin B.
    ///
    /// The source lot, the new lot and the purchase-line compensation commit
    /// together or not at all.
    pub fn create_transfer(&self, source: LotId, qty: i64, cancel: &CancellationToken) -> ReconcileResult<Lot> {
        self.authorize(&Permission::TRANSFER)?;
        let new_id = LotId::generate();

        let derived = self.transact(|tx| {
            let mut lot = load_lot(tx, source)?;
            let derived = lot.split_for_transfer(qty, new_id, self.stamp(format!("transfer of {qty} to lot {new_id}")))?;
            compensate_source(tx, &lot, qty)?;
            tx.put(&lot)?;
            tx.insert(&derived)?;
            cancel.check()?;
            Ok(derived)
        })?;

        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %source, derived_lot_id = %new_id, qty, "transfer created");
        Ok(derived)
    }
}
