//! Return / credit-note workflow over the lot store.
//!
//! The state machine itself lives on `Lot`; this module loads the lot,
//! applies one transition and commits it, adding the purchase compensation
//! when a settlement takes stock out.

use rust_decimal::Decimal;

use lotledger_auth::Permission;
use lotledger_core::AuditStamp;
use lotledger_infra::DocumentStore;
use lotledger_inventory::{DrawPlan, Lot, LotId};

use crate::compensation::compensate_source;
use crate::engine::LotEngine;
use crate::error::ReconcileResult;
use crate::lots::load_lot;
use crate::transfer::CancellationToken;

impl<S: DocumentStore> LotEngine<S> {
    fn transition<F>(&self, id: LotId, action: &str, mut step: F) -> ReconcileResult<Lot>
    where
        F: FnMut(&mut Lot, AuditStamp) -> ReconcileResult<()>,
    {
        self.authorize(&Permission::RETURNS)?;
        let lot = self.transact(|tx| {
            let mut lot = load_lot(tx, id)?;
            step(&mut lot, self.stamp(format!("return {action}")))?;
            tx.put(&lot)?;
            Ok(lot)
        })?;
        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %id, action, "return transition");
        Ok(lot)
    }

    fn settle<F>(&self, id: LotId, action: &str, cancel: &CancellationToken, mut step: F) -> ReconcileResult<Lot>
    where
        F: FnMut(&mut Lot, AuditStamp) -> ReconcileResult<DrawPlan>,
    {
        self.authorize(&Permission::RETURNS)?;
        let lot = self.transact(|tx| {
            let mut lot = load_lot(tx, id)?;
            let draw = step(&mut lot, self.stamp(format!("return {action}")))?;
            compensate_source(tx, &lot, draw.drawn())?;
            tx.put(&lot)?;
            cancel.check()?;
            Ok(lot)
        })?;
        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %id, action, "return settled");
        Ok(lot)
    }

    /// `none → requested`. Blocks the lot from sale deduction.
    pub fn request_return(&self, id: LotId, qty: i64, credit_amount: Decimal) -> ReconcileResult<Lot> {
        self.transition(id, "requested", |lot, stamp| Ok(lot.request_return(qty, credit_amount, stamp)?))
    }

    /// `requested → validated`.
    pub fn validate_return(&self, id: LotId) -> ReconcileResult<Lot> {
        self.transition(id, "validated", |lot, stamp| Ok(lot.validate_return(stamp)?))
    }

    /// `validated → settled`: deducts the returned quantity, bin A first.
    pub fn settle_return(&self, id: LotId, cancel: &CancellationToken) -> ReconcileResult<Lot> {
        self.settle(id, "settled", cancel, |lot, stamp| Ok(lot.settle_return(stamp)?))
    }

    /// `requested|validated → settled` in one step.
    pub fn validate_and_settle_return(&self, id: LotId, cancel: &CancellationToken) -> ReconcileResult<Lot> {
        self.settle(id, "validated and settled", cancel, |lot, stamp| {
            Ok(lot.validate_and_settle_return(stamp)?)
        })
    }

    /// `requested|validated → none`. Quantities are untouched.
    pub fn cancel_return(&self, id: LotId) -> ReconcileResult<Lot> {
        self.transition(id, "cancelled", |lot, _stamp| {
            lot.cancel_return()?;
            Ok(())
        })
    }
}
