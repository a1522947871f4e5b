//! Write-backs onto the purchase line a lot was materialized from.

use lotledger_core::DomainError;
use lotledger_infra::{DocumentStore, Transaction};
use lotledger_inventory::Lot;
use lotledger_purchasing::{LineKey, PurchaseRecord};

use crate::error::ReconcileResult;

/// Record `qty` units leaving `lot` (or returning to it, when negative) on
/// its source purchase line, inside the caller's transaction.
///
/// Manual and transfer-derived lots have no source and are left alone. A
/// purchase record or line that has vanished is a stale reference: the lot
/// change still commits and the skipped write-back is logged.
pub(crate) fn compensate_source<S>(tx: &mut Transaction<'_, S>, lot: &Lot, qty: i64) -> ReconcileResult<()>
where
    S: DocumentStore + ?Sized,
{
    if qty == 0 {
        return Ok(());
    }
    let Some(purchase_id) = lot.source_purchase_id() else {
        return Ok(());
    };

    let Some(mut purchase) = tx.get::<PurchaseRecord>(purchase_id.as_str())? else {
        tracing::warn!(purchase_id = %purchase_id, lot_id = %lot.id(), qty, "source purchase missing; compensation skipped");
        return Ok(());
    };

    let key = LineKey::new(&lot.details.product_name, &lot.details.lot_number);
    match purchase.compensate(&key, qty) {
        Ok(()) => {
            tx.put(&purchase)?;
            Ok(())
        }
        Err(DomainError::NotFound(msg)) => {
            tracing::warn!(purchase_id = %purchase_id, lot_id = %lot.id(), qty, %msg, "source purchase line missing; compensation skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
