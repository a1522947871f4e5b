//! Purchase sync: materialize received purchase lines as lots.
//!
//! A lot's identity is derived from (purchase id, product name, lot number),
//! so every session computes the same id for the same line. Two sessions
//! racing to create it collide on the store's version check instead of
//! producing duplicates.
//!
//! Sync is an overwrite, never additive: the lot's total is set to the
//! line's remaining quantity (received plus recount corrections, minus
//! consumed), so replaying a
//! snapshot any number of times converges on the same state and never
//! resurrects stock already consumed elsewhere.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lotledger_auth::Permission;
use lotledger_core::{PurchaseId, RecordId};
use lotledger_infra::{DocumentStore, Transaction};
use lotledger_inventory::{Lot, LotDraft, LotId};
use lotledger_purchasing::{LineKey, PurchaseRecord, ReceivedLot};

use crate::engine::LotEngine;
use crate::error::ReconcileResult;

const LOT_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_746c_6564_6765_7200_0000_0000_0001);

/// Deterministic lot id for a purchase line.
pub fn lot_id_for(purchase_id: &PurchaseId, key: &LineKey) -> LotId {
    LotId::new(RecordId::derived(&LOT_NAMESPACE, &key.natural_key(purchase_id)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Lines not materialized: internal transfers, or lines with nothing
    /// left whose lot no longer exists.
    pub skipped: usize,
    /// Purchases whose sync failed (logged); retried on the next snapshot.
    pub failed: Vec<PurchaseId>,
}

impl PurchaseSyncReport {
    pub fn merge(&mut self, other: PurchaseSyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    pub fn wrote_anything(&self) -> bool {
        self.created + self.updated > 0
    }
}

/// Purchase-owned fields overwrite the lot's; a line without a barcode
/// keeps whatever barcode the lot already has.
fn refreshed_details(current: &LotDraft, incoming: &LotDraft) -> LotDraft {
    LotDraft {
        barcode: incoming.barcode.clone().or_else(|| current.barcode.clone()),
        ..incoming.clone()
    }
}

enum LineOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

impl<S: DocumentStore> LotEngine<S> {
    /// Sync one purchase, reading its current version from the store.
    pub fn sync_purchase(&self, purchase_id: &PurchaseId) -> ReconcileResult<PurchaseSyncReport> {
        self.authorize(&Permission::RECONCILE)?;

        let report = self.transact(|tx| {
            let mut report = PurchaseSyncReport::default();
            let Some(purchase) = tx.get::<PurchaseRecord>(purchase_id.as_str())? else {
                return Ok(report);
            };
            if !purchase.is_received() {
                return Ok(report);
            }
            if purchase.internal_transfer {
                report.skipped = purchase.received_lots().len();
                return Ok(report);
            }

            for received in purchase.received_lots() {
                match self.sync_line(tx, &purchase.id, received)? {
                    LineOutcome::Created => report.created += 1,
                    LineOutcome::Updated => report.updated += 1,
                    LineOutcome::Unchanged => report.unchanged += 1,
                    LineOutcome::Skipped => report.skipped += 1,
                }
            }
            Ok(report)
        })?;

        if report.wrote_anything() {
            tracing::info!(
                tenant_id = %self.tenant_id(),
                purchase_id = %purchase_id,
                created = report.created,
                updated = report.updated,
                "purchase synced"
            );
        }
        Ok(report)
    }

    /// Sync every received purchase in a snapshot. One failing purchase never
    /// blocks the others.
    pub fn sync_purchases(&self, purchases: &[PurchaseRecord]) -> ReconcileResult<PurchaseSyncReport> {
        self.authorize(&Permission::RECONCILE)?;

        let mut total = PurchaseSyncReport::default();
        for purchase in purchases.iter().filter(|p| p.is_received()) {
            match self.sync_purchase(&purchase.id) {
                Ok(report) => total.merge(report),
                Err(e) => {
                    tracing::warn!(tenant_id = %self.tenant_id(), purchase_id = %purchase.id, error = %e, "purchase sync failed");
                    total.failed.push(purchase.id.clone());
                }
            }
        }
        Ok(total)
    }

    fn sync_line(
        &self,
        tx: &mut Transaction<'_, S>,
        purchase_id: &PurchaseId,
        received: ReceivedLot,
    ) -> ReconcileResult<LineOutcome> {
        let lot_id = lot_id_for(purchase_id, &received.key);

        let Some(mut lot) = tx.get::<Lot>(&lot_id.to_string())? else {
            if received.remaining_qty <= 0 {
                return Ok(LineOutcome::Skipped);
            }
            let lot = Lot::received(
                lot_id,
                received.draft,
                received.remaining_qty,
                received.bin,
                purchase_id.clone(),
                self.stamp(format!("received on purchase {purchase_id}")),
            )?;
            tx.insert(&lot)?;
            return Ok(LineOutcome::Created);
        };

        lot.check_invariant()?;
        let details = refreshed_details(&lot.details, &received.draft);
        let details_changed = details != lot.details;
        let qty_changed = lot.total_qty() != received.remaining_qty;

        if !details_changed && !qty_changed {
            return Ok(LineOutcome::Unchanged);
        }

        lot.details = details;
        if qty_changed {
            lot.set_total(
                received.remaining_qty,
                received.bin,
                self.stamp(format!("purchase {purchase_id} remaining quantity")),
            )?;
        }
        tx.put(&lot)?;
        Ok(LineOutcome::Updated)
    }
}
