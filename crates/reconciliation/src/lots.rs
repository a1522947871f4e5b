//! Lot store operations.

use lotledger_auth::Permission;
use lotledger_core::{AuditStamp, normalize_key};
use lotledger_events::Collection;
use lotledger_infra::{DocumentStore, Transaction, decode};
use lotledger_inventory::{BinQuantities, Lot, LotDraft, LotFilter, LotId};
use serde::{Deserialize, Serialize};

use crate::compensation::compensate_source;
use crate::engine::LotEngine;
use crate::error::{ReconcileError, ReconcileResult};
use crate::index::LotIndex;

/// Operator edit of a lot.
///
/// Descriptive fields are replaced wholesale. Quantities only move when
/// `bins` is set, and then through `Lot::adjust_bins` with `note` as the
/// audit cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotEdit {
    pub details: LotDraft,
    pub bins: Option<BinQuantities>,
    pub note: Option<String>,
}

impl LotEdit {
    pub fn details(details: LotDraft) -> Self {
        Self {
            details,
            bins: None,
            note: None,
        }
    }

    pub fn with_bins(mut self, bins: BinQuantities, note: impl Into<String>) -> Self {
        self.bins = Some(bins);
        self.note = Some(note.into());
        self
    }
}

pub(crate) fn load_lot<S>(tx: &mut Transaction<'_, S>, id: LotId) -> ReconcileResult<Lot>
where
    S: DocumentStore + ?Sized,
{
    let lot = tx
        .get::<Lot>(&id.to_string())?
        .ok_or_else(|| ReconcileError::ReferenceMissing(format!("lot {id}")))?;
    lot.check_invariant()?;
    Ok(lot)
}

/// Adjust bins and push the matching write-back onto the source purchase.
fn adjust_with_compensation<S>(
    tx: &mut Transaction<'_, S>,
    lot: &mut Lot,
    delta_a: i64,
    delta_b: i64,
    stamp: AuditStamp,
) -> ReconcileResult<()>
where
    S: DocumentStore + ?Sized,
{
    let delta_total = delta_a + delta_b;
    if delta_total != 0 && lot.is_blocked() {
        return Err(ReconcileError::InvalidTransition(format!(
            "lot {} has a pending return; its total cannot change",
            lot.id()
        )));
    }
    lot.adjust_bins(delta_a, delta_b, stamp)?;
    // Stock leaving the lot is consumption of its purchase line.
    compensate_source(tx, lot, -delta_total)
}

impl<S: DocumentStore> LotEngine<S> {
    pub fn get_lot(&self, id: LotId) -> ReconcileResult<Option<Lot>> {
        self.authorize(&Permission::LOTS_READ)?;
        match self.store().get(self.tenant_id(), Collection::Lots, &id.to_string())? {
            Some(doc) => Ok(Some(decode(&doc)?)),
            None => Ok(None),
        }
    }

    /// Current lots matching `filter`, read straight from the store.
    pub fn list_lots(&self, filter: &LotFilter) -> ReconcileResult<Vec<Lot>> {
        self.authorize(&Permission::LOTS_READ)?;
        Ok(self.load_index()?.filter(filter))
    }

    pub(crate) fn load_index(&self) -> ReconcileResult<LotIndex> {
        let docs = self.store().list(self.tenant_id(), Collection::Lots)?;
        Ok(LotIndex::build(docs.iter().filter_map(|doc| match decode::<Lot>(doc) {
            Ok(lot) => Some(lot),
            Err(e) => {
                tracing::warn!(tenant_id = %self.tenant_id(), key = %doc.key, error = %e, "undecodable lot skipped");
                None
            }
        })))
    }

    /// Create a manual lot (no source purchase).
    pub fn create_lot(&self, details: LotDraft, initial: BinQuantities) -> ReconcileResult<Lot> {
        self.authorize(&Permission::LOTS_WRITE)?;
        let lot = Lot::new(LotId::generate(), details, initial, None, self.stamp("created manually"))?;

        self.transact(|tx| {
            tx.insert(&lot)?;
            Ok(())
        })?;

        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %lot.id(), total = lot.total_qty(), "lot created");
        Ok(lot)
    }

    /// Write a whole lot document.
    ///
    /// New lots are inserted as given. For an existing lot only descriptive
    /// fields may differ; quantity changes must go through [`Self::adjust_bins`].
    pub fn upsert_lot(&self, lot: Lot) -> ReconcileResult<Lot> {
        self.authorize(&Permission::LOTS_WRITE)?;
        lot.check_invariant()?;
        lot.details.validate()?;

        self.transact(|tx| {
            if let Some(existing) = tx.get::<Lot>(&lot.id().to_string())? {
                if existing.bins() != lot.bins() {
                    return Err(ReconcileError::Consistency(format!(
                        "lot {}: quantities change only through adjust_bins",
                        lot.id()
                    )));
                }
            }
            tx.put(&lot)?;
            Ok(())
        })?;

        Ok(lot)
    }

    /// The sanctioned quantity mutator. Rejects (writing nothing) any change
    /// that would leave a bin negative.
    pub fn adjust_bins(&self, id: LotId, delta_a: i64, delta_b: i64, note: &str) -> ReconcileResult<Lot> {
        self.authorize(&Permission::LOTS_WRITE)?;
        if note.trim().is_empty() {
            return Err(ReconcileError::Validation("bin adjustments need a cause note".into()));
        }

        let lot = self.transact(|tx| {
            let mut lot = load_lot(tx, id)?;
            adjust_with_compensation(tx, &mut lot, delta_a, delta_b, self.stamp(note))?;
            tx.put(&lot)?;
            Ok(lot)
        })?;

        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %id, delta_a, delta_b, note, "bins adjusted");
        Ok(lot)
    }

    pub fn edit_lot(&self, id: LotId, edit: LotEdit) -> ReconcileResult<Lot> {
        self.authorize(&Permission::LOTS_WRITE)?;
        edit.details.validate()?;

        let note = edit.note.as_deref().map(str::trim).unwrap_or("");
        if edit.bins.is_some() && note.is_empty() {
            return Err(ReconcileError::Validation("quantity edits need a cause note".into()));
        }

        self.transact(|tx| {
            let mut lot = load_lot(tx, id)?;

            // A purchase-derived lot is keyed by its purchase line.
            let rekeyed = normalize_key(&edit.details.product_name) != normalize_key(&lot.details.product_name)
                || normalize_key(&edit.details.lot_number) != normalize_key(&lot.details.lot_number);
            if rekeyed && lot.source_purchase_id().is_some() {
                return Err(ReconcileError::Validation(format!(
                    "lot {id}: product name and lot number of a purchase-derived lot follow its purchase line"
                )));
            }

            lot.details = edit.details.clone();
            if let Some(target) = edit.bins {
                let (da, db) = (target.bin_a - lot.bin_a(), target.bin_b - lot.bin_b());
                if da != 0 || db != 0 {
                    adjust_with_compensation(tx, &mut lot, da, db, self.stamp(note))?;
                }
            }

            tx.put(&lot)?;
            Ok(lot)
        })
    }

    /// Delete a lot, handing its remaining stock back to the source purchase
    /// line as consumed. Lots with a pending return cannot be deleted.
    pub fn delete_lot(&self, id: LotId) -> ReconcileResult<()> {
        self.authorize(&Permission::LOTS_WRITE)?;

        self.transact(|tx| {
            let lot = load_lot(tx, id)?;
            if lot.is_blocked() {
                return Err(ReconcileError::InvalidTransition(format!(
                    "lot {id} has a pending return"
                )));
            }
            compensate_source(tx, &lot, lot.total_qty())?;
            tx.delete::<Lot>(&id.to_string());
            Ok(())
        })?;

        tracing::info!(tenant_id = %self.tenant_id(), lot_id = %id, "lot deleted");
        Ok(())
    }
}
