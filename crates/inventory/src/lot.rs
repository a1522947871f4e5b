use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lotledger_core::{AuditStamp, DomainError, DomainResult, PurchaseId, RecordId, normalize_key};

use crate::bins::{Bin, BinQuantities};
use crate::returns::ReturnCase;
use crate::transfer::TransferMeta;

/// Lot identifier (tenant-scoped via the store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub RecordId);

impl LotId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(RecordId::new())
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Descriptive fields of a lot, everything except identity and quantities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LotDraft {
    pub product_name: String,
    pub lot_number: String,
    pub supplier_name: String,
    pub purchase_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub barcode: Option<String>,
}

impl LotDraft {
    pub fn new(product_name: impl Into<String>, lot_number: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            lot_number: lot_number.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.product_name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.purchase_price.is_some_and(|p| p.is_sign_negative()) {
            return Err(DomainError::validation("purchase price cannot be negative"));
        }
        if self.sale_price.is_some_and(|p| p.is_sign_negative()) {
            return Err(DomainError::validation("sale price cannot be negative"));
        }
        Ok(())
    }
}

/// A batch of one product with its own two-bin quantity split.
///
/// Quantity fields are private: [`Lot::adjust_bins`] is the only mutator, so
/// `total_qty == bin_a + bin_b` with both bins non-negative holds for every
/// value built through this API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    id: LotId,
    #[serde(flatten)]
    pub details: LotDraft,
    bins: BinQuantities,
    total_qty: i64,
    source_purchase_id: Option<PurchaseId>,
    transfer_meta: Option<TransferMeta>,
    return_case: Option<ReturnCase>,
    created: AuditStamp,
    last_adjustment: Option<AuditStamp>,
}

impl Lot {
    /// Build a lot with an initial split.
    pub fn new(
        id: LotId,
        details: LotDraft,
        initial: BinQuantities,
        source_purchase_id: Option<PurchaseId>,
        created: AuditStamp,
    ) -> DomainResult<Self> {
        details.validate()?;
        if !initial.is_non_negative() {
            return Err(DomainError::consistency(format!(
                "initial quantities must be non-negative (a={}, b={})",
                initial.bin_a, initial.bin_b
            )));
        }

        Ok(Self {
            id,
            details,
            bins: initial,
            total_qty: initial.total(),
            source_purchase_id,
            transfer_meta: None,
            return_case: None,
            created,
            last_adjustment: None,
        })
    }

    /// Materialize a received purchase line: the whole quantity lands in one bin.
    pub fn received(
        id: LotId,
        details: LotDraft,
        qty: i64,
        bin: Bin,
        source_purchase_id: PurchaseId,
        created: AuditStamp,
    ) -> DomainResult<Self> {
        Self::new(
            id,
            details,
            BinQuantities::single(bin, qty),
            Some(source_purchase_id),
            created,
        )
    }

    pub(crate) fn with_transfer_meta(mut self, meta: TransferMeta) -> Self {
        self.transfer_meta = Some(meta);
        self
    }

    pub fn id(&self) -> LotId {
        self.id
    }

    pub fn bins(&self) -> BinQuantities {
        self.bins
    }

    pub fn bin_a(&self) -> i64 {
        self.bins.bin_a
    }

    pub fn bin_b(&self) -> i64 {
        self.bins.bin_b
    }

    pub fn total_qty(&self) -> i64 {
        self.total_qty
    }

    pub fn source_purchase_id(&self) -> Option<&PurchaseId> {
        self.source_purchase_id.as_ref()
    }

    pub fn transfer_meta(&self) -> Option<&TransferMeta> {
        self.transfer_meta.as_ref()
    }

    pub fn is_transfer_derived(&self) -> bool {
        self.transfer_meta.is_some()
    }

    pub fn return_case(&self) -> Option<&ReturnCase> {
        self.return_case.as_ref()
    }

    pub(crate) fn return_case_mut(&mut self) -> &mut Option<ReturnCase> {
        &mut self.return_case
    }

    pub fn created(&self) -> &AuditStamp {
        &self.created
    }

    pub fn last_adjustment(&self) -> Option<&AuditStamp> {
        self.last_adjustment.as_ref()
    }

    /// Normalized (product name, lot number) matching key.
    pub fn match_key(&self) -> (String, String) {
        (
            normalize_key(&self.details.product_name),
            normalize_key(&self.details.lot_number),
        )
    }

    /// Verify the two-bin invariant.
    ///
    /// Documents arrive from a shared store that other writers can touch, so
    /// anything loaded from it is checked before the engine trusts it.
    pub fn check_invariant(&self) -> DomainResult<()> {
        if !self.bins.is_non_negative() {
            return Err(DomainError::consistency(format!(
                "lot {} has a negative bin (a={}, b={})",
                self.id, self.bins.bin_a, self.bins.bin_b
            )));
        }
        if self.bins.total() != self.total_qty {
            return Err(DomainError::consistency(format!(
                "lot {} total {} does not equal bins {} + {}",
                self.id, self.total_qty, self.bins.bin_a, self.bins.bin_b
            )));
        }
        Ok(())
    }

    /// The sanctioned quantity mutator.
    ///
    /// Applies both deltas or neither; fails with `DomainError::Consistency`
    /// if either bin would go negative. A successful adjustment records the
    /// audit stamp.
    pub fn adjust_bins(&mut self, delta_a: i64, delta_b: i64, stamp: AuditStamp) -> DomainResult<()> {
        let overflow = || DomainError::consistency(format!("lot {}: quantity overflow", self.id));
        let next_a = self.bins.bin_a.checked_add(delta_a).ok_or_else(overflow)?;
        let next_b = self.bins.bin_b.checked_add(delta_b).ok_or_else(overflow)?;

        if next_a < 0 || next_b < 0 {
            return Err(DomainError::consistency(format!(
                "lot {}: adjustment ({delta_a:+}, {delta_b:+}) would leave bins at ({next_a}, {next_b})",
                self.id
            )));
        }

        self.bins = BinQuantities::new(next_a, next_b);
        self.total_qty = next_a + next_b;
        self.last_adjustment = Some(stamp);
        Ok(())
    }

    /// Move the lot to `target` total quantity.
    ///
    /// Growth lands in `bin`; shrinking drains `bin` first and overflows into
    /// the other bin. Used when a purchase line's remaining quantity changes.
    pub fn set_total(&mut self, target: i64, bin: Bin, stamp: AuditStamp) -> DomainResult<()> {
        if target < 0 {
            return Err(DomainError::consistency(format!(
                "lot {}: target total {target} is negative",
                self.id
            )));
        }
        let diff = target - self.total_qty;
        if diff == 0 {
            return Ok(());
        }

        let (primary, secondary) = if diff > 0 {
            (diff, 0)
        } else {
            let take = -diff;
            let from_primary = self.bins.get(bin).min(take);
            (-from_primary, -(take - from_primary))
        };

        match bin {
            Bin::A => self.adjust_bins(primary, secondary, stamp),
            Bin::B => self.adjust_bins(secondary, primary, stamp),
        }
    }

    /// A pending return case blocks further sale deduction.
    pub fn is_blocked(&self) -> bool {
        self.return_case.as_ref().is_some_and(ReturnCase::is_pending)
    }

    /// Quantities a sale may draw from right now.
    pub fn sellable(&self) -> BinQuantities {
        if self.is_blocked() {
            BinQuantities::ZERO
        } else {
            self.bins
        }
    }
}

/// Read-model filter over lots. Every populated field must match
/// (case-insensitive substring); `query` matches any of the four fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotFilter {
    pub query: Option<String>,
    pub product_name: Option<String>,
    pub lot_number: Option<String>,
    pub supplier_name: Option<String>,
    pub barcode: Option<String>,
}

impl LotFilter {
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, lot: &Lot) -> bool {
        let d = &lot.details;
        let barcode = d.barcode.as_deref().unwrap_or("");

        let field_ok = |needle: &Option<String>, hay: &str| match needle {
            Some(n) => contains_ci(hay, n),
            None => true,
        };

        let query_ok = match &self.query {
            Some(q) => [
                d.product_name.as_str(),
                d.lot_number.as_str(),
                d.supplier_name.as_str(),
                barcode,
            ]
            .iter()
            .any(|hay| contains_ci(hay, q)),
            None => true,
        };

        query_ok
            && field_ok(&self.product_name, &d.product_name)
            && field_ok(&self.lot_number, &d.lot_number)
            && field_ok(&self.supplier_name, &d.supplier_name)
            && field_ok(&self.barcode, barcode)
    }
}

fn contains_ci(hay: &str, needle: &str) -> bool {
    normalize_key(hay).contains(&normalize_key(needle))
}
