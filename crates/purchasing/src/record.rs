use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lotledger_core::{DomainError, DomainResult, PurchaseId, normalize_key};
use lotledger_inventory::{Bin, LotDraft};

/// Purchase record receiving lifecycle (as reported by the purchasing domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceivedStatus {
    Draft,
    Ordered,
    Received,
    Cancelled,
}

/// Purchase line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_name: String,
    pub lot_number: String,
    pub received_qty: i64,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub bin_tag: Option<Bin>,
    #[serde(default)]
    pub barcode: Option<String>,
    /// Engine-owned: quantity consumed by sales, transfers, returns and deletions.
    #[serde(default)]
    pub consumed_qty: i64,
    /// Engine-owned: net units added by operator corrections beyond what was received.
    #[serde(default)]
    pub adjusted_qty: i64,
}

impl PurchaseLine {
    pub fn new(product_name: impl Into<String>, lot_number: impl Into<String>, received_qty: i64) -> Self {
        Self {
            product_name: product_name.into(),
            lot_number: lot_number.into(),
            received_qty,
            unit_price: None,
            sale_price: None,
            expiry: None,
            bin_tag: None,
            barcode: None,
            consumed_qty: 0,
            adjusted_qty: 0,
        }
    }

    pub fn key(&self) -> LineKey {
        LineKey::new(&self.product_name, &self.lot_number)
    }

    /// `received + adjusted - consumed`, never below zero.
    pub fn remaining_qty(&self) -> i64 {
        (self.received_qty + self.adjusted_qty - self.consumed_qty).max(0)
    }
}

/// Normalized (product name, lot number) key of a purchase line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineKey {
    pub product_name: String,
    pub lot_number: String,
}

impl LineKey {
    pub fn new(product_name: &str, lot_number: &str) -> Self {
        Self {
            product_name: normalize_key(product_name),
            lot_number: normalize_key(lot_number),
        }
    }

    /// Natural key of the lot materialized from this line of `purchase`.
    pub fn natural_key(&self, purchase: &PurchaseId) -> String {
        format!("{}|{}|{}", purchase, self.product_name, self.lot_number)
    }
}

/// All lines of one purchase sharing a key, folded into the lot they feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedLot {
    pub key: LineKey,
    pub draft: LotDraft,
    pub received_qty: i64,
    pub remaining_qty: i64,
    pub bin: Bin,
}

/// Purchase record (denormalized mirror of the purchasing domain's document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: PurchaseId,
    pub supplier_name: String,
    pub received_status: ReceivedStatus,
    /// Default bin for received stock; line tags override it.
    #[serde(default)]
    pub destination_bin: Option<Bin>,
    /// Internal transfers are materialized by the transfer workflow, never by sync.
    #[serde(default)]
    pub internal_transfer: bool,
    pub lines: Vec<PurchaseLine>,
}

impl PurchaseRecord {
    pub fn new(id: PurchaseId, supplier_name: impl Into<String>, received_status: ReceivedStatus) -> Self {
        Self {
            id,
            supplier_name: supplier_name.into(),
            received_status,
            destination_bin: None,
            internal_transfer: false,
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: PurchaseLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn is_received(&self) -> bool {
        self.received_status == ReceivedStatus::Received
    }

    /// Should purchase sync materialize lots from this record?
    pub fn feeds_lots(&self) -> bool {
        self.is_received() && !self.internal_transfer
    }

    /// Received lines with positive quantity, grouped by line key in first-seen order.
    pub fn received_lots(&self) -> Vec<ReceivedLot> {
        let mut out: Vec<ReceivedLot> = Vec::new();

        for line in self.lines.iter().filter(|l| l.received_qty > 0) {
            let key = line.key();
            if let Some(existing) = out.iter_mut().find(|r| r.key == key) {
                existing.received_qty += line.received_qty;
                existing.remaining_qty += line.remaining_qty();
                continue;
            }

            out.push(ReceivedLot {
                key,
                draft: LotDraft {
                    product_name: line.product_name.trim().to_string(),
                    lot_number: line.lot_number.trim().to_string(),
                    supplier_name: self.supplier_name.clone(),
                    purchase_price: line.unit_price,
                    sale_price: line.sale_price,
                    expiry_date: line.expiry,
                    barcode: line.barcode.clone(),
                },
                received_qty: line.received_qty,
                remaining_qty: line.remaining_qty(),
                bin: line.bin_tag.or(self.destination_bin).unwrap_or(Bin::A),
            });
        }

        out
    }

    /// Remaining quantity across all lines sharing `key`.
    pub fn remaining_for(&self, key: &LineKey) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.key() == *key)
            .map(PurchaseLine::remaining_qty)
            .sum()
    }

    /// Compensation write: record `qty` units consumed (or released, when
    /// negative) against the lines matching `key`.
    ///
    /// Consumption fills lines in order up to their remaining quantity; the
    /// last matching line absorbs any excess so no unit is dropped. Releases
    /// walk the lines backwards and never push `consumed_qty` below zero; a
    /// release larger than what was consumed lands in the last line's
    /// `adjusted_qty`, so stock found on a recount survives the next sync.
    pub fn compensate(&mut self, key: &LineKey, qty: i64) -> DomainResult<()> {
        let idx: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.key() == *key)
            .map(|(i, _)| i)
            .collect();

        let Some(&last) = idx.last() else {
            return Err(DomainError::not_found(format!(
                "purchase {} has no line for {} / {}",
                self.id, key.product_name, key.lot_number
            )));
        };

        if qty >= 0 {
            let mut left = qty;
            for &i in &idx {
                if left == 0 {
                    break;
                }
                let line = &mut self.lines[i];
                let take = if i == last { left } else { line.remaining_qty().min(left) };
                line.consumed_qty += take;
                left -= take;
            }
        } else {
            let mut left = -qty;
            for &i in idx.iter().rev() {
                if left == 0 {
                    break;
                }
                let line = &mut self.lines[i];
                let give = line.consumed_qty.max(0).min(left);
                line.consumed_qty -= give;
                left -= give;
            }
            self.lines[last].adjusted_qty += left;
        }

        Ok(())
    }
}
