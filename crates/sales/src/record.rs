use serde::{Deserialize, Serialize};

use lotledger_core::SaleId;
use lotledger_inventory::Bin;

use crate::OperationId;

/// One dispensed item on a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_name: String,
    /// Missing when the cashier did not capture the lot at the counter.
    #[serde(default)]
    pub lot_number: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub bin_tag: Option<Bin>,
}

impl SaleLine {
    pub fn new(product_name: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_name: product_name.into(),
            lot_number: None,
            quantity,
            bin_tag: None,
        }
    }

    pub fn with_lot(mut self, lot_number: impl Into<String>) -> Self {
        self.lot_number = Some(lot_number.into()).filter(|l: &String| !l.trim().is_empty());
        self
    }

    pub fn with_bin(mut self, bin: Bin) -> Self {
        self.bin_tag = Some(bin);
        self
    }
}

/// Sale record (read-only to the engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: SaleId,
    /// Document-level bin preference, used when a line carries none.
    #[serde(default)]
    pub bin_tag: Option<Bin>,
    pub lines: Vec<SaleLine>,
}

impl SaleRecord {
    pub fn new(id: SaleId) -> Self {
        Self {
            id,
            bin_tag: None,
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: SaleLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Lines paired with their operation ids, in document order.
    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &SaleLine)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| (OperationId::new(self.id.clone(), i), line))
    }
}
