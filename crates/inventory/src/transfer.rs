//! Transfer splitting: bin-A stock of one lot becomes bin-B stock of a new lot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotledger_core::{AuditStamp, DomainError, DomainResult, UserId};

use crate::bins::BinQuantities;
use crate::lot::{Lot, LotId};

/// Link from a transfer-derived lot back to the lot it was split from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMeta {
    pub source_lot_id: LotId,
    pub quantity: i64,
    pub at: DateTime<Utc>,
    pub by: UserId,
}

impl Lot {
    /// Take `qty` out of this lot's bin A and return a new lot holding it in bin B.
    ///
    /// The new lot carries no source purchase: the purchase line is
    /// compensated once, at transfer time, against the source lot.
    pub fn split_for_transfer(&mut self, qty: i64, new_id: LotId, stamp: AuditStamp) -> DomainResult<Lot> {
        if qty <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }
        if qty > self.bin_a() {
            return Err(DomainError::consistency(format!(
                "lot {}: transfer of {qty} exceeds bin A quantity {}",
                self.id(),
                self.bin_a()
            )));
        }
        if self.is_blocked() {
            return Err(DomainError::invalid_transition(format!(
                "lot {} has a pending return",
                self.id()
            )));
        }
        if new_id == self.id() {
            return Err(DomainError::invalid_id("transfer lot id equals source lot id"));
        }

        let meta = TransferMeta {
            source_lot_id: self.id(),
            quantity: qty,
            at: stamp.at,
            by: stamp.actor,
        };
        let derived = Lot::new(
            new_id,
            self.details.clone(),
            BinQuantities::new(0, qty),
            None,
            stamp.clone(),
        )?
        .with_transfer_meta(meta);

        self.adjust_bins(-qty, 0, stamp)?;
        Ok(derived)
    }
}
