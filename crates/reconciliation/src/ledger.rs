//! Applied-operations ledger: write-once idempotency markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lotledger_core::UserId;
use lotledger_events::Collection;
use lotledger_infra::Document;
use lotledger_inventory::{DrawPlan, LotId};
use lotledger_sales::OperationId;

/// Proof that one sale line was deducted.
///
/// Written in the same transaction as the lot adjustment and never updated
/// afterwards. Its presence is what makes replayed sale snapshots harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub operation_id: OperationId,
    pub applied: bool,
    pub lot_id: LotId,
    pub qty_from_a: i64,
    pub qty_from_b: i64,
    /// Requested units the lot could not cover when the marker was written.
    #[serde(default)]
    pub short: i64,
    /// Per-lot breakdown when the line drew from several lots of one
    /// transfer family. Empty for single-lot draws.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub draws: Vec<LotDraw>,
    pub at: DateTime<Utc>,
    pub by: UserId,
}

/// Units one lot contributed to a multi-lot deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: LotId,
    pub from_a: i64,
    pub from_b: i64,
}

impl AppliedOperation {
    pub fn new(operation_id: OperationId, lot_id: LotId, plan: &DrawPlan, at: DateTime<Utc>, by: UserId) -> Self {
        Self {
            operation_id,
            applied: true,
            lot_id,
            qty_from_a: plan.from_a,
            qty_from_b: plan.from_b,
            short: plan.short,
            draws: Vec::new(),
            at,
            by,
        }
    }

    pub fn with_draws(mut self, draws: Vec<LotDraw>) -> Self {
        self.draws = draws;
        self
    }

    pub fn quantity(&self) -> i64 {
        self.qty_from_a + self.qty_from_b
    }
}

impl Document for AppliedOperation {
    const COLLECTION: Collection = Collection::AppliedOperations;

    fn document_key(&self) -> String {
        self.operation_id.to_string()
    }
}
