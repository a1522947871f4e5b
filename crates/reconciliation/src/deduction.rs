//! Sale deduction: exactly one deduction per sale line, exactly once.
//!
//! A pass has two halves. Planning is pure: it walks the sale lines against
//! the session's lot index and the applied-operation markers, and turns each
//! line into either a task or an unresolved report item. Applying
//! runs every task in its own transaction, which re-reads the lot, the
//! marker and the source purchase, so decisions taken on a stale snapshot
//! are re-validated before anything is written.
//!
//! Per-line failures are isolated: a line that cannot be applied ends up in
//! the report's `unresolved` list and never stops its siblings.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use lotledger_auth::Permission;
use lotledger_core::AuditStamp;
use lotledger_events::Collection;
use lotledger_infra::{DocumentStore, decode};
use lotledger_inventory::{BinPreference, BinQuantities, Lot, LotId, plan_group_draw};
use lotledger_sales::{OperationId, SaleRecord};

use crate::compensation::compensate_source;
use crate::engine::LotEngine;
use crate::error::{ReconcileError, ReconcileResult};
use crate::index::{LotIndex, Resolution};
use crate::ledger::{AppliedOperation, LotDraw};

/// Why a sale line was not (fully) deducted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No lot matches the line.
    NoMatch,
    /// Several lots match; never picked arbitrarily.
    Ambiguous { candidates: Vec<LotId> },
    /// The lot could not cover the whole request. When some stock was
    /// drawn the line is marked applied and only the shortfall is reported.
    Insufficient { lot_id: LotId, short: i64 },
    /// The lot has a pending return case.
    LotBlocked { lot_id: LotId },
    /// The lot vanished between indexing and commit.
    Stale { lot_id: LotId },
    /// The transaction kept conflicting.
    RetryBudgetExhausted,
    /// Any other failure (corrupt document, store trouble).
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedDeduction {
    pub operation_id: OperationId,
    pub product_name: String,
    pub lot_number: Option<String>,
    pub requested: i64,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionReport {
    pub applied: Vec<AppliedOperation>,
    /// Lines whose marker already existed.
    pub already_applied: usize,
    /// Lines the operator dismissed in this session.
    pub dismissed: usize,
    pub unresolved: Vec<UnresolvedDeduction>,
}

impl DeductionReport {
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }
}

/// A resolved sale line, ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionTask {
    pub operation_id: OperationId,
    pub product_name: String,
    pub lot_number: Option<String>,
    pub requested: i64,
    pub preference: BinPreference,
    /// The lot drawn from first.
    pub lot_id: LotId,
    /// Further lots of the same transfer family, in draw order.
    pub siblings: Vec<LotId>,
}

impl DeductionTask {
    pub fn lot_ids(&self) -> impl Iterator<Item = LotId> + '_ {
        std::iter::once(self.lot_id).chain(self.siblings.iter().copied())
    }

    fn unresolved(&self, reason: UnresolvedReason) -> UnresolvedDeduction {
        UnresolvedDeduction {
            operation_id: self.operation_id.clone(),
            product_name: self.product_name.clone(),
            lot_number: self.lot_number.clone(),
            requested: self.requested,
            reason,
        }
    }
}

/// Output of the pure planning half of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeductionPlan {
    pub tasks: Vec<DeductionTask>,
    pub already_applied: usize,
    pub dismissed: usize,
    pub unresolved: Vec<UnresolvedDeduction>,
}

/// Turn sale lines into deduction tasks.
///
/// Lines already applied or dismissed are counted and skipped; an applied
/// line whose marker records a shortfall stays on the backlog as
/// `Insufficient` until it is dismissed. Lines whose lots are blocked or
/// empty in the snapshot are reported without a task: a task that could draw
/// nothing would be a no-op and must not be marked.
pub fn plan_deductions(
    sales: &[SaleRecord],
    index: &LotIndex,
    applied: &HashMap<OperationId, AppliedOperation>,
    dismissed: &HashSet<OperationId>,
    allow_name_only: bool,
) -> DeductionPlan {
    let mut plan = DeductionPlan::default();

    for sale in sales {
        for (operation_id, line) in sale.operations() {
            let unresolved = |reason: UnresolvedReason| UnresolvedDeduction {
                operation_id: operation_id.clone(),
                product_name: line.product_name.clone(),
                lot_number: line.lot_number.clone(),
                requested: line.quantity,
                reason,
            };

            if dismissed.contains(&operation_id) {
                plan.dismissed += 1;
                continue;
            }
            if let Some(marker) = applied.get(&operation_id) {
                plan.already_applied += 1;
                if marker.short > 0 {
                    plan.unresolved.push(unresolved(UnresolvedReason::Insufficient {
                        lot_id: marker.lot_id,
                        short: marker.short,
                    }));
                }
                continue;
            }
            if line.quantity <= 0 {
                tracing::debug!(operation_id = %operation_id, quantity = line.quantity, "ignoring non-positive sale line");
                continue;
            }

            let lots: Vec<&Lot> = match index.resolve(&line.product_name, line.lot_number.as_deref(), allow_name_only) {
                Resolution::Ambiguous(candidates) => {
                    plan.unresolved.push(unresolved(UnresolvedReason::Ambiguous { candidates }));
                    continue;
                }
                resolution => resolution.lot_ids().iter().filter_map(|id| index.get(*id)).collect(),
            };
            let Some(first) = lots.first() else {
                plan.unresolved.push(unresolved(UnresolvedReason::NoMatch));
                continue;
            };

            let sellable: i64 = lots.iter().map(|l| l.sellable().total()).sum();
            if sellable <= 0 {
                let reason = match lots.iter().find(|l| l.is_blocked()) {
                    Some(blocked) => UnresolvedReason::LotBlocked { lot_id: blocked.id() },
                    None => UnresolvedReason::Insufficient {
                        lot_id: first.id(),
                        short: line.quantity,
                    },
                };
                plan.unresolved.push(unresolved(reason));
                continue;
            }

            plan.tasks.push(DeductionTask {
                operation_id: operation_id.clone(),
                product_name: line.product_name.clone(),
                lot_number: line.lot_number.clone(),
                requested: line.quantity,
                preference: BinPreference::resolve(line.bin_tag, sale.bin_tag),
                lot_id: first.id(),
                siblings: lots.iter().skip(1).map(|l| l.id()).collect(),
            });
        }
    }

    plan
}

/// Result of applying one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied(AppliedOperation),
    AlreadyApplied,
    Unresolved(UnresolvedReason),
}

impl<S: DocumentStore> LotEngine<S> {
    /// Apply one task in its own transaction.
    ///
    /// Inside the transaction: re-read the marker (present → no-op), re-read
    /// the task's lots (all gone → stale, all blocked → unresolved), draw
    /// what is sellable, then write the lots, the marker and the purchase
    /// compensations together.
    pub fn apply_deduction(&self, task: &DeductionTask) -> ReconcileResult<TaskOutcome> {
        self.authorize(&Permission::RECONCILE)?;

        let marker_key = task.operation_id.to_string();

        self.transact(|tx| {
            if tx.get::<AppliedOperation>(&marker_key)?.is_some() {
                return Ok(TaskOutcome::AlreadyApplied);
            }

            let mut lots = Vec::new();
            for id in task.lot_ids() {
                if let Some(lot) = tx.get::<Lot>(&id.to_string())? {
                    lot.check_invariant()?;
                    lots.push(lot);
                }
            }
            let Some(first) = lots.first() else {
                return Ok(TaskOutcome::Unresolved(UnresolvedReason::Stale { lot_id: task.lot_id }));
            };
            if lots.iter().all(Lot::is_blocked) {
                return Ok(TaskOutcome::Unresolved(UnresolvedReason::LotBlocked { lot_id: first.id() }));
            }

            let available: Vec<BinQuantities> = lots.iter().map(Lot::sellable).collect();
            let draw = plan_group_draw(&available, task.requested, task.preference);
            if draw.is_noop() {
                return Ok(TaskOutcome::Unresolved(UnresolvedReason::Insufficient {
                    lot_id: first.id(),
                    short: task.requested,
                }));
            }

            let at = Utc::now();
            let mut draws = Vec::new();
            for (lot, plan) in lots.iter_mut().zip(&draw.plans) {
                if plan.is_noop() {
                    continue;
                }
                let (delta_a, delta_b) = plan.deltas();
                lot.adjust_bins(
                    delta_a,
                    delta_b,
                    AuditStamp::new(self.actor(), at, format!("sale {}", task.operation_id)),
                )?;
                compensate_source(tx, lot, plan.drawn())?;
                tx.put(&*lot)?;
                draws.push(LotDraw {
                    lot_id: lot.id(),
                    from_a: plan.from_a,
                    from_b: plan.from_b,
                });
            }

            let lot_id = draws.first().map_or(task.lot_id, |d| d.lot_id);
            let mut marker = AppliedOperation::new(task.operation_id.clone(), lot_id, &draw.combined(), at, self.actor());
            if draws.len() > 1 {
                marker = marker.with_draws(draws);
            }
            tx.insert(&marker)?;
            Ok(TaskOutcome::Applied(marker))
        })
    }

    /// Plan and apply deductions for `sales` against a lot index and the
    /// applied-operation markers the caller already knows about.
    pub fn reconcile_sales(
        &self,
        sales: &[SaleRecord],
        index: &LotIndex,
        applied: &HashMap<OperationId, AppliedOperation>,
        dismissed: &HashSet<OperationId>,
    ) -> ReconcileResult<DeductionReport> {
        self.authorize(&Permission::RECONCILE)?;
        let plan = plan_deductions(sales, index, applied, dismissed, self.config().allow_name_only_match);
        Ok(self.apply_plan(plan))
    }

    /// Apply every planned task, isolating failures per line.
    pub fn apply_plan(&self, plan: DeductionPlan) -> DeductionReport {
        let mut report = DeductionReport {
            applied: Vec::new(),
            already_applied: plan.already_applied,
            dismissed: plan.dismissed,
            unresolved: plan.unresolved,
        };

        for task in &plan.tasks {
            let span = tracing::debug_span!("deduction", operation_id = %task.operation_id, lot_id = %task.lot_id);
            let _guard = span.enter();

            match self.apply_deduction(task) {
                Ok(TaskOutcome::Applied(marker)) => {
                    tracing::info!(
                        tenant_id = %self.tenant_id(),
                        operation_id = %marker.operation_id,
                        lot_id = %marker.lot_id,
                        from_a = marker.qty_from_a,
                        from_b = marker.qty_from_b,
                        "deduction applied"
                    );
                    if marker.short > 0 {
                        report.unresolved.push(task.unresolved(UnresolvedReason::Insufficient {
                            lot_id: marker.lot_id,
                            short: marker.short,
                        }));
                    }
                    report.applied.push(marker);
                }
                Ok(TaskOutcome::AlreadyApplied) => report.already_applied += 1,
                Ok(TaskOutcome::Unresolved(reason)) => report.unresolved.push(task.unresolved(reason)),
                Err(e) => {
                    tracing::warn!(tenant_id = %self.tenant_id(), operation_id = %task.operation_id, error = %e, "deduction failed");
                    let reason = match e {
                        ReconcileError::ConcurrencyConflict(_) => UnresolvedReason::RetryBudgetExhausted,
                        ReconcileError::ReferenceMissing(_) => UnresolvedReason::Stale { lot_id: task.lot_id },
                        other => UnresolvedReason::Rejected {
                            message: other.to_string(),
                        },
                    };
                    report.unresolved.push(task.unresolved(reason));
                }
            }
        }

        report
    }

    /// Manual trigger: read sales, lots and markers from the store and run a
    /// full deduction pass.
    pub fn apply_pending_deductions(&self, dismissed: &HashSet<OperationId>) -> ReconcileResult<DeductionReport> {
        self.authorize(&Permission::RECONCILE)?;
        let tenant_id = self.tenant_id();

        let sales: Vec<SaleRecord> = self
            .store()
            .list(tenant_id, Collection::Sales)?
            .iter()
            .filter_map(|doc| decode(doc).map_err(|e| tracing::warn!(key = %doc.key, error = %e, "undecodable sale skipped")).ok())
            .collect();
        let applied = self.applied_operations()?;
        let index = self.load_index()?;

        self.reconcile_sales(&sales, &index, &applied, dismissed)
    }

    pub(crate) fn applied_operations(&self) -> ReconcileResult<HashMap<OperationId, AppliedOperation>> {
        Ok(self
            .store()
            .list(self.tenant_id(), Collection::AppliedOperations)?
            .iter()
            .filter_map(|doc| {
                decode::<AppliedOperation>(doc)
                    .map_err(|e| tracing::warn!(key = %doc.key, error = %e, "undecodable marker skipped"))
                    .ok()
            })
            .map(|marker| (marker.operation_id.clone(), marker))
            .collect())
    }

    /// Which lot would a sale line hit right now? For a transfer family this
    /// is the lot an untagged line draws from first.
    pub fn resolve_sale_line(&self, product_name: &str, lot_number: Option<&str>) -> ReconcileResult<LotId> {
        self.authorize(&Permission::LOTS_READ)?;
        let resolution = self
            .load_index()?
            .resolve(product_name, lot_number, self.config().allow_name_only_match);
        if let Some(id) = resolution.lot_ids().first() {
            return Ok(*id);
        }
        match resolution {
            Resolution::Ambiguous(candidates) => Err(ReconcileError::AmbiguousMatch(format!(
                "{} lots match {product_name:?}",
                candidates.len()
            ))),
            _ => Err(ReconcileError::ReferenceMissing(format!("no lot matches {product_name:?}"))),
        }
    }
}
