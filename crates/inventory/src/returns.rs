//! Return / credit-note state machine embedded in a lot.
//!
//! ```text
//! none ──request──▶ requested ──validate──▶ validated ──settle──▶ settled
//!   ▲                   │    └────────validate+settle─────────────▲
//!   └──────cancel───────┴──────────cancel──────┘
//! ```
//!
//! `settled` is terminal for the case; requesting again starts a new cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lotledger_core::{AuditStamp, DomainError, DomainResult};

use crate::bins::{BinPreference, DrawPlan, plan_draw};
use crate::lot::Lot;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnState {
    Requested,
    Validated,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCase {
    pub state: ReturnState,
    pub requested_qty: i64,
    pub credit_amount: Decimal,
    pub requested: AuditStamp,
    pub validated: Option<AuditStamp>,
    pub settled: Option<AuditStamp>,
    /// Bins the settled quantity was taken from.
    pub settled_draw: Option<DrawPlan>,
}

impl ReturnCase {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, ReturnState::Requested | ReturnState::Validated)
    }
}

impl Lot {
    /// `none → requested` (also valid after a previous case settled).
    pub fn request_return(&mut self, qty: i64, credit_amount: Decimal, stamp: AuditStamp) -> DomainResult<()> {
        if self.is_blocked() {
            return Err(DomainError::invalid_transition(format!(
                "lot {} already has a pending return",
                self.id()
            )));
        }
        if qty <= 0 || qty > self.total_qty() {
            return Err(DomainError::validation(format!(
                "return quantity {qty} must be in (0, {}]",
                self.total_qty()
            )));
        }
        if credit_amount.is_sign_negative() && !credit_amount.is_zero() {
            return Err(DomainError::validation("credit amount cannot be negative"));
        }

        *self.return_case_mut() = Some(ReturnCase {
            state: ReturnState::Requested,
            requested_qty: qty,
            credit_amount,
            requested: stamp,
            validated: None,
            settled: None,
            settled_draw: None,
        });
        Ok(())
    }

    /// `requested → validated`. No quantity change.
    pub fn validate_return(&mut self, stamp: AuditStamp) -> DomainResult<()> {
        let id = self.id();
        match self.return_case_mut() {
            Some(case) if case.state == ReturnState::Requested => {
                case.state = ReturnState::Validated;
                case.validated = Some(stamp);
                Ok(())
            }
            other => Err(DomainError::invalid_transition(format!(
                "lot {id}: cannot validate a return in state {}",
                state_name(other.as_ref())
            ))),
        }
    }

    /// `validated → settled`: deducts the requested quantity, bin A first.
    ///
    /// Fails with `DomainError::Consistency` (and changes nothing) when the
    /// lot no longer holds the requested quantity.
    pub fn settle_return(&mut self, stamp: AuditStamp) -> DomainResult<DrawPlan> {
        let state = self.return_case().map(|c| c.state);
        if state != Some(ReturnState::Validated) {
            return Err(DomainError::invalid_transition(format!(
                "lot {}: cannot settle a return in state {}",
                self.id(),
                state_name(self.return_case())
            )));
        }
        self.settle_pending(stamp)
    }

    /// Combined `requested|validated → settled`.
    pub fn validate_and_settle_return(&mut self, stamp: AuditStamp) -> DomainResult<DrawPlan> {
        if !self.is_blocked() {
            return Err(DomainError::invalid_transition(format!(
                "lot {}: cannot settle a return in state {}",
                self.id(),
                state_name(self.return_case())
            )));
        }
        self.settle_pending(stamp)
    }

    /// `requested|validated → none`. Unblocks the lot; quantities untouched.
    pub fn cancel_return(&mut self) -> DomainResult<ReturnCase> {
        if !self.is_blocked() {
            return Err(DomainError::invalid_transition(format!(
                "lot {}: cannot cancel a return in state {}",
                self.id(),
                state_name(self.return_case())
            )));
        }
        self.return_case_mut()
            .take()
            .ok_or_else(|| DomainError::invalid_transition("return case vanished"))
    }

    fn settle_pending(&mut self, stamp: AuditStamp) -> DomainResult<DrawPlan> {
        let qty = self
            .return_case()
            .map(|c| c.requested_qty)
            .ok_or_else(|| DomainError::invalid_transition("no return case"))?;

        // Blocking only hides stock from sales; the return itself sees all of it.
        let plan = plan_draw(self.bins(), qty, BinPreference::PreferA);
        if !plan.is_complete() {
            return Err(DomainError::consistency(format!(
                "lot {}: return of {qty} exceeds available {}",
                self.id(),
                self.total_qty()
            )));
        }

        let (da, db) = plan.deltas();
        self.adjust_bins(da, db, stamp.clone())?;

        if let Some(case) = self.return_case_mut() {
            if case.validated.is_none() {
                case.validated = Some(stamp.clone());
            }
            case.state = ReturnState::Settled;
            case.settled = Some(stamp);
            case.settled_draw = Some(plan);
        }
        Ok(plan)
    }
}

fn state_name(case: Option<&ReturnCase>) -> &'static str {
    match case.map(|c| c.state) {
        None => "none",
        Some(ReturnState::Requested) => "requested",
        Some(ReturnState::Validated) => "validated",
        Some(ReturnState::Settled) => "settled",
    }
}
