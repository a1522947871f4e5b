//! A reconciliation session: one engine instance reacting to change-feed
//! snapshots.
//!
//! The session owns everything derived from snapshots: the lot index, the
//! applied-operation markers, the operator's dismissed deductions and the
//! last reports. Nothing is shared between sessions; correctness across
//! sessions comes from the store's optimistic transactions alone.
//!
//! `pump` drains every subscription (latest snapshot wins), then runs one
//! reconciliation pass over whatever changed:
//!
//! ```text
//! purchases changed ─▶ purchase sync ─▶ (own writes) re-read lots snapshot
//! lots changed      ─▶ rebuild index ─▶ observers.on_lots
//! anything changed  ─▶ plan deductions ─▶ apply (auto) or hold as pending
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lotledger_auth::Permission;
use lotledger_core::TenantId;
use lotledger_events::{Collection, Subscription, TenantScoped};
use lotledger_infra::{CollectionSnapshot, Document, DocumentStore, decode};
use lotledger_inventory::{Lot, LotFilter};
use lotledger_purchasing::PurchaseRecord;
use lotledger_sales::{OperationId, SaleRecord};

use crate::deduction::{DeductionPlan, DeductionReport, DeductionTask, plan_deductions};
use crate::engine::LotEngine;
use crate::error::ReconcileResult;
use crate::index::LotIndex;
use crate::ledger::AppliedOperation;
use crate::purchase_sync::PurchaseSyncReport;

/// Tagged engine status for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Syncing,
    Error(String),
    /// Idle, with this many sale lines waiting for operator attention.
    Unresolved(usize),
}

/// Presentation-side observer. Callbacks run on the session's thread.
pub trait EngineObserver: Send + Sync {
    fn on_status(&self, _status: &EngineStatus) {}

    /// The full lot read model, after every lots snapshot.
    fn on_lots(&self, _lots: &[Lot]) {}
}

/// Latest snapshot of one collection plus its subscription.
struct Feed {
    subscription: Subscription<CollectionSnapshot>,
    latest: Option<CollectionSnapshot>,
}

impl Feed {
    /// Keep the newest delivery for our tenant. Returns whether it changed.
    fn absorb(&mut self, tenant_id: TenantId) -> bool {
        let Some(snapshot) = self.subscription.drain_latest() else {
            return false;
        };
        if TenantScoped::tenant_id(&snapshot) != tenant_id {
            return false;
        }
        if self.latest.as_ref().is_some_and(|cur| cur.revision() > snapshot.revision()) {
            return false;
        }
        self.latest = Some(snapshot);
        true
    }

    fn decode_all<T: Document>(&self) -> Vec<T> {
        let Some(snapshot) = &self.latest else {
            return Vec::new();
        };
        snapshot
            .documents()
            .iter()
            .filter_map(|doc| match decode::<T>(doc) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(collection = %T::COLLECTION, key = %doc.key, error = %e, "undecodable document skipped");
                    None
                }
            })
            .collect()
    }

}

pub struct ReconciliationSession<S: DocumentStore> {
    engine: LotEngine<S>,
    observers: Vec<Arc<dyn EngineObserver>>,
    purchases: Feed,
    sales: Feed,
    lots: Feed,
    markers: Feed,
    index: LotIndex,
    dismissed: HashSet<OperationId>,
    status: EngineStatus,
    last_sync: PurchaseSyncReport,
    last_report: DeductionReport,
    pending: Vec<DeductionTask>,
    replan: bool,
}

impl<S: DocumentStore> ReconciliationSession<S> {
    /// Subscribe to every collection the engine reads. Each subscription
    /// starts with the current full snapshot.
    pub fn new(engine: LotEngine<S>) -> Self {
        let tenant_id = engine.tenant_id();
        let feed = |collection| Feed {
            subscription: engine.store().subscribe(tenant_id, collection),
            latest: None,
        };

        Self {
            purchases: feed(Collection::Purchases),
            sales: feed(Collection::Sales),
            lots: feed(Collection::Lots),
            markers: feed(Collection::AppliedOperations),
            engine,
            observers: Vec::new(),
            index: LotIndex::default(),
            dismissed: HashSet::new(),
            status: EngineStatus::Idle,
            last_sync: PurchaseSyncReport::default(),
            last_report: DeductionReport::default(),
            pending: Vec::new(),
            replan: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn engine(&self) -> &LotEngine<S> {
        &self.engine
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn is_syncing(&self) -> bool {
        self.status == EngineStatus::Syncing
    }

    pub fn last_sync(&self) -> &PurchaseSyncReport {
        &self.last_sync
    }

    pub fn last_report(&self) -> &DeductionReport {
        &self.last_report
    }

    pub fn unresolved_count(&self) -> usize {
        self.last_report.unresolved_count()
    }

    /// Resolved deductions held back because automatic application is off.
    pub fn pending_deductions(&self) -> &[DeductionTask] {
        &self.pending
    }

    /// Reactive lot read model as of the last lots snapshot.
    pub fn lots(&self, filter: &LotFilter) -> Vec<Lot> {
        self.index.filter(filter)
    }

    pub fn dismissed(&self) -> &HashSet<OperationId> {
        &self.dismissed
    }

    /// Hide an unresolved line from this session's backlog.
    pub fn dismiss_deduction(&mut self, operation_id: OperationId) {
        self.last_report.unresolved.retain(|u| u.operation_id != operation_id);
        self.pending.retain(|t| t.operation_id != operation_id);
        if self.dismissed.insert(operation_id) {
            self.last_report.dismissed += 1;
        }
        self.set_status(self.settled_status());
    }

    /// Undo a dismissal; the line is reconsidered on the next pass.
    pub fn restore_deduction(&mut self, operation_id: &OperationId) -> bool {
        let restored = self.dismissed.remove(operation_id);
        self.replan |= restored;
        restored
    }

    /// Drain pending snapshots and run one reconciliation pass if anything
    /// changed. Returns whether a pass ran.
    pub fn pump(&mut self) -> ReconcileResult<bool> {
        let tenant_id = self.engine.tenant_id();
        let purchases_changed = self.purchases.absorb(tenant_id);
        let sales_changed = self.sales.absorb(tenant_id);
        let mut lots_changed = self.lots.absorb(tenant_id);
        let markers_changed = self.markers.absorb(tenant_id);

        if !(purchases_changed || sales_changed || lots_changed || markers_changed || self.replan) {
            return Ok(false);
        }
        self.replan = false;
        self.set_status(EngineStatus::Syncing);

        match self.pass(purchases_changed, &mut lots_changed) {
            Ok(()) => {
                self.set_status(self.settled_status());
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "reconciliation pass failed");
                self.set_status(EngineStatus::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn pass(&mut self, purchases_changed: bool, lots_changed: &mut bool) -> ReconcileResult<()> {
        let tenant_id = self.engine.tenant_id();
        self.engine.authorize(&Permission::RECONCILE)?;

        if purchases_changed {
            let purchases: Vec<PurchaseRecord> = self.purchases.decode_all();
            self.last_sync = self.engine.sync_purchases(&purchases)?;
            if self.last_sync.wrote_anything() {
                // Our own lot writes are already on the feed.
                *lots_changed |= self.lots.absorb(tenant_id);
            }
        }

        if *lots_changed {
            self.index = LotIndex::build(self.lots.decode_all::<Lot>());
            let lots = self.index.filter(&LotFilter::default());
            for observer in &self.observers {
                observer.on_lots(&lots);
            }
        }

        let plan = self.plan();
        if self.engine.config().auto_apply_deductions {
            self.pending.clear();
            self.last_report = self.engine.apply_plan(plan);
        } else {
            self.pending = plan.tasks;
            self.last_report = DeductionReport {
                applied: Vec::new(),
                already_applied: plan.already_applied,
                dismissed: plan.dismissed,
                unresolved: plan.unresolved,
            };
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            lots = self.index.len(),
            applied = self.last_report.applied.len(),
            unresolved = self.last_report.unresolved_count(),
            pending = self.pending.len(),
            "reconciliation pass complete"
        );
        Ok(())
    }

    fn plan(&self) -> DeductionPlan {
        let sales: Vec<SaleRecord> = self.sales.decode_all();
        let applied: HashMap<OperationId, AppliedOperation> = self
            .markers
            .decode_all::<AppliedOperation>()
            .into_iter()
            .map(|marker| (marker.operation_id.clone(), marker))
            .collect();
        plan_deductions(
            &sales,
            &self.index,
            &applied,
            &self.dismissed,
            self.engine.config().allow_name_only_match,
        )
    }

    /// Manual trigger: plan against the session's snapshots and apply,
    /// regardless of the auto-apply setting.
    pub fn apply_pending_deductions(&mut self) -> ReconcileResult<DeductionReport> {
        let tenant_id = self.engine.tenant_id();
        self.engine.authorize(&Permission::RECONCILE)?;
        if self.lots.absorb(tenant_id) {
            self.index = LotIndex::build(self.lots.decode_all::<Lot>());
        }
        self.sales.absorb(tenant_id);
        self.markers.absorb(tenant_id);

        self.set_status(EngineStatus::Syncing);
        let plan = self.plan();
        let report = self.engine.apply_plan(plan);
        self.pending.clear();
        self.last_report = report.clone();
        self.set_status(self.settled_status());
        Ok(report)
    }

    fn settled_status(&self) -> EngineStatus {
        match self.last_report.unresolved_count() {
            0 => EngineStatus::Idle,
            n => EngineStatus::Unresolved(n),
        }
    }

    fn set_status(&mut self, status: EngineStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        for observer in &self.observers {
            observer.on_status(&self.status);
        }
    }
}
