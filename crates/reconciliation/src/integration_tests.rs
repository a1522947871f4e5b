//! Integration tests for the full reconciliation pipeline.
//!
//! Tests: purchase/sale documents → DocumentStore → engine/session → lots,
//! markers and purchase compensations.
//!
//! Verifies:
//! - The two-bin invariant and quantity conservation
//! - Exactly-once deductions under replay and concurrent sessions
//! - Transfer and return workflows with their purchase write-backs
//! - Ambiguity, staleness and permission handling

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::{Duration, Instant};

    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use lotledger_auth::{Principal, Role, TenantMembership};
    use lotledger_core::{ExpectedVersion, PurchaseId, SaleId, TenantId, UserId};
    use lotledger_events::Collection;
    use lotledger_infra::{DocumentStore, InMemoryDocumentStore, RetryPolicy, decode, put_document};
    use lotledger_inventory::{Bin, BinQuantities, Lot, LotDraft, LotFilter, LotId, ReturnState};
    use lotledger_observability::{LogFormat, ObservabilityConfig};
    use lotledger_purchasing::{LineKey, PurchaseLine, PurchaseRecord, ReceivedStatus};
    use lotledger_sales::{OperationId, SaleLine, SaleRecord};

    use crate::deduction::{UnresolvedReason, plan_deductions};
    use crate::error::ReconcileError;
    use crate::session::{EngineObserver, EngineStatus, ReconciliationSession};
    use crate::transfer::CancellationToken;
    use crate::worker::SessionWorker;
    use crate::{EngineConfig, LotEdit, LotEngine, lot_id_for};

    type Store = Arc<InMemoryDocumentStore>;

    fn config() -> EngineConfig {
        EngineConfig::default().with_retry(RetryPolicy::fixed(100, Duration::from_millis(1)))
    }

    fn engine_as(store: &Store, tenant: TenantId, role: Role) -> LotEngine<Store> {
        let principal = Principal::new(UserId::new(), TenantMembership::new(tenant, vec![role]));
        LotEngine::new(store.clone(), principal, config())
    }

    fn setup() -> (Store, TenantId, LotEngine<Store>) {
        lotledger_observability::init_with(&ObservabilityConfig {
            filter: "warn".into(),
            format: LogFormat::Compact,
        });
        let store: Store = Arc::new(InMemoryDocumentStore::new());
        let tenant = TenantId::new();
        let engine = engine_as(&store, tenant, Role::PHARMACIST);
        (store, tenant, engine)
    }

    fn pid(raw: &str) -> PurchaseId {
        PurchaseId::parse(raw).unwrap()
    }

    fn purchase(id: &str, lines: &[(&str, &str, i64)]) -> PurchaseRecord {
        lines.iter().fold(
            PurchaseRecord::new(pid(id), "Acme Pharma", ReceivedStatus::Received),
            |p, (name, lot, qty)| p.with_line(PurchaseLine::new(*name, *lot, *qty)),
        )
    }

    fn sale(id: &str, lines: Vec<SaleLine>) -> SaleRecord {
        lines
            .into_iter()
            .fold(SaleRecord::new(SaleId::parse(id).unwrap()), SaleRecord::with_line)
    }

    fn put_purchase(store: &Store, tenant: TenantId, p: &PurchaseRecord) {
        put_document(store, tenant, p, ExpectedVersion::Any).unwrap();
    }

    fn put_sale(store: &Store, tenant: TenantId, s: &SaleRecord) {
        put_document(store, tenant, s, ExpectedVersion::Any).unwrap();
    }

    fn stored_purchase(store: &Store, tenant: TenantId, id: &str) -> PurchaseRecord {
        decode(&store.get(tenant, Collection::Purchases, id).unwrap().unwrap()).unwrap()
    }

    fn remaining(store: &Store, tenant: TenantId, id: &str, name: &str, lot: &str) -> i64 {
        stored_purchase(store, tenant, id).remaining_for(&LineKey::new(name, lot))
    }

    fn marker_count(store: &Store, tenant: TenantId) -> usize {
        store.list(tenant, Collection::AppliedOperations).unwrap().len()
    }

    /// Put a received purchase and sync it; returns the lot id of its first line.
    fn received_lot(store: &Store, tenant: TenantId, engine: &LotEngine<Store>, id: &str, name: &str, lot: &str, qty: i64) -> LotId {
        put_purchase(store, tenant, &purchase(id, &[(name, lot, qty)]));
        engine.sync_purchase(&pid(id)).unwrap();
        lot_id_for(&pid(id), &LineKey::new(name, lot))
    }

    fn lot(engine: &LotEngine<Store>, id: LotId) -> Lot {
        engine.get_lot(id).unwrap().expect("lot exists")
    }

    fn bins(engine: &LotEngine<Store>, id: LotId) -> (i64, i64) {
        let l = lot(engine, id);
        l.check_invariant().unwrap();
        (l.bin_a(), l.bin_b())
    }

    fn apply(engine: &LotEngine<Store>) -> crate::DeductionReport {
        engine.apply_pending_deductions(&HashSet::new()).unwrap()
    }

    // ---------------------------------------------------------------------
    // Purchase sync
    // ---------------------------------------------------------------------

    #[test]
    fn received_purchase_materializes_lot_in_destination_bin() {
        let (store, tenant, engine) = setup();
        let mut p = purchase("P-1", &[("Amoxil 500", "L1", 10)]);
        p.destination_bin = Some(Bin::B);
        put_purchase(&store, tenant, &p);

        let report = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!(report.created, 1);

        let id = lot_id_for(&pid("P-1"), &LineKey::new("Amoxil 500", "L1"));
        let l = lot(&engine, id);
        assert_eq!((l.bin_a(), l.bin_b()), (0, 10));
        assert_eq!(l.source_purchase_id(), Some(&pid("P-1")));
        assert_eq!(l.details.supplier_name, "Acme Pharma");

        let again = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!((again.created, again.updated, again.unchanged), (0, 0, 1));
    }

    #[test]
    fn sync_overwrites_quantity_instead_of_adding() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);

        let mut p = stored_purchase(&store, tenant, "P-1");
        p.lines[0].received_qty = 12;
        p.lines[0].sale_price = Some(Decimal::new(450, 2));
        put_purchase(&store, tenant, &p);

        let report = engine.sync_purchases(&[p.clone()]).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(lot(&engine, id).total_qty(), 12);
        assert_eq!(lot(&engine, id).details.sale_price, Some(Decimal::new(450, 2)));

        engine.sync_purchases(&[p.clone(), p]).unwrap();
        assert_eq!(lot(&engine, id).total_qty(), 12);
        assert_eq!(engine.list_lots(&LotFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn internal_transfer_and_unreceived_purchases_are_ignored() {
        let (store, tenant, engine) = setup();
        let mut internal = purchase("P-1", &[("Amoxil", "L1", 10)]);
        internal.internal_transfer = true;
        let mut draft = purchase("P-2", &[("Ibuprofen", "I1", 5)]);
        draft.received_status = ReceivedStatus::Ordered;
        put_purchase(&store, tenant, &internal);
        put_purchase(&store, tenant, &draft);

        let report = engine.sync_purchases(&[internal, draft]).unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 1);
        assert!(engine.list_lots(&LotFilter::default()).unwrap().is_empty());
    }

    // ---------------------------------------------------------------------
    // Deductions
    // ---------------------------------------------------------------------

    #[test]
    fn deductions_conserve_stock_and_never_go_negative() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);

        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 7).with_lot("L1")]));
        apply(&engine);
        assert_eq!(bins(&engine, id), (3, 0));

        put_sale(&store, tenant, &sale("S-2", vec![SaleLine::new("Amoxil", 5).with_lot("L1")]));
        let report = apply(&engine);
        assert_eq!(bins(&engine, id), (0, 0));
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].short, 2);
        assert!(matches!(
            report.unresolved.as_slice(),
            [u] if u.reason == UnresolvedReason::Insufficient { lot_id: id, short: 2 }
        ));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 0);

        // The partial line is marked and never retried; its shortfall stays
        // on the backlog.
        let replay = apply(&engine);
        assert_eq!(replay.already_applied, 2);
        assert!(replay.applied.is_empty());
        assert!(matches!(
            replay.unresolved.as_slice(),
            [u] if u.reason == UnresolvedReason::Insufficient { lot_id: id, short: 2 }
        ));
        assert_eq!(bins(&engine, id), (0, 0));

        let dismissed: HashSet<OperationId> = [replay.unresolved[0].operation_id.clone()].into();
        let settled = engine.apply_pending_deductions(&dismissed).unwrap();
        assert!(settled.unresolved.is_empty());
        assert_eq!(settled.dismissed, 1);
    }

    #[test]
    fn bin_tag_picks_the_primary_bin() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 7);
        engine.adjust_bins(id, -2, 2, "moved to counter").unwrap();
        assert_eq!(bins(&engine, id), (5, 2));

        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 3).with_lot("L1").with_bin(Bin::B)]));
        let report = apply(&engine);
        assert_eq!(report.applied[0].qty_from_b, 2);
        assert_eq!(report.applied[0].qty_from_a, 1);
        assert_eq!(bins(&engine, id), (4, 0));
    }

    #[test]
    fn replayed_sale_is_applied_once() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        let s = sale(
            "S-1",
            vec![SaleLine::new("Amoxil", 2).with_lot("L1"), SaleLine::new("Amoxil", 1).with_lot("L1")],
        );

        for _ in 0..5 {
            put_sale(&store, tenant, &s);
            apply(&engine);
        }

        assert_eq!(bins(&engine, id), (7, 0));
        assert_eq!(marker_count(&store, tenant), 2);
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 7);
    }

    #[test]
    fn concurrent_sessions_apply_each_line_exactly_once() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        put_sale(
            &store,
            tenant,
            &sale(
                "S-1",
                vec![SaleLine::new("Amoxil", 3).with_lot("L1"), SaleLine::new("Amoxil", 2).with_lot("L1")],
            ),
        );

        let sessions = 4;
        let barrier = Arc::new(Barrier::new(sessions));
        let handles: Vec<_> = (0..sessions)
            .map(|_| {
                let engine = engine_as(&store, tenant, Role::CASHIER);
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.apply_pending_deductions(&HashSet::new()).unwrap()
                })
            })
            .collect();

        let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let applied: usize = reports.iter().map(|r| r.applied.len()).sum();

        assert_eq!(applied, 2);
        assert_eq!(marker_count(&store, tenant), 2);
        assert_eq!(bins(&engine, id), (5, 0));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 5);
    }

    #[test]
    fn name_only_line_with_two_candidates_is_ambiguous() {
        let (store, tenant, engine) = setup();
        put_purchase(&store, tenant, &purchase("P-1", &[("X", "L1", 5), ("X", "L2", 5)]));
        engine.sync_purchase(&pid("P-1")).unwrap();

        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("X", 1)]));
        let report = apply(&engine);

        assert!(report.applied.is_empty());
        assert_eq!(report.unresolved.len(), 1);
        assert!(matches!(&report.unresolved[0].reason, UnresolvedReason::Ambiguous { candidates } if candidates.len() == 2));
        assert_eq!(marker_count(&store, tenant), 0);
        assert!(matches!(engine.resolve_sale_line("x", None), Err(ReconcileError::AmbiguousMatch(_))));
    }

    #[test]
    fn name_only_line_with_one_candidate_resolves_unless_disabled() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Zinc 10mg", "Z1", 5);
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("zinc  10MG", 1)]));

        let strict = LotEngine::new(
            store.clone(),
            engine.principal().clone(),
            config().with_name_only_match(false),
        );
        let report = strict.apply_pending_deductions(&HashSet::new()).unwrap();
        assert_eq!(report.unresolved[0].reason, UnresolvedReason::NoMatch);

        apply(&engine);
        assert_eq!(bins(&engine, id), (4, 0));
    }

    #[test]
    fn lot_deleted_after_planning_is_reported_stale() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        let s = sale("S-1", vec![SaleLine::new("Amoxil", 1).with_lot("L1")]);

        let index = engine.load_index().unwrap();
        let plan = plan_deductions(&[s], &index, &HashMap::new(), &HashSet::new(), true);
        assert_eq!(plan.tasks.len(), 1);

        engine.delete_lot(id).unwrap();
        let report = engine.apply_plan(plan);
        assert_eq!(report.unresolved[0].reason, UnresolvedReason::Stale { lot_id: id });
        assert_eq!(marker_count(&store, tenant), 0);
    }

    #[test]
    fn tenants_never_see_each_other() {
        let (store, tenant_a, engine_a) = setup();
        let tenant_b = TenantId::new();
        let engine_b = engine_as(&store, tenant_b, Role::OWNER);

        let id = received_lot(&store, tenant_a, &engine_a, "P-1", "Amoxil", "L1", 10);
        received_lot(&store, tenant_b, &engine_b, "P-1", "Amoxil", "L1", 3);

        put_sale(&store, tenant_b, &sale("S-1", vec![SaleLine::new("Amoxil", 3).with_lot("L1")]));
        apply(&engine_b);
        apply(&engine_a);

        assert_eq!(bins(&engine_a, id), (10, 0));
        assert_eq!(bins(&engine_b, id), (0, 0));
        assert_eq!(marker_count(&store, tenant_a), 0);
    }

    // ---------------------------------------------------------------------
    // Transfers
    // ---------------------------------------------------------------------

    #[test]
    fn transfer_splits_bin_a_into_a_new_lot() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);

        let derived = engine.create_transfer(id, 4, &CancellationToken::new()).unwrap();

        assert_eq!(bins(&engine, id), (6, 0));
        assert_eq!(bins(&engine, derived.id()), (0, 4));
        assert_eq!(derived.transfer_meta().map(|m| m.source_lot_id), Some(id));
        assert!(derived.source_purchase_id().is_none());
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 6);

        // Replaying the purchase leaves both lots alone.
        let report = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(bins(&engine, id), (6, 0));
        assert_eq!(bins(&engine, derived.id()), (0, 4));
    }

    #[test]
    fn sales_after_a_transfer_draw_from_the_lot_family() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        let derived = engine.create_transfer(id, 4, &CancellationToken::new()).unwrap().id();
        assert_eq!(engine.resolve_sale_line("amoxil", Some("l1")).unwrap(), id);

        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 2).with_lot("L1")]));
        put_sale(
            &store,
            tenant,
            &sale("S-2", vec![SaleLine::new("Amoxil", 1).with_lot("L1").with_bin(Bin::B)]),
        );
        let report = apply(&engine);
        assert_eq!(report.applied.len(), 2);
        assert!(report.unresolved.is_empty());
        assert_eq!(bins(&engine, id), (4, 0));
        assert_eq!(bins(&engine, derived), (0, 3));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 4);

        // An untagged line drains the source's bin A, then overflows into the
        // derived lot's bin B.
        put_sale(&store, tenant, &sale("S-3", vec![SaleLine::new("Amoxil", 6).with_lot("L1")]));
        let report = apply(&engine);
        let marker = &report.applied[0];
        assert_eq!((marker.lot_id, marker.qty_from_a, marker.qty_from_b, marker.short), (id, 4, 2, 0));
        assert_eq!(marker.draws.len(), 2);
        assert_eq!(bins(&engine, id), (0, 0));
        assert_eq!(bins(&engine, derived), (0, 1));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 0);

        let resync = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!(resync.unchanged, 1);
        assert_eq!(bins(&engine, derived), (0, 1));
    }

    #[test]
    fn transfer_beyond_bin_a_writes_nothing() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        engine.adjust_bins(id, -8, 8, "restock shelf B").unwrap();

        let err = engine.create_transfer(id, 3, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ReconcileError::Consistency(_)));
        assert_eq!(bins(&engine, id), (2, 8));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 10);
        assert_eq!(engine.list_lots(&LotFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn cancelled_transfer_writes_nothing() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(engine.create_transfer(id, 4, &token).unwrap_err(), ReconcileError::Cancelled);
        assert_eq!(bins(&engine, id), (10, 0));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 10);
        assert_eq!(engine.list_lots(&LotFilter::default()).unwrap().len(), 1);
    }

    // ---------------------------------------------------------------------
    // Returns
    // ---------------------------------------------------------------------

    #[test]
    fn return_blocks_deductions_then_settles_bin_a_first() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 7);
        engine.adjust_bins(id, -2, 2, "split shelves").unwrap();
        assert_eq!(bins(&engine, id), (5, 2));

        engine.request_return(id, 3, Decimal::new(1350, 2)).unwrap();
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 1).with_lot("L1")]));

        let blocked = apply(&engine);
        assert!(blocked.applied.is_empty());
        assert_eq!(blocked.unresolved[0].reason, UnresolvedReason::LotBlocked { lot_id: id });
        assert_eq!(marker_count(&store, tenant), 0);

        engine.validate_return(id).unwrap();
        let settled = engine.settle_return(id, &CancellationToken::new()).unwrap();
        assert_eq!((settled.bin_a(), settled.bin_b()), (2, 2));
        assert_eq!(settled.return_case().map(|c| c.state), Some(ReturnState::Settled));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 4);

        // Settled is terminal and unblocks the lot.
        apply(&engine);
        assert_eq!(bins(&engine, id), (1, 2));
    }

    #[test]
    fn cancelled_return_restores_the_lot_unchanged() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 7);
        engine.adjust_bins(id, -2, 2, "split shelves").unwrap();

        engine.request_return(id, 3, Decimal::ZERO).unwrap();
        let lot = engine.cancel_return(id).unwrap();

        assert_eq!((lot.bin_a(), lot.bin_b()), (5, 2));
        assert!(lot.return_case().is_none());
        assert!(!lot.is_blocked());
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 7);
    }

    #[test]
    fn combined_validate_and_settle_from_requested() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 5);
        engine.request_return(id, 5, Decimal::new(10, 0)).unwrap();

        let lot = engine.validate_and_settle_return(id, &CancellationToken::new()).unwrap();
        assert_eq!(lot.total_qty(), 0);
        assert!(lot.return_case().is_some_and(|c| c.validated.is_some()));

        // A fresh cycle may start on the same lot only with stock to return.
        assert!(matches!(engine.request_return(id, 1, Decimal::ZERO), Err(ReconcileError::Validation(_))));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 0);
    }

    #[test]
    fn out_of_order_return_transitions_are_rejected() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 5);

        assert!(matches!(engine.validate_return(id), Err(ReconcileError::InvalidTransition(_))));
        engine.request_return(id, 2, Decimal::ZERO).unwrap();
        assert!(matches!(
            engine.settle_return(id, &CancellationToken::new()),
            Err(ReconcileError::InvalidTransition(_))
        ));
        assert_eq!(bins(&engine, id), (5, 0));
    }

    // ---------------------------------------------------------------------
    // Lot store operations
    // ---------------------------------------------------------------------

    #[test]
    fn delete_hands_stock_back_and_is_not_resurrected() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 3).with_lot("L1")]));
        apply(&engine);

        engine.delete_lot(id).unwrap();
        assert!(engine.get_lot(id).unwrap().is_none());
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 0);

        let report = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!((report.created, report.skipped), (0, 1));
        assert!(engine.get_lot(id).unwrap().is_none());
    }

    #[test]
    fn delete_refuses_a_lot_with_a_pending_return() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        engine.request_return(id, 1, Decimal::ZERO).unwrap();

        assert!(matches!(engine.delete_lot(id), Err(ReconcileError::InvalidTransition(_))));
        assert!(engine.get_lot(id).unwrap().is_some());
    }

    #[test]
    fn negative_adjustment_is_rejected_without_partial_write() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 3);

        let err = engine.adjust_bins(id, 2, -1, "bad count").unwrap_err();
        assert!(matches!(err, ReconcileError::Consistency(_)));
        assert_eq!(bins(&engine, id), (3, 0));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 3);
    }

    #[test]
    fn recount_surplus_on_a_fresh_lot_survives_resync() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);

        engine.adjust_bins(id, 5, 0, "recount").unwrap();
        assert_eq!(bins(&engine, id), (15, 0));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 15);

        let report = engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(bins(&engine, id), (15, 0));

        let details = lot(&engine, id).details;
        engine
            .edit_lot(id, LotEdit::details(details).with_bins(BinQuantities::new(15, 3), "found on counter"))
            .unwrap();
        assert_eq!(bins(&engine, id), (15, 3));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 18);

        // Selling part of the surplus still conserves stock.
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 4).with_lot("L1")]));
        apply(&engine);
        assert_eq!(bins(&engine, id), (11, 3));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 14);
        engine.sync_purchase(&pid("P-1")).unwrap();
        assert_eq!(bins(&engine, id), (11, 3));
    }

    #[test]
    fn edit_changes_details_and_routes_quantities_through_adjustment() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);
        let mut details = lot(&engine, id).details;

        details.sale_price = Some(Decimal::new(799, 2));
        details.barcode = Some("5012345678900".into());
        let edited = engine
            .edit_lot(id, LotEdit::details(details.clone()).with_bins(BinQuantities::new(8, 0), "breakage"))
            .unwrap();
        assert_eq!(edited.total_qty(), 8);
        assert_eq!(edited.last_adjustment().map(|s| s.note.as_str()), Some("breakage"));
        assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), 8);
        assert_eq!(engine.list_lots(&LotFilter::query("50123")).unwrap().len(), 1);

        let mut renamed = details.clone();
        renamed.product_name = "Amoxil Forte".into();
        assert!(matches!(
            engine.edit_lot(id, LotEdit::details(renamed)),
            Err(ReconcileError::Validation(_))
        ));

        let mut no_note = LotEdit::details(details);
        no_note.bins = Some(BinQuantities::new(1, 0));
        assert!(matches!(engine.edit_lot(id, no_note), Err(ReconcileError::Validation(_))));
    }

    #[test]
    fn upsert_refuses_quantity_changes_on_existing_lots() {
        let (_store, _tenant, engine) = setup();
        let created = engine
            .create_lot(LotDraft::new("Vitamin C", "VC-1"), BinQuantities::new(4, 1))
            .unwrap();

        let mut details_only = created.clone();
        details_only.details.supplier_name = "Local wholesaler".into();
        engine.upsert_lot(details_only).unwrap();
        assert_eq!(lot(&engine, created.id()).details.supplier_name, "Local wholesaler");

        let resized = Lot::new(
            created.id(),
            created.details.clone(),
            BinQuantities::new(9, 9),
            None,
            created.created().clone(),
        )
        .unwrap();
        assert!(matches!(engine.upsert_lot(resized), Err(ReconcileError::Consistency(_))));
        assert_eq!(bins(&engine, created.id()), (4, 1));
    }

    #[test]
    fn operators_without_permission_change_nothing() {
        let (store, tenant, engine) = setup();
        let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 10);

        let viewer = engine_as(&store, tenant, Role::VIEWER);
        assert!(matches!(
            viewer.create_transfer(id, 1, &CancellationToken::new()),
            Err(ReconcileError::PermissionDenied(_))
        ));
        assert!(matches!(
            viewer.apply_pending_deductions(&HashSet::new()),
            Err(ReconcileError::PermissionDenied(_))
        ));
        assert_eq!(viewer.list_lots(&LotFilter::default()).unwrap().len(), 1);

        let cashier = engine_as(&store, tenant, Role::CASHIER);
        assert!(matches!(cashier.delete_lot(id), Err(ReconcileError::PermissionDenied(_))));
        assert_eq!(bins(&engine, id), (10, 0));
    }

    // ---------------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------------

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<EngineStatus>>,
        lot_counts: Mutex<Vec<usize>>,
    }

    impl EngineObserver for Recorder {
        fn on_status(&self, status: &EngineStatus) {
            self.statuses.lock().unwrap().push(status.clone());
        }

        fn on_lots(&self, lots: &[Lot]) {
            self.lot_counts.lock().unwrap().push(lots.len());
        }
    }

    #[test]
    fn session_reacts_to_snapshots_and_tracks_the_backlog() {
        let (store, tenant, engine) = setup();
        put_purchase(&store, tenant, &purchase("P-1", &[("Amoxil", "L1", 10)]));

        let recorder = Arc::new(Recorder::default());
        let mut session = ReconciliationSession::new(engine).with_observer(recorder.clone());

        assert!(session.pump().unwrap());
        assert_eq!(session.last_sync().created, 1);
        assert_eq!(session.lots(&LotFilter::default()).len(), 1);
        assert_eq!(recorder.lot_counts.lock().unwrap().last(), Some(&1));
        assert_eq!(session.status(), &EngineStatus::Idle);
        assert!(!session.is_syncing());

        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 4).with_lot("L1")]));
        session.pump().unwrap();
        assert_eq!(session.last_report().applied.len(), 1);

        // Our own writes come back as snapshots; replanning is a no-op.
        session.pump().unwrap();
        assert_eq!(session.last_report().already_applied, 1);
        assert_eq!(session.lots(&LotFilter::default())[0].total_qty(), 6);
        assert!(!session.pump().unwrap());

        put_sale(&store, tenant, &sale("S-2", vec![SaleLine::new("Ghost", 1)]));
        session.pump().unwrap();
        assert_eq!(session.status(), &EngineStatus::Unresolved(1));

        let ghost: OperationId = "S-2#0".parse().unwrap();
        session.dismiss_deduction(ghost.clone());
        assert_eq!(session.status(), &EngineStatus::Idle);
        assert_eq!(session.unresolved_count(), 0);

        assert!(session.restore_deduction(&ghost));
        session.pump().unwrap();
        assert_eq!(session.unresolved_count(), 1);

        let statuses = recorder.statuses.lock().unwrap();
        assert!(statuses.contains(&EngineStatus::Syncing));
        assert_eq!(statuses.last(), Some(&EngineStatus::Unresolved(1)));
    }

    #[test]
    fn partial_draw_stays_on_the_backlog_across_passes() {
        let (store, tenant, engine) = setup();
        put_purchase(&store, tenant, &purchase("P-1", &[("Amoxil", "L1", 3)]));
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 5).with_lot("L1")]));

        let mut session = ReconciliationSession::new(engine);
        assert!(session.pump().unwrap());
        assert_eq!(session.status(), &EngineStatus::Unresolved(1));

        // Our own writes echo back; the shortfall must survive the replan.
        assert!(session.pump().unwrap());
        while session.pump().unwrap() {}
        assert_eq!(session.status(), &EngineStatus::Unresolved(1));
        assert_eq!(session.last_report().already_applied, 1);
        assert!(matches!(
            session.last_report().unresolved.as_slice(),
            [u] if matches!(u.reason, UnresolvedReason::Insufficient { short: 2, .. })
        ));
        assert_eq!(marker_count(&store, tenant), 1);

        session.dismiss_deduction("S-1#0".parse().unwrap());
        assert_eq!(session.status(), &EngineStatus::Idle);
        put_sale(&store, tenant, &sale("S-2", vec![SaleLine::new("Ghost", 1)]));
        session.pump().unwrap();
        assert_eq!(session.unresolved_count(), 1);
        assert_eq!(session.last_report().dismissed, 1);
    }

    #[test]
    fn manual_mode_holds_deductions_until_triggered() {
        let (store, tenant, engine) = setup();
        let engine = LotEngine::new(store.clone(), engine.principal().clone(), config().with_auto_apply(false));
        put_purchase(&store, tenant, &purchase("P-1", &[("Amoxil", "L1", 10)]));
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 2).with_lot("L1")]));

        let mut session = ReconciliationSession::new(engine);
        session.pump().unwrap();
        assert_eq!(session.pending_deductions().len(), 1);
        assert_eq!(marker_count(&store, tenant), 0);

        let report = session.apply_pending_deductions().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert!(session.pending_deductions().is_empty());
        assert_eq!(marker_count(&store, tenant), 1);
    }

    #[test]
    fn background_worker_converges_and_hands_the_session_back() {
        let (store, tenant, engine) = setup();
        let id = lot_id_for(&pid("P-1"), &LineKey::new("Amoxil", "L1"));
        let session = ReconciliationSession::new(engine);
        let handle = SessionWorker::spawn("lot-session", session, Duration::from_millis(5)).unwrap();

        put_purchase(&store, tenant, &purchase("P-1", &[("Amoxil", "L1", 10)]));
        put_sale(&store, tenant, &sale("S-1", vec![SaleLine::new("Amoxil", 4).with_lot("L1")]));

        let deadline = Instant::now() + Duration::from_secs(5);
        while marker_count(&store, tenant) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let session = handle.shutdown().expect("worker returns its session");
        assert_eq!(marker_count(&store, tenant), 1);
        assert_eq!(bins(session.engine(), id), (6, 0));
    }

    // ---------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn deductions_conserve_quantity(
            requests in proptest::collection::vec(1i64..8, 1..6),
            moved in 0i64..10,
        ) {
            let (store, tenant, engine) = setup();
            let id = received_lot(&store, tenant, &engine, "P-1", "Amoxil", "L1", 20);
            engine.adjust_bins(id, -moved, moved, "shelve").unwrap();

            for (i, qty) in requests.iter().enumerate() {
                put_sale(&store, tenant, &sale(&format!("S-{i}"), vec![SaleLine::new("Amoxil", *qty).with_lot("L1")]));
            }
            apply(&engine);
            apply(&engine);

            let l = lot(&engine, id);
            prop_assert!(l.check_invariant().is_ok());
            let expected = (20 - requests.iter().sum::<i64>()).max(0);
            prop_assert_eq!(l.total_qty(), expected);
            prop_assert_eq!(remaining(&store, tenant, "P-1", "Amoxil", "L1"), expected);
            prop_assert!(marker_count(&store, tenant) <= requests.len());
        }
    }
}
