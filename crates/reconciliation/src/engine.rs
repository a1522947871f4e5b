//! The engine facade.
//!
//! `LotEngine` bundles a document store, the acting operator and the engine
//! configuration. Every imperative operation checks the operator's
//! permission first, then runs as one optimistic transaction: the operation
//! either fully commits or leaves the store untouched.
//!
//! Operations are spread over the modules that own their rules:
//!
//! ```text
//! lots.rs           get / list / create / upsert / adjust_bins / edit / delete
//! purchase_sync.rs  sync_purchase / sync_purchases
//! deduction.rs      reconcile_sales / apply_pending_deductions / resolve_sale_line
//! transfer.rs       create_transfer
//! returns.rs        request / validate / settle / validate_and_settle / cancel
//! ```

use lotledger_auth::{Permission, Principal, authorize};
use lotledger_core::{AuditStamp, TenantId, UserId};
use lotledger_infra::{DocumentStore, Transaction, run_transaction};

use crate::config::EngineConfig;
use crate::error::ReconcileResult;

#[derive(Debug)]
pub struct LotEngine<S> {
    store: S,
    principal: Principal,
    config: EngineConfig,
}

impl<S: DocumentStore> LotEngine<S> {
    pub fn new(store: S, principal: Principal, config: EngineConfig) -> Self {
        Self {
            store,
            principal,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tenant_id(&self) -> TenantId {
        self.principal.active_tenant_id
    }

    pub fn actor(&self) -> UserId {
        self.principal.user_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn authorize(&self, required: &Permission) -> ReconcileResult<()> {
        authorize(&self.principal, required).map_err(|e| {
            tracing::warn!(
                tenant_id = %self.tenant_id(),
                user_id = %self.actor(),
                permission = required.as_str(),
                error = %e,
                "operation refused"
            );
            e.into()
        })
    }

    pub(crate) fn stamp(&self, note: impl Into<String>) -> AuditStamp {
        AuditStamp::now(self.actor(), note)
    }

    /// Run `body` as one optimistic transaction under the configured retry
    /// budget.
    pub(crate) fn transact<T, F>(&self, body: F) -> ReconcileResult<T>
    where
        F: FnMut(&mut Transaction<'_, S>) -> ReconcileResult<T>,
    {
        run_transaction(&self.store, self.tenant_id(), &self.config.retry, body)
    }
}
