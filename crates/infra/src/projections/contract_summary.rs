use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use pacterp_contracts::{AllocationId, ContractEvent, ContractId, ContractStatus, PaymentId};
use pacterp_core::{AggregateId, TenantId};
use pacterp_events::EventEnvelope;
use pacterp_registry::ProjectId;

use crate::read_model::TenantStore;

/// Per-allocation totals tracked inside the summary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AllocationTotals {
    contract_quantity: Decimal,
    take_quantity: Decimal,
    removed: bool,
}

/// Queryable contract read model: status, spend totals, quantity totals.
///
/// `total_spent` figures are maintained incrementally from payment events
/// using each payment's frozen rate; the registry is never consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSummary {
    pub contract_id: ContractId,
    pub name: String,
    pub project_id: ProjectId,
    pub status: ContractStatus,
    pub amount: Decimal,
    pub project_currency_exchange_rate: Decimal,
    pub total_spent_in_contract_currency: Decimal,
    pub contracted_quantity: Decimal,
    pub delivered_quantity: Decimal,
    /// Number of payments ever recorded (terminal payments stay counted).
    pub payment_count: u64,

    // Converted amounts of payments still pending, keyed for later finish/cancel.
    pending_payments: HashMap<PaymentId, Decimal>,
    allocations: HashMap<AllocationId, AllocationTotals>,
}

impl ContractSummary {
    /// Total spent in the owning project's currency, via the frozen rate.
    pub fn total_spent(&self) -> Decimal {
        self.total_spent_in_contract_currency * self.project_currency_exchange_rate
    }
}

/// Tenant+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ContractProjectionError {
    #[error("failed to deserialize contract event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state lock poisoned")]
    LockPoisoned,
}

/// Contract summary projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a tenant-isolated
/// read model. Read models are disposable and rebuildable from the event stream.
#[derive(Debug)]
pub struct ContractSummaryProjection<S>
where
    S: TenantStore<ContractId, ContractSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ContractSummaryProjection<S>
where
    S: TenantStore<ContractId, ContractSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the read model for one tenant/contract.
    pub fn get(&self, tenant_id: TenantId, contract_id: &ContractId) -> Option<ContractSummary> {
        self.store.get(tenant_id, contract_id)
    }

    /// List all contract summaries for a tenant (disposable read model).
    pub fn list(&self, tenant_id: TenantId) -> Vec<ContractSummary> {
        self.store.list(tenant_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces tenant isolation
    /// - Enforces monotonic sequence per (tenant, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ContractProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // A poisoned lock means dropped events; the consumer must hear about it.
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| ContractProjectionError::LockPoisoned)?;

        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(ContractProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }

        // Allow the first observed event to carry any positive sequence (a
        // stream may be joined mid-way); afterwards require strict increments.
        if seq != last + 1 && last != 0 {
            return Err(ContractProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: ContractEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ContractProjectionError::Deserialize(e.to_string()))?;

        // Validate tenant isolation at the event level.
        let (event_tenant, contract_id) = event_scope(&event);
        if event_tenant != tenant_id {
            return Err(ContractProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if contract_id.0 != aggregate_id {
            return Err(ContractProjectionError::TenantIsolation(
                "event contract_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.apply_event(tenant_id, contract_id, event);

        // Advance cursor after successful apply.
        cursors.insert(key, seq);

        Ok(())
    }

    fn apply_event(&self, tenant_id: TenantId, contract_id: ContractId, event: ContractEvent) {
        match event {
            ContractEvent::ContractSigned(e) => {
                self.store.upsert(
                    tenant_id,
                    contract_id,
                    ContractSummary {
                        contract_id,
                        name: e.terms.name,
                        project_id: e.terms.project_id,
                        status: ContractStatus::Active,
                        amount: e.terms.amount,
                        project_currency_exchange_rate: e.terms.project_currency_exchange_rate,
                        total_spent_in_contract_currency: Decimal::ZERO,
                        contracted_quantity: Decimal::ZERO,
                        delivered_quantity: Decimal::ZERO,
                        payment_count: 0,
                        pending_payments: HashMap::new(),
                        allocations: HashMap::new(),
                    },
                );
            }
            ContractEvent::ContractCompleted(_) => {
                self.update(tenant_id, contract_id, |s| {
                    s.status = ContractStatus::Completed;
                });
            }
            ContractEvent::ContractCanceled(_) => {
                self.update(tenant_id, contract_id, |s| {
                    s.status = ContractStatus::Canceled;
                });
            }
            ContractEvent::PaymentRecorded(e) => {
                let converted =
                    e.amount * e.contract_currency_exchange_rate.unwrap_or(Decimal::ONE);
                self.update(tenant_id, contract_id, |s| {
                    s.pending_payments.insert(e.payment_id, converted);
                    s.payment_count += 1;
                });
            }
            ContractEvent::PaymentFinished(e) => {
                self.update(tenant_id, contract_id, |s| {
                    if let Some(converted) = s.pending_payments.remove(&e.payment_id) {
                        s.total_spent_in_contract_currency += converted;
                    }
                });
            }
            ContractEvent::PaymentCanceled(e) => {
                self.update(tenant_id, contract_id, |s| {
                    s.pending_payments.remove(&e.payment_id);
                });
            }
            ContractEvent::AllocationAdded(e) => {
                self.update(tenant_id, contract_id, |s| {
                    s.allocations.insert(
                        e.allocation_id,
                        AllocationTotals {
                            contract_quantity: e.contract_quantity,
                            take_quantity: Decimal::ZERO,
                            removed: false,
                        },
                    );
                    s.contracted_quantity += e.contract_quantity;
                });
            }
            ContractEvent::AllocationRevised(e) => {
                self.update(tenant_id, contract_id, |s| {
                    if let Some(a) = s.allocations.get_mut(&e.allocation_id) {
                        s.contracted_quantity += e.contract_quantity - a.contract_quantity;
                        a.contract_quantity = e.contract_quantity;
                    }
                });
            }
            ContractEvent::MovementRecorded(e) => {
                self.update(tenant_id, contract_id, |s| {
                    if let Some(a) = s.allocations.get_mut(&e.allocation_id) {
                        a.take_quantity += e.quantity;
                        s.delivered_quantity += e.quantity;
                    }
                });
            }
            ContractEvent::AllocationRemoved(e) => {
                self.update(tenant_id, contract_id, |s| {
                    if let Some(a) = s.allocations.get_mut(&e.allocation_id) {
                        if !a.removed {
                            s.contracted_quantity -= a.contract_quantity;
                            s.delivered_quantity -= a.take_quantity;
                            a.removed = true;
                        }
                    }
                });
            }
        }
    }

    fn update(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        f: impl FnOnce(&mut ContractSummary),
    ) {
        if let Some(mut summary) = self.store.get(tenant_id, &contract_id) {
            f(&mut summary);
            self.store.upsert(tenant_id, contract_id, summary);
        }
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ContractProjectionError> {
        self.cursors
            .write()
            .map_err(|_| ContractProjectionError::LockPoisoned)?
            .clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per tenant before rebuilding.
        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
            }
        }

        // Deterministic replay order: tenant, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}


fn event_scope(event: &ContractEvent) -> (TenantId, ContractId) {
    match event {
        ContractEvent::ContractSigned(e) => (e.tenant_id, e.contract_id),
        ContractEvent::ContractCompleted(e) => (e.tenant_id, e.contract_id),
        ContractEvent::ContractCanceled(e) => (e.tenant_id, e.contract_id),
        ContractEvent::PaymentRecorded(e) => (e.tenant_id, e.contract_id),
        ContractEvent::PaymentFinished(e) => (e.tenant_id, e.contract_id),
        ContractEvent::PaymentCanceled(e) => (e.tenant_id, e.contract_id),
        ContractEvent::AllocationAdded(e) => (e.tenant_id, e.contract_id),
        ContractEvent::AllocationRevised(e) => (e.tenant_id, e.contract_id),
        ContractEvent::MovementRecorded(e) => (e.tenant_id, e.contract_id),
        ContractEvent::AllocationRemoved(e) => (e.tenant_id, e.contract_id),
    }
}
