use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use pacterp_contracts::{ContractEvent, ContractId, PaymentId};
use pacterp_core::{AggregateId, TenantId};
use pacterp_events::EventEnvelope;
use pacterp_registry::ProjectId;

use crate::read_model::TenantStore;

/// Per-project rollup across all of its contracts.
///
/// Every figure is expressed in the project's currency, converted via the
/// rates frozen on each contract and payment at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRollup {
    pub project_id: ProjectId,
    pub active_contracts: u64,
    pub completed_contracts: u64,
    pub canceled_contracts: u64,
    pub total_contracted_amount: Decimal,
    pub total_spent: Decimal,
}

/// Where a contract's figures roll up to, captured at signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContractRef {
    project_id: ProjectId,
    project_rate: Decimal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProjectRollupError {
    #[error("failed to deserialize contract event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state lock poisoned")]
    LockPoisoned,
}

/// Project rollup projection.
///
/// Consumes contract envelopes and folds them into per-project totals. The
/// contract-to-project mapping and pending payment amounts are internal
/// bookkeeping, rebuilt along with the rollups on replay.
#[derive(Debug)]
pub struct ProjectRollupProjection<S>
where
    S: TenantStore<ProjectId, ProjectRollup>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    contracts: RwLock<HashMap<(TenantId, ContractId), ContractRef>>,
    // Pending payment amounts already converted to the project currency.
    pending_payments: RwLock<HashMap<(TenantId, PaymentId), Decimal>>,
}

impl<S> ProjectRollupProjection<S>
where
    S: TenantStore<ProjectId, ProjectRollup>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            contracts: RwLock::new(HashMap::new()),
            pending_payments: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, project_id: &ProjectId) -> Option<ProjectRollup> {
        self.store.get(tenant_id, project_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProjectRollup> {
        self.store.list(tenant_id)
    }

    /// Apply a published envelope into the projection (cursor-guarded).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectRollupError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // A poisoned lock means dropped events; the consumer must hear about it.
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| ProjectRollupError::LockPoisoned)?;

        let key = CursorKey {
            tenant_id,
            aggregate_id,
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(ProjectRollupError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectRollupError::NonMonotonicSequence { last, found: seq });
        }

        let event: ContractEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectRollupError::Deserialize(e.to_string()))?;

        self.apply_event(tenant_id, event)?;
        cursors.insert(key, seq);

        Ok(())
    }

    fn apply_event(&self, tenant_id: TenantId, event: ContractEvent) -> Result<(), ProjectRollupError> {
        match event {
            ContractEvent::ContractSigned(e) => {
                if e.tenant_id != tenant_id {
                    return Err(ProjectRollupError::TenantIsolation(
                        "event tenant_id does not match envelope tenant_id".to_string(),
                    ));
                }

                let project_id = e.terms.project_id;
                let project_rate = e.terms.project_currency_exchange_rate;
                self.contracts
                    .write()
                    .map_err(|_| ProjectRollupError::LockPoisoned)?
                    .insert(
                        (tenant_id, e.contract_id),
                        ContractRef {
                            project_id,
                            project_rate,
                        },
                    );

                let mut rollup = self.rollup_or_default(tenant_id, project_id);
                rollup.active_contracts += 1;
                rollup.total_contracted_amount += e.terms.amount * project_rate;
                self.store.upsert(tenant_id, project_id, rollup);
            }
            ContractEvent::ContractCompleted(e) => {
                self.close_contract(tenant_id, e.contract_id, |r| r.completed_contracts += 1)?;
            }
            ContractEvent::ContractCanceled(e) => {
                self.close_contract(tenant_id, e.contract_id, |r| r.canceled_contracts += 1)?;
            }
            ContractEvent::PaymentRecorded(e) => {
                let Some(contract) = self.contract_ref(tenant_id, e.contract_id)? else {
                    return Ok(());
                };
                let converted = e.amount
                    * e.contract_currency_exchange_rate.unwrap_or(Decimal::ONE)
                    * contract.project_rate;
                self.pending_payments
                    .write()
                    .map_err(|_| ProjectRollupError::LockPoisoned)?
                    .insert((tenant_id, e.payment_id), converted);
            }
            ContractEvent::PaymentFinished(e) => {
                let Some(contract) = self.contract_ref(tenant_id, e.contract_id)? else {
                    return Ok(());
                };
                let converted = self
                    .pending_payments
                    .write()
                    .map_err(|_| ProjectRollupError::LockPoisoned)?
                    .remove(&(tenant_id, e.payment_id));
                if let Some(converted) = converted {
                    let mut rollup = self.rollup_or_default(tenant_id, contract.project_id);
                    rollup.total_spent += converted;
                    self.store.upsert(tenant_id, contract.project_id, rollup);
                }
            }
            ContractEvent::PaymentCanceled(e) => {
                self.pending_payments
                    .write()
                    .map_err(|_| ProjectRollupError::LockPoisoned)?
                    .remove(&(tenant_id, e.payment_id));
            }
            // Inventory movements do not affect project financials.
            ContractEvent::AllocationAdded(_)
            | ContractEvent::AllocationRevised(_)
            | ContractEvent::MovementRecorded(_)
            | ContractEvent::AllocationRemoved(_) => {}
        }

        Ok(())
    }

    fn contract_ref(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
    ) -> Result<Option<ContractRef>, ProjectRollupError> {
        let contracts = self
            .contracts
            .read()
            .map_err(|_| ProjectRollupError::LockPoisoned)?;
        Ok(contracts.get(&(tenant_id, contract_id)).copied())
    }

    fn rollup_or_default(&self, tenant_id: TenantId, project_id: ProjectId) -> ProjectRollup {
        self.store
            .get(tenant_id, &project_id)
            .unwrap_or(ProjectRollup {
                project_id,
                active_contracts: 0,
                completed_contracts: 0,
                canceled_contracts: 0,
                total_contracted_amount: Decimal::ZERO,
                total_spent: Decimal::ZERO,
            })
    }

    fn close_contract(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        count: impl FnOnce(&mut ProjectRollup),
    ) -> Result<(), ProjectRollupError> {
        let Some(contract) = self.contract_ref(tenant_id, contract_id)? else {
            return Ok(());
        };
        let mut rollup = self.rollup_or_default(tenant_id, contract.project_id);
        rollup.active_contracts = rollup.active_contracts.saturating_sub(1);
        count(&mut rollup);
        self.store.upsert(tenant_id, contract.project_id, rollup);
        Ok(())
    }

    /// Rebuild the rollups from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectRollupError> {
        self.cursors
            .write()
            .map_err(|_| ProjectRollupError::LockPoisoned)?
            .clear();
        self.contracts
            .write()
            .map_err(|_| ProjectRollupError::LockPoisoned)?
            .clear();
        self.pending_payments
            .write()
            .map_err(|_| ProjectRollupError::LockPoisoned)?
            .clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
            }
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryTenantStore;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn poisoned_cursor_lock_surfaces_an_error() {
        let projection = Arc::new(ProjectRollupProjection::new(InMemoryTenantStore::<
            ProjectId,
            ProjectRollup,
        >::new()));

        let poisoner = Arc::clone(&projection);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.cursors.write().unwrap();
            panic!("poison the cursor lock");
        })
        .join();

        let envelope = EventEnvelope::new(TenantId::new(), AggregateId::new(), 1, json!({}));
        assert!(matches!(
            projection.apply_envelope(&envelope),
            Err(ProjectRollupError::LockPoisoned)
        ));
    }
}
