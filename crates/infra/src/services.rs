//! Application services: reference resolution + command dispatch.
//!
//! Aggregates stay pure, so anything that needs a lookup outside the contract
//! stream happens here: registry ids (project, currency, parties, company,
//! product) are resolved through the `ReferenceDirectory` before the command
//! is dispatched, and a currency that backs a committed financial record is
//! pinned afterwards so the registry refuses to rewrite it.

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use pacterp_contracts::{
    AddAllocation, CancelContract, CancelPayment, CompleteContract, Contract, ContractCommand,
    ContractId, FinishPayment, RecordMovement, RecordPayment, RemoveAllocation, ReviseAllocation,
    SignContract,
};
use pacterp_core::TenantId;
use pacterp_events::{EventBus, EventEnvelope};
use pacterp_registry::ReferenceDirectory;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

/// Stream type identifier for contract aggregates.
pub const CONTRACT_AGGREGATE_TYPE: &str = "contracts.contract";

/// Contract application service.
///
/// One method per operation; each resolves referenced ids, dispatches the
/// command through the event-sourcing pipeline, and returns the committed
/// events.
#[derive(Debug)]
pub struct ContractService<S, B, D> {
    dispatcher: CommandDispatcher<S, B>,
    directory: D,
}

impl<S, B, D> ContractService<S, B, D> {
    pub fn new(dispatcher: CommandDispatcher<S, B>, directory: D) -> Self {
        Self {
            dispatcher,
            directory,
        }
    }
}

impl<S, B, D> ContractService<S, B, D>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: ReferenceDirectory,
{
    pub fn sign_contract(&self, cmd: SignContract) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let currency_id = cmd.terms.currency_id;

        self.directory.resolve_project(tenant_id, cmd.terms.project_id)?;
        self.directory.resolve_currency(tenant_id, currency_id)?;
        self.directory.resolve_party(tenant_id, cmd.terms.applicant_id)?;
        self.directory.resolve_party(tenant_id, cmd.terms.purchaser_id)?;
        self.directory.resolve_company(tenant_id, cmd.terms.company_id)?;

        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::SignContract(cmd))?;

        // The signing terms now carry a frozen rate for this currency.
        self.directory.mark_currency_referenced(tenant_id, currency_id);

        info!(%tenant_id, %contract_id, "contract signed");
        Ok(committed)
    }

    pub fn complete_contract(
        &self,
        cmd: CompleteContract,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::CompleteContract(cmd))?;
        info!(%tenant_id, %contract_id, "contract completed");
        Ok(committed)
    }

    pub fn cancel_contract(&self, cmd: CancelContract) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::CancelContract(cmd))?;
        info!(%tenant_id, %contract_id, "contract canceled");
        Ok(committed)
    }

    pub fn record_payment(&self, cmd: RecordPayment) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let payment_id = cmd.payment_id;
        let currency_id = cmd.currency_id;

        self.directory.resolve_currency(tenant_id, currency_id)?;

        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::RecordPayment(cmd))?;

        self.directory.mark_currency_referenced(tenant_id, currency_id);

        debug!(%tenant_id, %contract_id, %payment_id, "payment recorded");
        Ok(committed)
    }

    pub fn finish_payment(&self, cmd: FinishPayment) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let payment_id = cmd.payment_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::FinishPayment(cmd))?;
        debug!(%tenant_id, %contract_id, %payment_id, "payment finished");
        Ok(committed)
    }

    pub fn cancel_payment(&self, cmd: CancelPayment) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let payment_id = cmd.payment_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::CancelPayment(cmd))?;
        debug!(%tenant_id, %contract_id, %payment_id, "payment canceled");
        Ok(committed)
    }

    pub fn add_allocation(&self, cmd: AddAllocation) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let allocation_id = cmd.allocation_id;

        self.directory.resolve_product(tenant_id, cmd.product_id)?;

        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::AddAllocation(cmd))?;
        debug!(%tenant_id, %contract_id, %allocation_id, "allocation added");
        Ok(committed)
    }

    pub fn revise_allocation(
        &self,
        cmd: ReviseAllocation,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let allocation_id = cmd.allocation_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::ReviseAllocation(cmd))?;
        debug!(%tenant_id, %contract_id, %allocation_id, "allocation revised");
        Ok(committed)
    }

    pub fn record_movement(&self, cmd: RecordMovement) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let allocation_id = cmd.allocation_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::RecordMovement(cmd))?;
        debug!(%tenant_id, %contract_id, %allocation_id, "movement recorded");
        Ok(committed)
    }

    pub fn remove_allocation(
        &self,
        cmd: RemoveAllocation,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let tenant_id = cmd.tenant_id;
        let contract_id = cmd.contract_id;
        let allocation_id = cmd.allocation_id;
        let committed =
            self.dispatch(tenant_id, contract_id, ContractCommand::RemoveAllocation(cmd))?;
        debug!(%tenant_id, %contract_id, %allocation_id, "allocation removed");
        Ok(committed)
    }

    /// Rehydrate the current contract state (read-side convenience).
    pub fn load_contract(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
    ) -> Result<Contract, DispatchError> {
        self.dispatcher
            .load(tenant_id, contract_id.0, |_, id| {
                Contract::empty(ContractId::new(id))
            })
    }

    fn dispatch(
        &self,
        tenant_id: TenantId,
        contract_id: ContractId,
        command: ContractCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch(
            tenant_id,
            contract_id.0,
            CONTRACT_AGGREGATE_TYPE,
            command,
            |_, id| Contract::empty(ContractId::new(id)),
        )
    }
}
