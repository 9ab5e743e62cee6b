use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pacterp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use pacterp_events::Event;
use pacterp_registry::{CompanyId, CurrencyId, PartyId, ProductId, ProjectId};

use crate::allocation::{AllocationId, MovementEntry, MovementId, MovementKind, ProductAllocation};
use crate::payment::{Payment, PaymentId, PaymentStatus};

/// Contract identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub AggregateId);

impl ContractId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ContractId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Contract status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Completed,
    Canceled,
}

impl ContractStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ContractStatus::Completed | ContractStatus::Canceled)
    }
}

impl core::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Immutable signing terms of a contract.
///
/// `project_currency_exchange_rate` is the snapshot rate to the owning
/// project's currency at signing time, frozen thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub name: String,
    pub kind: String,
    pub project_id: ProjectId,
    pub applicant_id: PartyId,
    pub purchaser_id: PartyId,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub amount: Decimal,
    pub sign_date: NaiveDate,
    pub official_begin_date: NaiveDate,
    pub official_finish_date: NaiveDate,
    pub project_currency_exchange_rate: Decimal,
    pub note: Option<String>,
}

/// Aggregate root: Contract.
///
/// Exclusively owns its payment ledger and product allocations; deleting or
/// closing the contract can never orphan them. Summary figures are pure
/// folds over the owned collections, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    id: ContractId,
    tenant_id: Option<TenantId>,
    terms: Option<ContractTerms>,
    status: ContractStatus,
    finish_date: Option<NaiveDate>,
    give_amount: Option<Decimal>,
    finish_note: Option<String>,
    payments: Vec<Payment>,
    allocations: Vec<ProductAllocation>,
    version: u64,
    created: bool,
}

impl Contract {
    /// Create an empty, not-yet-signed aggregate instance for rehydration.
    pub fn empty(id: ContractId) -> Self {
        Self {
            id,
            tenant_id: None,
            terms: None,
            status: ContractStatus::Active,
            finish_date: None,
            give_amount: None,
            finish_note: None,
            payments: Vec::new(),
            allocations: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ContractId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn terms(&self) -> Option<&ContractTerms> {
        self.terms.as_ref()
    }

    pub fn status(&self) -> ContractStatus {
        self.status
    }

    pub fn finish_date(&self) -> Option<NaiveDate> {
        self.finish_date
    }

    pub fn give_amount(&self) -> Option<Decimal> {
        self.give_amount
    }

    pub fn finish_note(&self) -> Option<&str> {
        self.finish_note.as_deref()
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn allocations(&self) -> &[ProductAllocation] {
        &self.allocations
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id_typed() == payment_id)
    }

    pub fn allocation(&self, allocation_id: AllocationId) -> Option<&ProductAllocation> {
        self.allocations
            .iter()
            .find(|a| a.id_typed() == allocation_id)
    }

    /// Frozen snapshot rate from contract currency to project currency.
    pub fn project_currency_exchange_rate(&self) -> Decimal {
        self.terms
            .as_ref()
            .map(|t| t.project_currency_exchange_rate)
            .unwrap_or(Decimal::ONE)
    }

    /// Sum of finished payments converted into the contract currency.
    ///
    /// Pending and canceled payments contribute nothing.
    pub fn total_spent_in_contract_currency(&self) -> Decimal {
        self.payments
            .iter()
            .filter(|p| p.status() == PaymentStatus::Finished)
            .map(Payment::converted_amount)
            .sum()
    }

    /// Total spent in the owning project's currency, via the frozen rates.
    pub fn total_spent(&self) -> Decimal {
        self.total_spent_in_contract_currency() * self.project_currency_exchange_rate()
    }

    /// Committed quantity over live (non-removed) allocations.
    pub fn contracted_quantity(&self) -> Decimal {
        self.allocations
            .iter()
            .filter(|a| !a.is_removed())
            .map(ProductAllocation::contract_quantity)
            .sum()
    }

    /// Delivered quantity over live (non-removed) allocations.
    pub fn delivered_quantity(&self) -> Decimal {
        self.allocations
            .iter()
            .filter(|a| !a.is_removed())
            .map(ProductAllocation::take_quantity)
            .sum()
    }
}

impl AggregateRoot for Contract {
    type Id = ContractId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SignContract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignContract {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub terms: ContractTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteContract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteContract {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub finish_date: NaiveDate,
    pub give_amount: Option<Decimal>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelContract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContract {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub kind: String,
    pub currency_id: CurrencyId,
    pub give_date: NaiveDate,
    pub amount: Decimal,
    /// Frozen at recording time; omitted for contract-currency payments.
    pub contract_currency_exchange_rate: Option<Decimal>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinishPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishPayment {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub give_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayment {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAllocation {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub product_id: ProductId,
    pub kind: String,
    pub contract_quantity: Decimal,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseAllocation {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub contract_quantity: Decimal,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub movement_id: MovementId,
    pub movement_kind: MovementKind,
    pub quantity: Decimal,
    pub give_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAllocation {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCommand {
    SignContract(SignContract),
    CompleteContract(CompleteContract),
    CancelContract(CancelContract),
    RecordPayment(RecordPayment),
    FinishPayment(FinishPayment),
    CancelPayment(CancelPayment),
    AddAllocation(AddAllocation),
    ReviseAllocation(ReviseAllocation),
    RecordMovement(RecordMovement),
    RemoveAllocation(RemoveAllocation),
}

/// Event: ContractSigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSigned {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub terms: ContractTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContractCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCompleted {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub finish_date: NaiveDate,
    pub give_amount: Option<Decimal>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContractCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCanceled {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub kind: String,
    pub currency_id: CurrencyId,
    pub give_date: NaiveDate,
    pub amount: Decimal,
    pub contract_currency_exchange_rate: Option<Decimal>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentFinished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFinished {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub give_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCanceled {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationAdded {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub product_id: ProductId,
    pub kind: String,
    pub contract_quantity: Decimal,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRevised {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub contract_quantity: Decimal,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
///
/// Applying this event appends the immutable history entry AND folds it into
/// the cached `take_quantity` in the same state transition - the history and
/// the cache cannot diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub movement_id: MovementId,
    pub movement_kind: MovementKind,
    pub quantity: Decimal,
    pub give_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationRemoved (soft delete; history is preserved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRemoved {
    pub tenant_id: TenantId,
    pub contract_id: ContractId,
    pub allocation_id: AllocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    ContractSigned(ContractSigned),
    ContractCompleted(ContractCompleted),
    ContractCanceled(ContractCanceled),
    PaymentRecorded(PaymentRecorded),
    PaymentFinished(PaymentFinished),
    PaymentCanceled(PaymentCanceled),
    AllocationAdded(AllocationAdded),
    AllocationRevised(AllocationRevised),
    MovementRecorded(MovementRecorded),
    AllocationRemoved(AllocationRemoved),
}

impl Event for ContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::ContractSigned(_) => "contracts.contract.signed",
            ContractEvent::ContractCompleted(_) => "contracts.contract.completed",
            ContractEvent::ContractCanceled(_) => "contracts.contract.canceled",
            ContractEvent::PaymentRecorded(_) => "contracts.payment.recorded",
            ContractEvent::PaymentFinished(_) => "contracts.payment.finished",
            ContractEvent::PaymentCanceled(_) => "contracts.payment.canceled",
            ContractEvent::AllocationAdded(_) => "contracts.allocation.added",
            ContractEvent::AllocationRevised(_) => "contracts.allocation.revised",
            ContractEvent::MovementRecorded(_) => "contracts.allocation.movement_recorded",
            ContractEvent::AllocationRemoved(_) => "contracts.allocation.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContractEvent::ContractSigned(e) => e.occurred_at,
            ContractEvent::ContractCompleted(e) => e.occurred_at,
            ContractEvent::ContractCanceled(e) => e.occurred_at,
            ContractEvent::PaymentRecorded(e) => e.occurred_at,
            ContractEvent::PaymentFinished(e) => e.occurred_at,
            ContractEvent::PaymentCanceled(e) => e.occurred_at,
            ContractEvent::AllocationAdded(e) => e.occurred_at,
            ContractEvent::AllocationRevised(e) => e.occurred_at,
            ContractEvent::MovementRecorded(e) => e.occurred_at,
            ContractEvent::AllocationRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Contract {
    type Command = ContractCommand;
    type Event = ContractEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContractEvent::ContractSigned(e) => {
                self.id = e.contract_id;
                self.tenant_id = Some(e.tenant_id);
                self.terms = Some(e.terms.clone());
                self.status = ContractStatus::Active;
                self.payments.clear();
                self.allocations.clear();
                self.created = true;
            }
            ContractEvent::ContractCompleted(e) => {
                self.status = ContractStatus::Completed;
                self.finish_date = Some(e.finish_date);
                self.give_amount = e.give_amount;
                self.finish_note = e.note.clone();
            }
            ContractEvent::ContractCanceled(e) => {
                self.status = ContractStatus::Canceled;
                self.finish_note = e.note.clone();
            }
            ContractEvent::PaymentRecorded(e) => {
                self.payments.push(Payment::pending(
                    e.payment_id,
                    e.kind.clone(),
                    e.currency_id,
                    e.give_date,
                    e.amount,
                    e.contract_currency_exchange_rate,
                    e.note.clone(),
                ));
            }
            ContractEvent::PaymentFinished(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.id_typed() == e.payment_id) {
                    p.mark_finished(e.give_date, e.note.clone());
                }
            }
            ContractEvent::PaymentCanceled(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.id_typed() == e.payment_id) {
                    p.mark_canceled();
                }
            }
            ContractEvent::AllocationAdded(e) => {
                self.allocations.push(ProductAllocation::new(
                    e.allocation_id,
                    e.product_id,
                    e.kind.clone(),
                    e.contract_quantity,
                    e.note.clone(),
                ));
            }
            ContractEvent::AllocationRevised(e) => {
                if let Some(a) = self
                    .allocations
                    .iter_mut()
                    .find(|a| a.id_typed() == e.allocation_id)
                {
                    a.revise(e.contract_quantity, e.note.clone());
                }
            }
            ContractEvent::MovementRecorded(e) => {
                if let Some(a) = self
                    .allocations
                    .iter_mut()
                    .find(|a| a.id_typed() == e.allocation_id)
                {
                    a.record_movement(MovementEntry {
                        id: e.movement_id,
                        kind: e.movement_kind,
                        quantity: e.quantity,
                        give_date: e.give_date,
                        note: e.note.clone(),
                    });
                }
            }
            ContractEvent::AllocationRemoved(e) => {
                if let Some(a) = self
                    .allocations
                    .iter_mut()
                    .find(|a| a.id_typed() == e.allocation_id)
                {
                    a.remove();
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContractCommand::SignContract(cmd) => self.handle_sign(cmd),
            ContractCommand::CompleteContract(cmd) => self.handle_complete(cmd),
            ContractCommand::CancelContract(cmd) => self.handle_cancel(cmd),
            ContractCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            ContractCommand::FinishPayment(cmd) => self.handle_finish_payment(cmd),
            ContractCommand::CancelPayment(cmd) => self.handle_cancel_payment(cmd),
            ContractCommand::AddAllocation(cmd) => self.handle_add_allocation(cmd),
            ContractCommand::ReviseAllocation(cmd) => self.handle_revise_allocation(cmd),
            ContractCommand::RecordMovement(cmd) => self.handle_record_movement(cmd),
            ContractCommand::RemoveAllocation(cmd) => self.handle_remove_allocation(cmd),
        }
    }
}

impl Contract {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_contract_id(&self, contract_id: ContractId) -> Result<(), DomainError> {
        if self.id != contract_id {
            return Err(DomainError::invariant("contract_id mismatch"));
        }
        Ok(())
    }

    /// Explicit lifecycle guard: every ledger/inventory mutation starts here.
    fn ensure_active(&self, operation: &str) -> Result<(), DomainError> {
        if self.status != ContractStatus::Active {
            return Err(DomainError::invalid_transition(
                self.status.to_string(),
                format!("{operation} requires an active contract"),
            ));
        }
        Ok(())
    }

    fn find_payment(&self, payment_id: PaymentId) -> Result<&Payment, DomainError> {
        self.payment(payment_id).ok_or(DomainError::NotFound)
    }

    fn find_allocation(&self, allocation_id: AllocationId) -> Result<&ProductAllocation, DomainError> {
        self.allocation(allocation_id).ok_or(DomainError::NotFound)
    }

    fn find_live_allocation(
        &self,
        allocation_id: AllocationId,
    ) -> Result<&ProductAllocation, DomainError> {
        let allocation = self.find_allocation(allocation_id)?;
        if allocation.is_removed() {
            return Err(DomainError::invalid_transition(
                "removed",
                "allocation has been removed",
            ));
        }
        Ok(allocation)
    }

    fn handle_sign(&self, cmd: &SignContract) -> Result<Vec<ContractEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("contract already exists"));
        }

        let terms = &cmd.terms;
        if terms.name.trim().is_empty() {
            return Err(DomainError::validation("contract name cannot be empty"));
        }
        if terms.kind.trim().is_empty() {
            return Err(DomainError::validation("contract type cannot be empty"));
        }
        if terms.amount <= Decimal::ZERO {
            return Err(DomainError::validation("contract amount must be positive"));
        }
        if terms.project_currency_exchange_rate <= Decimal::ZERO {
            return Err(DomainError::validation(
                "project currency exchange rate must be positive",
            ));
        }
        if terms.official_finish_date < terms.official_begin_date {
            return Err(DomainError::validation(
                "official finish date cannot precede official begin date",
            ));
        }

        Ok(vec![ContractEvent::ContractSigned(ContractSigned {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            terms: terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteContract) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("completing the contract")?;

        if let Some(give_amount) = cmd.give_amount {
            if give_amount <= Decimal::ZERO {
                return Err(DomainError::validation("give amount must be positive"));
            }
        }

        Ok(vec![ContractEvent::ContractCompleted(ContractCompleted {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            finish_date: cmd.finish_date,
            give_amount: cmd.give_amount,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelContract) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("canceling the contract")?;

        Ok(vec![ContractEvent::ContractCanceled(ContractCanceled {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("recording a payment")?;

        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict("payment already exists"));
        }
        if cmd.kind.trim().is_empty() {
            return Err(DomainError::validation("payment type cannot be empty"));
        }
        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if let Some(rate) = cmd.contract_currency_exchange_rate {
            if rate <= Decimal::ZERO {
                return Err(DomainError::validation("exchange rate must be positive"));
            }
        }

        Ok(vec![ContractEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            payment_id: cmd.payment_id,
            kind: cmd.kind.clone(),
            currency_id: cmd.currency_id,
            give_date: cmd.give_date,
            amount: cmd.amount,
            contract_currency_exchange_rate: cmd.contract_currency_exchange_rate,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finish_payment(&self, cmd: &FinishPayment) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("finishing a payment")?;

        let payment = self.find_payment(cmd.payment_id)?;
        if payment.status() != PaymentStatus::Pending {
            return Err(DomainError::invalid_transition(
                payment.status().to_string(),
                "only pending payments can be finished",
            ));
        }

        Ok(vec![ContractEvent::PaymentFinished(PaymentFinished {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            payment_id: cmd.payment_id,
            give_date: cmd.give_date,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel_payment(&self, cmd: &CancelPayment) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("canceling a payment")?;

        let payment = self.find_payment(cmd.payment_id)?;
        if payment.status() != PaymentStatus::Pending {
            // Finished payments are immutable; canceled is already terminal.
            return Err(DomainError::invalid_transition(
                payment.status().to_string(),
                "only pending payments can be canceled",
            ));
        }

        Ok(vec![ContractEvent::PaymentCanceled(PaymentCanceled {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_allocation(&self, cmd: &AddAllocation) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("adding an allocation")?;

        if self.allocation(cmd.allocation_id).is_some() {
            return Err(DomainError::conflict("allocation already exists"));
        }
        if cmd.contract_quantity <= Decimal::ZERO {
            return Err(DomainError::validation(
                "contract quantity must be positive",
            ));
        }

        Ok(vec![ContractEvent::AllocationAdded(AllocationAdded {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            allocation_id: cmd.allocation_id,
            product_id: cmd.product_id,
            kind: cmd.kind.clone(),
            contract_quantity: cmd.contract_quantity,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise_allocation(
        &self,
        cmd: &ReviseAllocation,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("revising an allocation")?;

        let allocation = self.find_live_allocation(cmd.allocation_id)?;
        if cmd.contract_quantity <= Decimal::ZERO {
            return Err(DomainError::validation(
                "contract quantity must be positive",
            ));
        }
        if cmd.contract_quantity < allocation.take_quantity() {
            return Err(DomainError::invariant(format!(
                "cannot shrink allocation below delivered quantity (delivered: {}, requested: {})",
                allocation.take_quantity(),
                cmd.contract_quantity
            )));
        }

        Ok(vec![ContractEvent::AllocationRevised(AllocationRevised {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            allocation_id: cmd.allocation_id,
            contract_quantity: cmd.contract_quantity,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_movement(
        &self,
        cmd: &RecordMovement,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("recording a movement")?;

        let allocation = self.find_live_allocation(cmd.allocation_id)?;
        cmd.movement_kind.validate_quantity(cmd.quantity)?;

        let new_take = allocation.take_quantity() + cmd.quantity;
        if new_take < Decimal::ZERO || new_take > allocation.contract_quantity() {
            return Err(DomainError::invariant(format!(
                "movement would push delivered quantity out of bounds \
                 (current: {}, delta: {}, contracted: {})",
                allocation.take_quantity(),
                cmd.quantity,
                allocation.contract_quantity()
            )));
        }

        Ok(vec![ContractEvent::MovementRecorded(MovementRecorded {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            allocation_id: cmd.allocation_id,
            movement_id: cmd.movement_id,
            movement_kind: cmd.movement_kind,
            quantity: cmd.quantity,
            give_date: cmd.give_date,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_allocation(
        &self,
        cmd: &RemoveAllocation,
    ) -> Result<Vec<ContractEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_contract_id(cmd.contract_id)?;
        self.ensure_active("removing an allocation")?;

        let allocation = self.find_allocation(cmd.allocation_id)?;
        if allocation.is_removed() {
            return Err(DomainError::conflict("allocation already removed"));
        }

        Ok(vec![ContractEvent::AllocationRemoved(AllocationRemoved {
            tenant_id: cmd.tenant_id,
            contract_id: cmd.contract_id,
            allocation_id: cmd.allocation_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacterp_core::AggregateId;
    use rust_decimal_macros::dec;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_contract_id() -> ContractId {
        ContractId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_terms(project_rate: Decimal) -> ContractTerms {
        ContractTerms {
            name: "Steel supply 2024".to_string(),
            kind: "supply".to_string(),
            project_id: ProjectId::new(AggregateId::new()),
            applicant_id: PartyId::new(AggregateId::new()),
            purchaser_id: PartyId::new(AggregateId::new()),
            company_id: CompanyId::new(AggregateId::new()),
            currency_id: CurrencyId::new(AggregateId::new()),
            amount: dec!(50000),
            sign_date: test_date(2024, 1, 15),
            official_begin_date: test_date(2024, 2, 1),
            official_finish_date: test_date(2024, 12, 31),
            project_currency_exchange_rate: project_rate,
            note: None,
        }
    }

    fn signed_contract(tenant_id: TenantId, contract_id: ContractId, project_rate: Decimal) -> Contract {
        let mut contract = Contract::empty(contract_id);
        let cmd = SignContract {
            tenant_id,
            contract_id,
            terms: test_terms(project_rate),
            occurred_at: test_time(),
        };
        let events = contract
            .handle(&ContractCommand::SignContract(cmd))
            .unwrap();
        for e in &events {
            contract.apply(e);
        }
        contract
    }

    fn record_payment_cmd(
        tenant_id: TenantId,
        contract_id: ContractId,
        payment_id: PaymentId,
        amount: Decimal,
        rate: Option<Decimal>,
    ) -> RecordPayment {
        RecordPayment {
            tenant_id,
            contract_id,
            payment_id,
            kind: "advance".to_string(),
            currency_id: CurrencyId::new(AggregateId::new()),
            give_date: test_date(2024, 3, 1),
            amount,
            contract_currency_exchange_rate: rate,
            note: None,
            occurred_at: test_time(),
        }
    }

    fn add_allocation_cmd(
        tenant_id: TenantId,
        contract_id: ContractId,
        allocation_id: AllocationId,
        contract_quantity: Decimal,
    ) -> AddAllocation {
        AddAllocation {
            tenant_id,
            contract_id,
            allocation_id,
            product_id: test_product_id(),
            kind: "delivery".to_string(),
            contract_quantity,
            note: None,
            occurred_at: test_time(),
        }
    }

    fn movement_cmd(
        tenant_id: TenantId,
        contract_id: ContractId,
        allocation_id: AllocationId,
        kind: MovementKind,
        quantity: Decimal,
    ) -> RecordMovement {
        RecordMovement {
            tenant_id,
            contract_id,
            allocation_id,
            movement_id: MovementId::new(),
            movement_kind: kind,
            quantity,
            give_date: test_date(2024, 5, 10),
            note: None,
            occurred_at: test_time(),
        }
    }

    fn apply_all(contract: &mut Contract, events: &[ContractEvent]) {
        for e in events {
            contract.apply(e);
        }
    }

    #[test]
    fn sign_contract_emits_contract_signed_event() {
        let contract = Contract::empty(test_contract_id());
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();

        let cmd = SignContract {
            tenant_id,
            contract_id,
            terms: test_terms(dec!(1.0)),
            occurred_at: test_time(),
        };

        let events = contract.handle(&ContractCommand::SignContract(cmd)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ContractEvent::ContractSigned(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.contract_id, contract_id);
                assert_eq!(e.terms.amount, dec!(50000));
            }
            _ => panic!("Expected ContractSigned event"),
        }
    }

    #[test]
    fn sign_contract_rejects_non_positive_amount() {
        let contract = Contract::empty(test_contract_id());
        let mut terms = test_terms(dec!(1.0));
        terms.amount = dec!(0);

        let cmd = SignContract {
            tenant_id: test_tenant_id(),
            contract_id: test_contract_id(),
            terms,
            occurred_at: test_time(),
        };

        let err = contract
            .handle(&ContractCommand::SignContract(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for non-positive amount"),
        }
    }

    #[test]
    fn sign_contract_rejects_finish_before_begin() {
        let contract = Contract::empty(test_contract_id());
        let mut terms = test_terms(dec!(1.0));
        terms.official_begin_date = test_date(2024, 6, 1);
        terms.official_finish_date = test_date(2024, 5, 1);

        let cmd = SignContract {
            tenant_id: test_tenant_id(),
            contract_id: test_contract_id(),
            terms,
            occurred_at: test_time(),
        };

        let err = contract
            .handle(&ContractCommand::SignContract(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for inverted dates"),
        }
    }

    #[test]
    fn recorded_payment_starts_pending_and_is_excluded_from_total() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let payment_id = PaymentId::new();
        let cmd = record_payment_cmd(tenant_id, contract_id, payment_id, dec!(1000), Some(dec!(0.9)));
        let events = contract
            .handle(&ContractCommand::RecordPayment(cmd))
            .unwrap();
        apply_all(&mut contract, &events);

        let payment = contract.payment(payment_id).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(contract.total_spent(), Decimal::ZERO);
    }

    #[test]
    fn finished_payment_converts_via_frozen_rates() {
        // Project rate 1.0, payment of 1000 at frozen rate 0.9 -> 900 spent.
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let payment_id = PaymentId::new();
        let events = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                payment_id,
                dec!(1000),
                Some(dec!(0.9)),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        let events = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id,
                give_date: test_date(2024, 3, 5),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        assert_eq!(contract.total_spent(), dec!(900.0));
        assert_eq!(contract.total_spent_in_contract_currency(), dec!(900.0));
    }

    #[test]
    fn cancel_after_finish_fails_and_total_is_unchanged() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let payment_id = PaymentId::new();
        let events = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                payment_id,
                dec!(1000),
                Some(dec!(0.9)),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id,
                give_date: test_date(2024, 3, 5),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        let err = contract
            .handle(&ContractCommand::CancelPayment(CancelPayment {
                tenant_id,
                contract_id,
                payment_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, .. } => {
                assert_eq!(current, "finished");
            }
            _ => panic!("Expected InvalidStateTransition for canceling a finished payment"),
        }

        assert_eq!(contract.total_spent(), dec!(900.0));
    }

    #[test]
    fn finish_is_rejected_from_canceled() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let payment_id = PaymentId::new();
        let events = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                payment_id,
                dec!(500),
                None,
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::CancelPayment(CancelPayment {
                tenant_id,
                contract_id,
                payment_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        let err = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id,
                give_date: test_date(2024, 4, 1),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, .. } => {
                assert_eq!(current, "canceled");
            }
            _ => panic!("Expected InvalidStateTransition for finishing a canceled payment"),
        }

        assert_eq!(contract.total_spent(), Decimal::ZERO);
    }

    #[test]
    fn canceled_payments_contribute_zero_to_total_spent() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(2.0));

        let finished_id = PaymentId::new();
        let canceled_id = PaymentId::new();

        for (payment_id, amount) in [(finished_id, dec!(100)), (canceled_id, dec!(700))] {
            let events = contract
                .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                    tenant_id,
                    contract_id,
                    payment_id,
                    amount,
                    None,
                )))
                .unwrap();
            apply_all(&mut contract, &events);
        }

        let events = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id: finished_id,
                give_date: test_date(2024, 3, 9),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::CancelPayment(CancelPayment {
                tenant_id,
                contract_id,
                payment_id: canceled_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        // 100 x 1 (payment rate) x 2.0 (project rate).
        assert_eq!(contract.total_spent(), dec!(200.0));
    }

    #[test]
    fn payment_on_completed_contract_is_rejected_with_current_state() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let events = contract
            .handle(&ContractCommand::CompleteContract(CompleteContract {
                tenant_id,
                contract_id,
                finish_date: test_date(2024, 11, 30),
                give_amount: None,
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);
        assert_eq!(contract.status(), ContractStatus::Completed);

        let err = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                PaymentId::new(),
                dec!(10),
                None,
            )))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, .. } => {
                assert_eq!(current, "completed");
            }
            _ => panic!("Expected InvalidStateTransition for payment on completed contract"),
        }
    }

    #[test]
    fn contract_terminal_states_permit_no_further_lifecycle_transitions() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let events = contract
            .handle(&ContractCommand::CancelContract(CancelContract {
                tenant_id,
                contract_id,
                note: Some("funding withdrawn".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);
        assert_eq!(contract.status(), ContractStatus::Canceled);

        let err = contract
            .handle(&ContractCommand::CompleteContract(CompleteContract {
                tenant_id,
                contract_id,
                finish_date: test_date(2024, 12, 1),
                give_amount: None,
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, .. } => {
                assert_eq!(current, "canceled");
            }
            _ => panic!("Expected InvalidStateTransition for completing a canceled contract"),
        }
    }

    #[test]
    fn allocation_take_then_shrink_scenario() {
        // Allocate 100, take 30, revise to 20 fails,
        // revise to 50 succeeds with delivered quantity unchanged.
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
        let allocation_id = AllocationId::new();

        let events = contract
            .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                dec!(100),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        let events = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Take,
                dec!(30),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        assert_eq!(contract.allocation(allocation_id).unwrap().take_quantity(), dec!(30));

        let err = contract
            .handle(&ContractCommand::ReviseAllocation(ReviseAllocation {
                tenant_id,
                contract_id,
                allocation_id,
                contract_quantity: dec!(20),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for shrinking below delivered"),
        }
        // Row unchanged.
        let allocation = contract.allocation(allocation_id).unwrap();
        assert_eq!(allocation.contract_quantity(), dec!(100));
        assert_eq!(allocation.take_quantity(), dec!(30));

        let events = contract
            .handle(&ContractCommand::ReviseAllocation(ReviseAllocation {
                tenant_id,
                contract_id,
                allocation_id,
                contract_quantity: dec!(50),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        let allocation = contract.allocation(allocation_id).unwrap();
        assert_eq!(allocation.contract_quantity(), dec!(50));
        assert_eq!(allocation.take_quantity(), dec!(30));
    }

    #[test]
    fn movement_beyond_contract_quantity_is_fully_rejected() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
        let allocation_id = AllocationId::new();

        let events = contract
            .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                dec!(10),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        let err = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Give,
                dec!(11),
            )))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for over-delivery"),
        }

        // No partial effect: neither history nor cache moved.
        let allocation = contract.allocation(allocation_id).unwrap();
        assert!(allocation.history().is_empty());
        assert_eq!(allocation.take_quantity(), Decimal::ZERO);
    }

    #[test]
    fn negative_adjust_cannot_push_delivered_below_zero() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
        let allocation_id = AllocationId::new();

        let events = contract
            .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                dec!(10),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Give,
                dec!(3),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        let err = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Adjust,
                dec!(-4),
            )))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected InvariantViolation for negative delivered quantity"),
        }

        // A correction within bounds is fine.
        let events = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Adjust,
                dec!(-2),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let allocation = contract.allocation(allocation_id).unwrap();
        assert_eq!(allocation.take_quantity(), dec!(1));
        assert!(allocation.is_reconciled());
    }

    #[test]
    fn removed_allocation_keeps_history_but_rejects_mutations() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
        let allocation_id = AllocationId::new();

        let events = contract
            .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                dec!(10),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Give,
                dec!(5),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        let events = contract
            .handle(&ContractCommand::RemoveAllocation(RemoveAllocation {
                tenant_id,
                contract_id,
                allocation_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);

        let allocation = contract.allocation(allocation_id).unwrap();
        assert!(allocation.is_removed());
        assert_eq!(allocation.history().len(), 1);

        let err = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                MovementKind::Give,
                dec!(1),
            )))
            .unwrap_err();
        match err {
            DomainError::InvalidStateTransition { current, .. } => {
                assert_eq!(current, "removed");
            }
            _ => panic!("Expected InvalidStateTransition for movement on removed allocation"),
        }

        // Removed allocations drop out of the summary folds.
        assert_eq!(contract.delivered_quantity(), Decimal::ZERO);
        assert_eq!(contract.contracted_quantity(), Decimal::ZERO);
    }

    #[test]
    fn unknown_payment_and_allocation_ids_yield_not_found() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let contract = signed_contract(tenant_id, contract_id, dec!(1.0));

        let err = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id: PaymentId::new(),
                give_date: test_date(2024, 3, 5),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);

        let err = contract
            .handle(&ContractCommand::RecordMovement(movement_cmd(
                tenant_id,
                contract_id,
                AllocationId::new(),
                MovementKind::Give,
                dec!(1),
            )))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn summary_folds_are_idempotent() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = signed_contract(tenant_id, contract_id, dec!(1.5));
        let allocation_id = AllocationId::new();

        let payment_id = PaymentId::new();
        let events = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                payment_id,
                dec!(200),
                Some(dec!(1.2)),
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::FinishPayment(FinishPayment {
                tenant_id,
                contract_id,
                payment_id,
                give_date: test_date(2024, 6, 1),
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);
        let events = contract
            .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                tenant_id,
                contract_id,
                allocation_id,
                dec!(40),
            )))
            .unwrap();
        apply_all(&mut contract, &events);

        assert_eq!(contract.total_spent(), contract.total_spent());
        assert_eq!(contract.delivered_quantity(), contract.delivered_quantity());
        assert_eq!(contract.contracted_quantity(), dec!(40));
    }

    #[test]
    fn version_increments_on_apply() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let mut contract = Contract::empty(contract_id);
        assert_eq!(contract.version(), 0);

        let events = contract
            .handle(&ContractCommand::SignContract(SignContract {
                tenant_id,
                contract_id,
                terms: test_terms(dec!(1.0)),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut contract, &events);
        assert_eq!(contract.version(), 1);

        let events = contract
            .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                tenant_id,
                contract_id,
                PaymentId::new(),
                dec!(10),
                None,
            )))
            .unwrap();
        apply_all(&mut contract, &events);
        assert_eq!(contract.version(), 2);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let contract = signed_contract(tenant_id, contract_id, dec!(1.0));
        let before = contract.clone();

        let cmd = ContractCommand::RecordPayment(record_payment_cmd(
            tenant_id,
            contract_id,
            PaymentId::new(),
            dec!(10),
            None,
        ));

        let events1 = contract.handle(&cmd).unwrap();
        let events2 = contract.handle(&cmd).unwrap();

        assert_eq!(contract, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn apply_is_deterministic() {
        let tenant_id = test_tenant_id();
        let contract_id = test_contract_id();
        let allocation_id = AllocationId::new();
        let occurred_at = test_time();

        let events = vec![
            ContractEvent::ContractSigned(ContractSigned {
                tenant_id,
                contract_id,
                terms: test_terms(dec!(1.0)),
                occurred_at,
            }),
            ContractEvent::AllocationAdded(AllocationAdded {
                tenant_id,
                contract_id,
                allocation_id,
                product_id: test_product_id(),
                kind: "delivery".to_string(),
                contract_quantity: dec!(100),
                note: None,
                occurred_at,
            }),
            ContractEvent::MovementRecorded(MovementRecorded {
                tenant_id,
                contract_id,
                allocation_id,
                movement_id: MovementId::new(),
                movement_kind: MovementKind::Take,
                quantity: dec!(30),
                give_date: test_date(2024, 5, 10),
                note: None,
                occurred_at,
            }),
        ];

        let mut contract1 = Contract::empty(contract_id);
        let mut contract2 = Contract::empty(contract_id);
        for e in &events {
            contract1.apply(e);
            contract2.apply(e);
        }

        assert_eq!(contract1, contract2);
        assert_eq!(contract1.delivered_quantity(), dec!(30));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn movement_strategy() -> impl Strategy<Value = (MovementKind, Decimal)> {
            prop_oneof![
                (1i64..=20).prop_map(|q| (MovementKind::Give, Decimal::from(q))),
                (1i64..=20).prop_map(|q| (MovementKind::Take, Decimal::from(q))),
                (-20i64..=20).prop_map(|q| (MovementKind::Adjust, Decimal::from(q))),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: under any movement sequence, accepted movements keep
            /// `0 <= take_quantity <= contract_quantity` and the cache equals
            /// the history fold; rejected movements change nothing.
            #[test]
            fn delivered_quantity_stays_bounded_and_reconciled(
                movements in prop::collection::vec(movement_strategy(), 1..40)
            ) {
                let tenant_id = test_tenant_id();
                let contract_id = test_contract_id();
                let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
                let allocation_id = AllocationId::new();

                let events = contract
                    .handle(&ContractCommand::AddAllocation(add_allocation_cmd(
                        tenant_id,
                        contract_id,
                        allocation_id,
                        dec!(50),
                    )))
                    .unwrap();
                apply_all(&mut contract, &events);

                for (kind, quantity) in movements {
                    let before = contract.allocation(allocation_id).unwrap().clone();
                    let cmd = ContractCommand::RecordMovement(movement_cmd(
                        tenant_id,
                        contract_id,
                        allocation_id,
                        kind,
                        quantity,
                    ));

                    match contract.handle(&cmd) {
                        Ok(events) => apply_all(&mut contract, &events),
                        Err(_) => {
                            prop_assert_eq!(contract.allocation(allocation_id).unwrap(), &before);
                        }
                    }

                    let allocation = contract.allocation(allocation_id).unwrap();
                    prop_assert!(allocation.take_quantity() >= Decimal::ZERO);
                    prop_assert!(allocation.take_quantity() <= allocation.contract_quantity());
                    prop_assert!(allocation.is_reconciled());
                }
            }

            /// Property: total_spent sums exactly the finished payments,
            /// converted via each payment's own frozen rate.
            #[test]
            fn total_spent_counts_only_finished_payments(
                payments in prop::collection::vec(
                    (1i64..=1000, 1i64..=200, 0u8..3),
                    1..15
                )
            ) {
                let tenant_id = test_tenant_id();
                let contract_id = test_contract_id();
                let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));

                let mut expected = Decimal::ZERO;

                for (amount, rate_cents, outcome) in payments {
                    let payment_id = PaymentId::new();
                    let amount = Decimal::from(amount);
                    let rate = Decimal::new(rate_cents, 2);

                    let events = contract
                        .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                            tenant_id,
                            contract_id,
                            payment_id,
                            amount,
                            Some(rate),
                        )))
                        .unwrap();
                    apply_all(&mut contract, &events);

                    match outcome {
                        // Finish: contributes amount x rate.
                        0 => {
                            let events = contract
                                .handle(&ContractCommand::FinishPayment(FinishPayment {
                                    tenant_id,
                                    contract_id,
                                    payment_id,
                                    give_date: test_date(2024, 7, 1),
                                    note: None,
                                    occurred_at: test_time(),
                                }))
                                .unwrap();
                            apply_all(&mut contract, &events);
                            expected += amount * rate;
                        }
                        // Cancel: contributes nothing.
                        1 => {
                            let events = contract
                                .handle(&ContractCommand::CancelPayment(CancelPayment {
                                    tenant_id,
                                    contract_id,
                                    payment_id,
                                    occurred_at: test_time(),
                                }))
                                .unwrap();
                            apply_all(&mut contract, &events);
                        }
                        // Leave pending: contributes nothing.
                        _ => {}
                    }
                }

                prop_assert_eq!(contract.total_spent(), expected);
            }

            /// Property: once a payment reaches a terminal state, neither
            /// finish nor cancel ever succeeds again.
            #[test]
            fn terminal_payments_accept_no_transition(finish_first in any::<bool>()) {
                let tenant_id = test_tenant_id();
                let contract_id = test_contract_id();
                let mut contract = signed_contract(tenant_id, contract_id, dec!(1.0));
                let payment_id = PaymentId::new();

                let events = contract
                    .handle(&ContractCommand::RecordPayment(record_payment_cmd(
                        tenant_id,
                        contract_id,
                        payment_id,
                        dec!(100),
                        None,
                    )))
                    .unwrap();
                apply_all(&mut contract, &events);

                let finish = ContractCommand::FinishPayment(FinishPayment {
                    tenant_id,
                    contract_id,
                    payment_id,
                    give_date: test_date(2024, 8, 1),
                    note: None,
                    occurred_at: test_time(),
                });
                let cancel = ContractCommand::CancelPayment(CancelPayment {
                    tenant_id,
                    contract_id,
                    payment_id,
                    occurred_at: test_time(),
                });

                let first = if finish_first { &finish } else { &cancel };
                let events = contract.handle(first).unwrap();
                apply_all(&mut contract, &events);
                prop_assert!(contract.payment(payment_id).unwrap().status().is_terminal());

                for cmd in [&finish, &cancel] {
                    let err = contract.handle(cmd).unwrap_err();
                    prop_assert!(
                        matches!(err, DomainError::InvalidStateTransition { .. }),
                        "expected InvalidStateTransition, got {:?}",
                        err
                    );
                }
            }
        }
    }
}
