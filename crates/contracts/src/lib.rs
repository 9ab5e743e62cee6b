//! Contract ledger domain module (event-sourced).
//!
//! The `Contract` aggregate binds a project, the external parties, and a
//! currency, and exclusively owns its payment ledger and product
//! allocations. All business rules live here as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod allocation;
pub mod contract;
pub mod payment;

pub use allocation::{AllocationId, MovementEntry, MovementId, MovementKind, ProductAllocation};
pub use contract::{
    AddAllocation, AllocationAdded, AllocationRemoved, AllocationRevised, CancelContract,
    CancelPayment, CompleteContract, Contract, ContractCanceled, ContractCommand,
    ContractCompleted, ContractEvent, ContractId, ContractSigned, ContractStatus, ContractTerms,
    FinishPayment, MovementRecorded, PaymentCanceled, PaymentFinished, PaymentRecorded,
    RecordMovement, RecordPayment, RemoveAllocation, ReviseAllocation, SignContract,
};
pub use payment::{Payment, PaymentId, PaymentStatus};
