use serde::{Deserialize, Serialize};

use pacterp_core::{AggregateId, TenantId};

/// Published form of a committed ledger event.
///
/// Carries exactly the coordinates a consumer needs to stay correct under
/// at-least-once delivery: the tenant boundary, the owning stream, and the
/// event's position within that stream. The payload is opaque at this level;
/// projections deserialize it back into the domain event they understand.
///
/// Sequence numbers are assigned by the store on append and are gapless per
/// stream, so a consumer can deduplicate and order purely from the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            tenant_id,
            aggregate_id,
            sequence_number,
            payload,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// Position within the aggregate stream (1-based, gapless).
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
