use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pacterp_core::{DomainError, DomainResult, Entity};
use pacterp_registry::ProductId;

/// Allocation identifier (unique within the owning contract).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub Uuid);

impl AllocationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Movement (history entry) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of inventory movement against an allocation.
///
/// `Give` and `Take` are the two fulfilment directions (which one applies
/// depends on the contract's commercial type); both consume the allocation
/// with a strictly positive quantity. `Adjust` is a signed correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Give,
    Take,
    Adjust,
}

impl MovementKind {
    /// Validate a quantity for this movement kind.
    pub fn validate_quantity(self, quantity: Decimal) -> DomainResult<()> {
        match self {
            MovementKind::Give | MovementKind::Take => {
                if quantity <= Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "{self} quantity must be positive, got {quantity}"
                    )));
                }
            }
            MovementKind::Adjust => {
                if quantity == Decimal::ZERO {
                    return Err(DomainError::validation("adjust quantity cannot be zero"));
                }
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            MovementKind::Give => "give",
            MovementKind::Take => "take",
            MovementKind::Adjust => "adjust",
        };
        f.write_str(s)
    }
}

/// One immutable history entry: a single give/take/adjust event.
///
/// Never mutated or deleted once written; the running signed sum of an
/// allocation's entries reconciles exactly with its cached `take_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    pub kind: MovementKind,
    /// Positive for give/take; signed for adjust.
    pub quantity: Decimal,
    pub give_date: NaiveDate,
    pub note: Option<String>,
}

/// Committed-vs-delivered allocation of one product to the owning contract.
///
/// `take_quantity` is a materialized view over `history`: every movement is
/// appended to the history and folded into the cache in the same state
/// transition, so the two can never diverge. Rebuilding from the event
/// stream replays the same fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAllocation {
    id: AllocationId,
    product_id: ProductId,
    kind: String,
    note: Option<String>,
    contract_quantity: Decimal,
    take_quantity: Decimal,
    removed: bool,
    history: Vec<MovementEntry>,
}

impl ProductAllocation {
    pub(crate) fn new(
        id: AllocationId,
        product_id: ProductId,
        kind: String,
        contract_quantity: Decimal,
        note: Option<String>,
    ) -> Self {
        Self {
            id,
            product_id,
            kind,
            note,
            contract_quantity,
            take_quantity: Decimal::ZERO,
            removed: false,
            history: Vec::new(),
        }
    }

    /// Append a history entry and fold it into the cached quantity.
    ///
    /// Single state transition: the caller has already validated the bounds.
    pub(crate) fn record_movement(&mut self, entry: MovementEntry) {
        self.take_quantity += entry.quantity;
        self.history.push(entry);
    }

    pub(crate) fn revise(&mut self, contract_quantity: Decimal, note: Option<String>) {
        self.contract_quantity = contract_quantity;
        if note.is_some() {
            self.note = note;
        }
    }

    pub(crate) fn remove(&mut self) {
        self.removed = true;
    }

    pub fn id_typed(&self) -> AllocationId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn contract_quantity(&self) -> Decimal {
        self.contract_quantity
    }

    pub fn take_quantity(&self) -> Decimal {
        self.take_quantity
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn history(&self) -> &[MovementEntry] {
        &self.history
    }

    /// Recompute the delivered quantity from the history log.
    pub fn reconciled_take_quantity(&self) -> Decimal {
        self.history.iter().map(|m| m.quantity).sum()
    }

    /// The cached quantity must always equal the history fold.
    pub fn is_reconciled(&self) -> bool {
        self.take_quantity == self.reconciled_take_quantity()
    }
}

impl Entity for ProductAllocation {
    type Id = AllocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacterp_core::AggregateId;
    use rust_decimal_macros::dec;

    fn test_allocation(contract_quantity: Decimal) -> ProductAllocation {
        ProductAllocation::new(
            AllocationId::new(),
            ProductId::new(AggregateId::new()),
            "delivery".to_string(),
            contract_quantity,
            None,
        )
    }

    fn movement(kind: MovementKind, quantity: Decimal) -> MovementEntry {
        MovementEntry {
            id: MovementId::new(),
            kind,
            quantity,
            give_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            note: None,
        }
    }

    #[test]
    fn new_allocation_starts_undelivered() {
        let alloc = test_allocation(dec!(100));
        assert_eq!(alloc.take_quantity(), Decimal::ZERO);
        assert!(alloc.history().is_empty());
        assert!(alloc.is_reconciled());
    }

    #[test]
    fn movements_keep_cache_reconciled_with_history() {
        let mut alloc = test_allocation(dec!(100));

        alloc.record_movement(movement(MovementKind::Take, dec!(30)));
        alloc.record_movement(movement(MovementKind::Give, dec!(15.5)));
        alloc.record_movement(movement(MovementKind::Adjust, dec!(-5.5)));

        assert_eq!(alloc.take_quantity(), dec!(40));
        assert_eq!(alloc.history().len(), 3);
        assert!(alloc.is_reconciled());
    }

    #[test]
    fn removal_is_soft_and_preserves_history() {
        let mut alloc = test_allocation(dec!(10));
        alloc.record_movement(movement(MovementKind::Give, dec!(4)));

        alloc.remove();

        assert!(alloc.is_removed());
        assert_eq!(alloc.history().len(), 1);
        assert_eq!(alloc.take_quantity(), dec!(4));
    }

    #[test]
    fn give_and_take_require_positive_quantity() {
        assert!(MovementKind::Give.validate_quantity(dec!(1)).is_ok());
        assert!(MovementKind::Take.validate_quantity(dec!(0)).is_err());
        assert!(MovementKind::Give.validate_quantity(dec!(-3)).is_err());
    }

    #[test]
    fn adjust_allows_signed_but_not_zero_quantity() {
        assert!(MovementKind::Adjust.validate_quantity(dec!(-2)).is_ok());
        assert!(MovementKind::Adjust.validate_quantity(dec!(2)).is_ok());
        assert!(MovementKind::Adjust.validate_quantity(dec!(0)).is_err());
    }
}
