use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pacterp_core::Entity;
use pacterp_registry::CurrencyId;

/// Payment identifier (unique within the owning contract's ledger).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment status lifecycle.
///
/// `pending → finished` and `pending → canceled`; both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Finished,
    Canceled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Finished | PaymentStatus::Canceled)
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Finished => "finished",
            PaymentStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// A payment recorded against the owning contract's ledger.
///
/// The exchange rate to the contract currency is frozen at recording time
/// and never recomputed from the live currency registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    kind: String,
    currency_id: CurrencyId,
    give_date: NaiveDate,
    amount: Decimal,
    contract_currency_exchange_rate: Option<Decimal>,
    note: Option<String>,
    status: PaymentStatus,
}

impl Payment {
    pub(crate) fn pending(
        id: PaymentId,
        kind: String,
        currency_id: CurrencyId,
        give_date: NaiveDate,
        amount: Decimal,
        contract_currency_exchange_rate: Option<Decimal>,
        note: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            currency_id,
            give_date,
            amount,
            contract_currency_exchange_rate,
            note,
            status: PaymentStatus::Pending,
        }
    }

    pub(crate) fn mark_finished(&mut self, give_date: NaiveDate, note: Option<String>) {
        self.status = PaymentStatus::Finished;
        self.give_date = give_date;
        if note.is_some() {
            self.note = note;
        }
    }

    pub(crate) fn mark_canceled(&mut self) {
        self.status = PaymentStatus::Canceled;
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn currency_id(&self) -> CurrencyId {
        self.currency_id
    }

    pub fn give_date(&self) -> NaiveDate {
        self.give_date
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Frozen snapshot rate to the contract currency.
    ///
    /// Payments denominated in the contract currency omit the rate; the
    /// effective rate is then 1.
    pub fn effective_rate(&self) -> Decimal {
        self.contract_currency_exchange_rate
            .unwrap_or(Decimal::ONE)
    }

    /// Amount converted into the contract currency via the frozen rate.
    pub fn converted_amount(&self) -> Decimal {
        self.amount * self.effective_rate()
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacterp_core::AggregateId;
    use rust_decimal_macros::dec;

    fn test_payment(amount: Decimal, rate: Option<Decimal>) -> Payment {
        Payment::pending(
            PaymentId::new(),
            "advance".to_string(),
            CurrencyId::new(AggregateId::new()),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            amount,
            rate,
            None,
        )
    }

    #[test]
    fn converted_amount_uses_frozen_rate() {
        let payment = test_payment(dec!(1000), Some(dec!(0.9)));
        assert_eq!(payment.converted_amount(), dec!(900.0));
    }

    #[test]
    fn missing_rate_defaults_to_one() {
        let payment = test_payment(dec!(250.50), None);
        assert_eq!(payment.effective_rate(), Decimal::ONE);
        assert_eq!(payment.converted_amount(), dec!(250.50));
    }

    #[test]
    fn pending_is_not_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Finished.is_terminal());
        assert!(PaymentStatus::Canceled.is_terminal());
    }

    #[test]
    fn finishing_updates_give_date_and_note() {
        let mut payment = test_payment(dec!(10), None);
        let settled = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();

        payment.mark_finished(settled, Some("wire ref 4711".to_string()));

        assert_eq!(payment.status(), PaymentStatus::Finished);
        assert_eq!(payment.give_date(), settled);
        assert_eq!(payment.note(), Some("wire ref 4711"));
    }

    #[test]
    fn finishing_without_note_keeps_existing_note() {
        let mut payment = Payment::pending(
            PaymentId::new(),
            "advance".to_string(),
            CurrencyId::new(AggregateId::new()),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            dec!(10),
            None,
            Some("original".to_string()),
        );

        payment.mark_finished(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(), None);

        assert_eq!(payment.note(), Some("original"));
    }
}
