use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use pacterp_core::{AggregateId, DomainError, DomainResult, TenantId};

use crate::currency::{Currency, CurrencyId};

macro_rules! impl_reference_id {
    ($t:ident) => {
        /// Reference-record identifier (tenant-scoped via directory lookups).
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

impl_reference_id!(ProjectId);
impl_reference_id!(ProductId);
impl_reference_id!(UnitId);
impl_reference_id!(PartyId);
impl_reference_id!(CompanyId);

/// Contact information for a party or company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Project: owns the currency all contract figures roll up into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub currency_id: CurrencyId,
}

/// Product: a physical good allocated against contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub unit_id: UnitId,
}

/// Measurement unit for product quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub name: String,
}

/// External party (applicant or purchaser).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub id: PartyId,
    pub name: String,
    pub contact: ContactInfo,
}

/// Company signing the contract on our side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: CompanyId,
    pub name: String,
    pub contact: ContactInfo,
}

/// Read-only, tenant-scoped lookups over reference data.
///
/// The ledger treats these records as opaque: it resolves ids before
/// mutating, and a failed resolution surfaces as `DomainError::NotFound`.
/// The one write-ish concern owned here is currency immutability:
/// `mark_currency_referenced` pins a currency once a financial record uses
/// it, after which in-place edits must be rejected.
pub trait ReferenceDirectory: Send + Sync {
    fn currency(&self, tenant_id: TenantId, id: CurrencyId) -> Option<Currency>;
    fn project(&self, tenant_id: TenantId, id: ProjectId) -> Option<ProjectRecord>;
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord>;
    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Option<UnitRecord>;
    fn party(&self, tenant_id: TenantId, id: PartyId) -> Option<PartyRecord>;
    fn company(&self, tenant_id: TenantId, id: CompanyId) -> Option<CompanyRecord>;

    /// Pin a currency: it now backs at least one financial record.
    fn mark_currency_referenced(&self, tenant_id: TenantId, id: CurrencyId);

    fn resolve_currency(&self, tenant_id: TenantId, id: CurrencyId) -> DomainResult<Currency> {
        self.currency(tenant_id, id).ok_or(DomainError::NotFound)
    }

    fn resolve_project(&self, tenant_id: TenantId, id: ProjectId) -> DomainResult<ProjectRecord> {
        self.project(tenant_id, id).ok_or(DomainError::NotFound)
    }

    fn resolve_product(&self, tenant_id: TenantId, id: ProductId) -> DomainResult<ProductRecord> {
        self.product(tenant_id, id).ok_or(DomainError::NotFound)
    }

    fn resolve_party(&self, tenant_id: TenantId, id: PartyId) -> DomainResult<PartyRecord> {
        self.party(tenant_id, id).ok_or(DomainError::NotFound)
    }

    fn resolve_company(&self, tenant_id: TenantId, id: CompanyId) -> DomainResult<CompanyRecord> {
        self.company(tenant_id, id).ok_or(DomainError::NotFound)
    }
}

impl<D> ReferenceDirectory for Arc<D>
where
    D: ReferenceDirectory + ?Sized,
{
    fn currency(&self, tenant_id: TenantId, id: CurrencyId) -> Option<Currency> {
        (**self).currency(tenant_id, id)
    }

    fn project(&self, tenant_id: TenantId, id: ProjectId) -> Option<ProjectRecord> {
        (**self).project(tenant_id, id)
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        (**self).product(tenant_id, id)
    }

    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Option<UnitRecord> {
        (**self).unit(tenant_id, id)
    }

    fn party(&self, tenant_id: TenantId, id: PartyId) -> Option<PartyRecord> {
        (**self).party(tenant_id, id)
    }

    fn company(&self, tenant_id: TenantId, id: CompanyId) -> Option<CompanyRecord> {
        (**self).company(tenant_id, id)
    }

    fn mark_currency_referenced(&self, tenant_id: TenantId, id: CurrencyId) {
        (**self).mark_currency_referenced(tenant_id, id)
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    currencies: RwLock<HashMap<(TenantId, CurrencyId), Currency>>,
    referenced: RwLock<HashSet<(TenantId, CurrencyId)>>,
    projects: RwLock<HashMap<(TenantId, ProjectId), ProjectRecord>>,
    products: RwLock<HashMap<(TenantId, ProductId), ProductRecord>>,
    units: RwLock<HashMap<(TenantId, UnitId), UnitRecord>>,
    parties: RwLock<HashMap<(TenantId, PartyId), PartyRecord>>,
    companies: RwLock<HashMap<(TenantId, CompanyId), CompanyRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a currency definition.
    ///
    /// Rejected with `Conflict` once the currency backs a financial record:
    /// a rename must not silently alter the meaning of historical amounts.
    pub fn upsert_currency(&self, tenant_id: TenantId, currency: Currency) -> DomainResult<()> {
        let key = (tenant_id, currency.id);
        let pinned = self
            .referenced
            .read()
            .map(|set| set.contains(&key))
            .unwrap_or(false);
        if pinned {
            return Err(DomainError::conflict(
                "currency is referenced by financial records and cannot be modified",
            ));
        }
        if let Ok(mut map) = self.currencies.write() {
            map.insert(key, currency);
        }
        Ok(())
    }

    pub fn upsert_project(&self, tenant_id: TenantId, record: ProjectRecord) {
        if let Ok(mut map) = self.projects.write() {
            map.insert((tenant_id, record.id), record);
        }
    }

    pub fn upsert_product(&self, tenant_id: TenantId, record: ProductRecord) {
        if let Ok(mut map) = self.products.write() {
            map.insert((tenant_id, record.id), record);
        }
    }

    pub fn upsert_unit(&self, tenant_id: TenantId, record: UnitRecord) {
        if let Ok(mut map) = self.units.write() {
            map.insert((tenant_id, record.id), record);
        }
    }

    pub fn upsert_party(&self, tenant_id: TenantId, record: PartyRecord) {
        if let Ok(mut map) = self.parties.write() {
            map.insert((tenant_id, record.id), record);
        }
    }

    pub fn upsert_company(&self, tenant_id: TenantId, record: CompanyRecord) {
        if let Ok(mut map) = self.companies.write() {
            map.insert((tenant_id, record.id), record);
        }
    }
}

impl ReferenceDirectory for InMemoryDirectory {
    fn currency(&self, tenant_id: TenantId, id: CurrencyId) -> Option<Currency> {
        let map = self.currencies.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn project(&self, tenant_id: TenantId, id: ProjectId) -> Option<ProjectRecord> {
        let map = self.projects.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        let map = self.products.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Option<UnitRecord> {
        let map = self.units.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn party(&self, tenant_id: TenantId, id: PartyId) -> Option<PartyRecord> {
        let map = self.parties.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn company(&self, tenant_id: TenantId, id: CompanyId) -> Option<CompanyRecord> {
        let map = self.companies.read().ok()?;
        map.get(&(tenant_id, id)).cloned()
    }

    fn mark_currency_referenced(&self, tenant_id: TenantId, id: CurrencyId) {
        if let Ok(mut set) = self.referenced.write() {
            set.insert((tenant_id, id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyCode, CurrencySymbol};
    use pacterp_core::AggregateId;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_currency(id: CurrencyId, code: &str, symbol: &str) -> Currency {
        Currency::new(
            id,
            format!("{code} currency"),
            CurrencyCode::new(code).unwrap(),
            CurrencySymbol::new(symbol).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn unknown_ids_do_not_resolve() {
        let dir = InMemoryDirectory::new();
        let tenant_id = test_tenant_id();

        let err = dir
            .resolve_currency(tenant_id, CurrencyId::new(AggregateId::new()))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);

        let err = dir
            .resolve_project(tenant_id, ProjectId::new(AggregateId::new()))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn lookups_are_tenant_scoped() {
        let dir = InMemoryDirectory::new();
        let tenant_a = test_tenant_id();
        let tenant_b = test_tenant_id();
        let currency_id = CurrencyId::new(AggregateId::new());

        dir.upsert_currency(tenant_a, test_currency(currency_id, "USD", "$"))
            .unwrap();

        assert!(dir.currency(tenant_a, currency_id).is_some());
        assert!(dir.currency(tenant_b, currency_id).is_none());
    }

    #[test]
    fn referenced_currency_rejects_modification() {
        let dir = InMemoryDirectory::new();
        let tenant_id = test_tenant_id();
        let currency_id = CurrencyId::new(AggregateId::new());

        dir.upsert_currency(tenant_id, test_currency(currency_id, "USD", "$"))
            .unwrap();
        dir.mark_currency_referenced(tenant_id, currency_id);

        let err = dir
            .upsert_currency(tenant_id, test_currency(currency_id, "EUR", "€"))
            .unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            _ => panic!("Expected Conflict for referenced currency"),
        }

        // Original definition is untouched.
        let stored = dir.currency(tenant_id, currency_id).unwrap();
        assert_eq!(stored.code.as_str(), "USD");
    }

    #[test]
    fn unreferenced_currency_can_be_replaced() {
        let dir = InMemoryDirectory::new();
        let tenant_id = test_tenant_id();
        let currency_id = CurrencyId::new(AggregateId::new());

        dir.upsert_currency(tenant_id, test_currency(currency_id, "USD", "$"))
            .unwrap();
        dir.upsert_currency(tenant_id, test_currency(currency_id, "EUR", "€"))
            .unwrap();

        let stored = dir.currency(tenant_id, currency_id).unwrap();
        assert_eq!(stored.code.as_str(), "EUR");
    }

    #[test]
    fn product_and_party_round_trip() {
        let dir = InMemoryDirectory::new();
        let tenant_id = test_tenant_id();
        let unit_id = UnitId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());
        let party_id = PartyId::new(AggregateId::new());

        dir.upsert_unit(
            tenant_id,
            UnitRecord {
                id: unit_id,
                name: "tonne".to_string(),
            },
        );
        dir.upsert_product(
            tenant_id,
            ProductRecord {
                id: product_id,
                name: "Rebar".to_string(),
                unit_id,
            },
        );
        dir.upsert_party(
            tenant_id,
            PartyRecord {
                id: party_id,
                name: "Acme Construction".to_string(),
                contact: ContactInfo::default(),
            },
        );

        assert_eq!(dir.product(tenant_id, product_id).unwrap().unit_id, unit_id);
        assert_eq!(
            dir.resolve_party(tenant_id, party_id).unwrap().name,
            "Acme Construction"
        );
    }
}
