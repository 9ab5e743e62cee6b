//! Reference-data registry consumed by the contract ledger.
//!
//! Currencies, projects, products, units and parties are plain reference
//! records supplied by external CRUD collaborators; the ledger only ever
//! resolves them by id. This crate holds the validated currency value
//! objects and the read-only directory abstraction for those lookups.

pub mod currency;
pub mod directory;

pub use currency::{Currency, CurrencyCode, CurrencyId, CurrencySymbol};
pub use directory::{
    CompanyId, CompanyRecord, ContactInfo, InMemoryDirectory, PartyId, PartyRecord, ProductId,
    ProductRecord, ProjectId, ProjectRecord, ReferenceDirectory, UnitId, UnitRecord,
};
