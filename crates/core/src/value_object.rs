//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - they have no
/// identity of their own. `CurrencyCode("USD")` equals any other
/// `CurrencyCode("USD")`; a `Contract` is only ever equal to itself.
///
/// To "modify" a value object, construct a new one. The trait requires
/// `Clone + PartialEq + Debug` so values can be copied, compared and logged.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
