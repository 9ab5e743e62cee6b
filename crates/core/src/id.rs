//! Typed identifiers.
//!
//! Tenant and aggregate ids are distinct UUID newtypes so a call site can
//! never hand one where the other belongs; together they key every event
//! stream and read-model row in the ledger. Both mint UUIDv7 values, so
//! fresh ids carry their creation order.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh, time-ordered identifier.
            ///
            /// Tests that need determinism should build ids via
            /// [`Self::from_uuid`] instead.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s).map_err(|e| {
                    DomainError::invalid_id(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        e
                    ))
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id! {
    /// Isolation boundary: every stream key, envelope, and read-model row
    /// carries the tenant it belongs to.
    TenantId
}

uuid_id! {
    /// Identity of one aggregate stream within a tenant (for this ledger,
    /// one contract).
    AggregateId
}
