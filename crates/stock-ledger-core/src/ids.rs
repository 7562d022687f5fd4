//! Identifier types for the stock ledger.
//!
//! Catalogue and location identifiers are the integer primary keys of the
//! surrounding retail database. Ledger entries and workflow documents use
//! ULIDs so their ids sort by creation time.
//!
//! # Macro-based ID Types
//!
//! The `int_id_type!` and `ulid_id_type!` macros keep the trait surface of all
//! identifier types identical (serde, parsing, display, byte encoding).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Define an integer-backed identifier with standard trait implementations.
///
/// Generated types serialize as plain numbers and encode as 8 big-endian
/// bytes, so byte-wise key order equals numeric order.
macro_rules! int_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an identifier from its raw value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the raw value.
            #[must_use]
            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Big-endian byte encoding used in storage keys.
            #[must_use]
            pub const fn to_be_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode from the big-endian storage encoding.
            #[must_use]
            pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
                Self(u64::from_be_bytes(bytes))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self).map_err(|_| IdError::InvalidInteger)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Define a ULID-backed identifier with standard trait implementations.
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Create an identifier from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Generate a new identifier with the current timestamp.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the bytes of the ULID (16 bytes).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Create an identifier from its 16-byte encoding.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

int_id_type!(ProductId, "A product identifier.");
int_id_type!(
    VariantId,
    "A product variant identifier.\n\nStock is tracked per variant, never per product."
);
int_id_type!(LocationId, "A store or warehouse location identifier.");

ulid_id_type!(EntryId, "A ledger entry identifier (ULID, time-ordered).");
ulid_id_type!(DocumentId, "A workflow document identifier (ULID, time-ordered).");
ulid_id_type!(RunId, "A reconciliation run identifier (ULID, time-ordered).");

/// The composite key that scopes ledger entries and balance cache rows.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    /// Product variant.
    pub variant_id: VariantId,
    /// Location holding the stock.
    pub location_id: LocationId,
}

impl StockKey {
    /// Encoded length of a stock key in bytes.
    pub const ENCODED_LEN: usize = 16;

    /// Create a stock key.
    #[must_use]
    pub const fn new(variant_id: VariantId, location_id: LocationId) -> Self {
        Self {
            variant_id,
            location_id,
        }
    }

    /// Encode as `variant_id (8 bytes BE) || location_id (8 bytes BE)`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.variant_id.to_be_bytes());
        out[8..].copy_from_slice(&self.location_id.to_be_bytes());
        out
    }

    /// Decode the first 16 bytes of `bytes`.
    ///
    /// Returns `None` if fewer than 16 bytes are given.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let variant: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        let location: [u8; 8] = bytes.get(8..16)?.try_into().ok()?;
        Some(Self::new(
            VariantId::from_be_bytes(variant),
            LocationId::from_be_bytes(location),
        ))
    }
}

impl fmt::Debug for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StockKey({}@{})", self.variant_id, self.location_id)
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "variant {} @ location {}", self.variant_id, self.location_id)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid unsigned integer.
    #[error("invalid integer identifier")]
    InvalidInteger,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_id_parses_and_displays() {
        let id: VariantId = "10".parse().unwrap();
        assert_eq!(id, VariantId::new(10));
        assert_eq!(id.to_string(), "10");
        assert_eq!("x10".parse::<VariantId>(), Err(IdError::InvalidInteger));
    }

    #[test]
    fn int_ids_serialize_as_numbers() {
        let json = serde_json::to_string(&LocationId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn entry_id_serializes_as_string() {
        let id = EntryId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
        assert!(json.starts_with('"'));
    }

    #[test]
    fn stock_key_bytes_sort_like_tuples() {
        let a = StockKey::new(VariantId::new(1), LocationId::new(300));
        let b = StockKey::new(VariantId::new(2), LocationId::new(1));
        assert!(a.to_bytes() < b.to_bytes());
        assert_eq!(StockKey::from_bytes(&a.to_bytes()), Some(a));
        assert_eq!(StockKey::from_bytes(&[0u8; 4]), None);
    }
}
