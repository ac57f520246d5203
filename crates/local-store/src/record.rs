//! Stored record and revision types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Revision of a stored record for optimistic concurrency control.
///
/// Revision 0 means "no record"; the first write produces revision 1 and
/// every subsequent write increments it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(i64);

impl Revision {
    /// Creates a revision from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The revision of a record that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next revision.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw revision value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Revision {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A JSON document stored under `(namespace, key)`.
///
/// `namespace` is a fixed store name such as `"travel-bookings"`; `owner`
/// is the client the record belongs to and drives bulk listing and deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub namespace: String,
    pub key: String,
    pub owner: Option<String>,
    pub revision: Revision,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StoredRecord {
    /// Deserializes the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Options for writing a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Revision the record must currently be at. `None` skips the check.
    pub expected_revision: Option<Revision>,
}

impl SaveOptions {
    /// Last writer wins.
    pub fn any() -> Self {
        Self::default()
    }

    /// Fails unless the record is currently at `revision`.
    pub fn expect_revision(revision: Revision) -> Self {
        Self {
            expected_revision: Some(revision),
        }
    }

    /// Fails if the record already exists.
    pub fn expect_new() -> Self {
        Self {
            expected_revision: Some(Revision::initial()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_sequence() {
        assert_eq!(Revision::initial().as_i64(), 0);
        assert_eq!(Revision::initial().next(), Revision::new(1));
        assert!(Revision::new(2) > Revision::new(1));
    }

    #[test]
    fn save_options_constructors() {
        assert_eq!(SaveOptions::any().expected_revision, None);
        assert_eq!(
            SaveOptions::expect_new().expected_revision,
            Some(Revision::initial())
        );
        assert_eq!(
            SaveOptions::expect_revision(Revision::new(3)).expected_revision,
            Some(Revision::new(3))
        );
    }

    #[test]
    fn decode_typed_payload() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Cart {
            items: u32,
        }

        let record = StoredRecord {
            namespace: "travel-cart".to_string(),
            key: "c-1".to_string(),
            owner: Some("client-1".to_string()),
            revision: Revision::new(1),
            updated_at: Utc::now(),
            payload: serde_json::json!({ "items": 2 }),
        };

        let cart: Cart = record.decode().unwrap();
        assert_eq!(cart, Cart { items: 2 });
    }
}
