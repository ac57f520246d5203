//! Idempotency keys for mutating calls to external services.
//!
//! A key is generated once per logical intent (one checkout, one booking
//! confirmation, one cancellation). Retrying the same intent after a transport
//! failure must reuse the key it was first issued with; persisting that
//! association is the caller's job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longest key accepted from callers, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Well-known key prefixes, one per kind of intent.
pub mod prefixes {
    pub const CHECKOUT: &str = "checkout";
    pub const CART_ITEM: &str = "cart";
    pub const BOOKING_CONFIRM: &str = "booking-confirm";
    pub const BOOKING_CANCEL: &str = "booking-cancel";
}

/// Errors produced when accepting a caller-supplied key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyKeyError {
    #[error("Idempotency key must not be empty")]
    Empty,

    #[error("Idempotency key is {0} bytes long, the limit is {MAX_KEY_LEN}")]
    TooLong(usize),

    #[error("Idempotency key contains an invalid character: {0:?}")]
    InvalidCharacter(char),
}

/// A token that lets an external service deduplicate a retried request.
///
/// Generated keys have the form `<prefix>-<unix millis>-<8 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generates a fresh key for a new intent.
    ///
    /// Combines wall-clock milliseconds with 32 random bits. Never fails.
    pub fn generate(prefix: &str) -> Self {
        let millis = Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        let suffix = &random[..8];
        if prefix.is_empty() {
            Self(format!("{millis}-{suffix}"))
        } else {
            Self(format!("{prefix}-{millis}-{suffix}"))
        }
    }

    /// Accepts a key supplied by a caller (for example an `Idempotency-Key` header).
    pub fn parse(raw: &str) -> Result<Self, IdempotencyKeyError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdempotencyKeyError::Empty);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(IdempotencyKeyError::TooLong(raw.len()));
        }
        if let Some(c) = raw.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(IdempotencyKeyError::InvalidCharacter(c));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns true if the key was generated for the given prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for IdempotencyKey {
    type Err = IdempotencyKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
