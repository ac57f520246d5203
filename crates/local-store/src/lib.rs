//! Durable keyed storage for state that has to survive a request boundary.
//!
//! Carts, checkout sessions and pending bookings live here between the
//! moment the customer is handed to the bank and the moment the bank
//! reports back.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryLocalStore;
pub use postgres::PostgresLocalStore;
pub use record::{Revision, SaveOptions, StoredRecord};
pub use store::{LocalStore, LocalStoreExt};
