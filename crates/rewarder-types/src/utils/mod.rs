//! Helpers shared across crates.

pub mod cbor;
pub mod formatting;

pub use cbor::{blake2b_256, transaction_id, CborError};
pub use formatting::{format_lovelace, truncate_id};
