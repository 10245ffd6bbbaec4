//! Event handlers.
//!
//! One handler per event kind; the engine currently only sees payments.

pub mod payment;

pub use payment::{DispatchOutcome, PaymentError, PaymentHandler, SkipReason};
