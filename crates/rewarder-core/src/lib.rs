//! Core of the rewarder.
//!
//! Wires discovered chain events to the payment handler, which decides
//! whether a payment to the wallet earns a reward and, if so, builds and
//! submits it. The [`RewarderBuilder`] assembles the services from
//! configuration and the [`RewarderEngine`] runs the event loop.

pub mod builder;
pub mod engine;
pub mod handlers;

pub use builder::{BuilderError, RewarderBuilder, RewarderFactories};
pub use engine::{EngineError, RewarderEngine};
pub use handlers::{DispatchOutcome, PaymentError, PaymentHandler, SkipReason};
