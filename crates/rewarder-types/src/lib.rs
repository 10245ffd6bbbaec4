//! Common types for the rewarder workspace.
//!
//! Everything that crosses a crate boundary lives here: the chain data model,
//! the network table, the reward transaction handed to the submission client,
//! secrets and the configuration schema machinery.

/// Chain events, outputs, values and identifiers.
pub mod chain;
/// Reward transactions and ledger eras.
pub mod delivery;
/// Known networks, magics and bootstrap relays.
pub mod networks;
/// Name-to-factory registration.
pub mod registry;
/// Zeroizing wrappers for secrets.
pub mod secret;
pub mod utils;
/// TOML schema validation for implementation tables.
pub mod validation;

pub use chain::*;
pub use delivery::*;
pub use networks::{network_by_name, NetworkInfo, Peer};
pub use registry::ImplementationRegistry;
pub use secret::{SecretBytes, SecretString};
pub use utils::{format_lovelace, truncate_id};
pub use validation::*;
