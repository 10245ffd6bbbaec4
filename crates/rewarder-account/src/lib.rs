//! Wallet access for the rewarder.
//!
//! An account provides the monitored payment address and the key pair used
//! to witness reward transactions. Key derivation from a mnemonic is out of
//! scope: implementations consume already-derived keys.

use async_trait::async_trait;
use rewarder_types::{ConfigSchema, ImplementationRegistry};
use thiserror::Error;

pub mod keys;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

pub use keys::PaymentKeys;

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Key bytes do not have the expected layout.
	#[error("Key format error: {0}")]
	KeyFormat(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
	/// A key file could not be read.
	#[error("IO error: {0}")]
	Io(String),
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for wallet implementations.
///
/// The account owns the address that receives payments and funds rewards.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// The wallet's payment address (bech32).
	async fn address(&self) -> Result<String, AccountError>;

	/// Keys for witnessing transactions spent from [`address`](Self::address).
	async fn payment_keys(&self) -> Result<PaymentKeys, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Returns every account implementation linked into this crate.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Wraps the selected account implementation.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	/// Creates a new AccountService with the specified implementation.
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Retrieves the wallet's payment address.
	pub async fn get_address(&self) -> Result<String, AccountError> {
		self.implementation.address().await
	}

	/// Retrieves the key pair used to witness reward transactions.
	pub async fn payment_keys(&self) -> Result<PaymentKeys, AccountError> {
		self.implementation.payment_keys().await
	}
}
