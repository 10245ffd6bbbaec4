//! Reward transaction construction for the rewarder.
//!
//! The [`RewardBuilder`] gathers the wallet's funding UTXOs, drafts a single
//! payment to the reward address and hands balancing, serialization and
//! witnessing to a pluggable [`TransactionComposer`].

use async_trait::async_trait;
use rewarder_account::PaymentKeys;
use rewarder_types::{ConfigSchema, Era, ImplementationRegistry, RewardTransaction, TransactionId, TxOutput, Utxo};
use thiserror::Error;

mod builder;

pub use builder::RewardBuilder;

/// Errors returned by [`RewardBuilder::build_reward`].
#[derive(Debug, Error)]
pub enum BuildError {
	/// The funding address holds no UTXOs.
	#[error("No UTXOs found at funding address {0}")]
	NoFundingUtxo(String),
	#[error("Insufficient funds: {available} lovelace available, {required} required")]
	InsufficientFunds { available: u64, required: u64 },
	#[error("Funding balance overflows")]
	AmountOverflow,
	#[error("No UTXO backend configured")]
	BackendUnavailable,
	#[error("UTXO lookup failed: {0}")]
	Resolver(String),
	#[error("No transaction composer configured")]
	ComposerUnavailable,
	#[error("Account error: {0}")]
	Account(String),
	#[error("Key format error: {0}")]
	KeyFormat(String),
	#[error("Failed to build transaction: {0}")]
	BuildFailed(String),
	#[error("Failed to sign transaction: {0}")]
	SignFailed(String),
}

/// Errors reported by a [`TransactionComposer`].
#[derive(Debug, Error)]
pub enum ComposeError {
	/// Inputs cannot cover outputs plus fee, or the draft is otherwise unbuildable.
	#[error("Balance error: {0}")]
	Balance(String),
	#[error("Signing error: {0}")]
	Sign(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// The payment the builder wants made.
///
/// `inputs` are candidates: the composer selects from them and returns any
/// surplus to `change_address`.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
	pub inputs: Vec<Utxo>,
	pub outputs: Vec<TxOutput>,
	pub change_address: String,
}

/// A balanced, serialized transaction without witnesses.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
	pub bytes: Vec<u8>,
	pub id: TransactionId,
	pub era: Era,
}

/// Balances, serializes and witnesses transactions.
///
/// Transaction serialization lives behind this trait; the rest of the
/// workspace only inspects the resulting bytes.
#[async_trait]
pub trait TransactionComposer: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Selects inputs, computes fee and change, and serializes the body.
	async fn compose(&self, draft: &TransactionDraft) -> Result<UnsignedTransaction, ComposeError>;

	/// Adds a verification key witness made with `keys`.
	async fn sign(
		&self,
		tx: UnsignedTransaction,
		keys: &PaymentKeys,
	) -> Result<RewardTransaction, ComposeError>;
}

/// Type alias for composer factory functions.
pub type ComposerFactory = fn(&toml::Value) -> Result<Box<dyn TransactionComposer>, ComposeError>;

/// Registry trait for composer implementations linked into a binary.
pub trait ComposerRegistry: ImplementationRegistry<Factory = ComposerFactory> {}
