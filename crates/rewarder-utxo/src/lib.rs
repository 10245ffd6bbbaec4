//! UTXO lookups against an indexing backend.
//!
//! Exactly one backend is active: Blockfrost when an API key is configured,
//! otherwise Kupo when a URL is configured. With neither, every lookup fails
//! with [`UtxoError::NoBackendConfigured`]. Lookups are not cached or retried.

use async_trait::async_trait;
use rewarder_config::UtxoConfig;
use rewarder_types::{InputRef, Utxo};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod blockfrost;
	pub mod kupo;
}

/// Errors that can occur during UTXO lookups.
#[derive(Debug, Error)]
pub enum UtxoError {
	/// Transport failure, unexpected status or undecodable response.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Neither Blockfrost nor Kupo is configured.
	#[error("No Blockfrost or Kupo configuration found")]
	NoBackendConfigured,
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Trait defining the interface for UTXO indexing backends.
///
/// Implementations answer two questions about the ledger: which outputs sit
/// at an address, and which output an input reference points to.
#[async_trait]
pub trait UtxoInterface: Send + Sync {
	/// Short backend name for logs.
	fn name(&self) -> &'static str;

	/// All unspent outputs currently at `address`.
	async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, UtxoError>;

	/// The output referenced by `input`, spent or not. `None` when the backend
	/// has no record of it, e.g. because it indexes a different network.
	async fn utxo_by_input(&self, input: &InputRef) -> Result<Option<Utxo>, UtxoError>;
}

/// Resolver used by the dispatcher and the transaction builder.
pub struct UtxoService {
	backend: Option<Box<dyn UtxoInterface>>,
}

impl UtxoService {
	/// Creates a service over `backend`. `None` makes every lookup fail.
	pub fn new(backend: Option<Box<dyn UtxoInterface>>) -> Self {
		Self { backend }
	}

	/// Selects the backend from configuration: Blockfrost, then Kupo.
	pub fn from_config(config: &UtxoConfig, network: &str) -> Result<Self, UtxoError> {
		let timeout = Duration::from_secs(config.timeout_seconds);

		if let Some(api_key) = &config.blockfrost_api_key {
			let backend = implementations::blockfrost::BlockfrostBackend::for_network(
				network,
				config.blockfrost_url.as_deref(),
				api_key.clone(),
				timeout,
			)?;
			tracing::info!(component = "utxo", implementation = "blockfrost", network = %network, "Loaded");
			return Ok(Self::new(Some(Box::new(backend))));
		}

		if let Some(url) = &config.kupo_url {
			let backend = implementations::kupo::KupoBackend::new(url, timeout)?;
			tracing::info!(component = "utxo", implementation = "kupo", url = %url, "Loaded");
			return Ok(Self::new(Some(Box::new(backend))));
		}

		tracing::warn!("No UTXO backend configured - provenance and reward building will fail");
		Ok(Self::new(None))
	}

	/// Name of the active backend, if any.
	pub fn backend_name(&self) -> Option<&'static str> {
		self.backend.as_ref().map(|backend| backend.name())
	}

	fn backend(&self) -> Result<&dyn UtxoInterface, UtxoError> {
		self.backend
			.as_deref()
			.ok_or(UtxoError::NoBackendConfigured)
	}

	/// Lists the unspent outputs at `address`.
	///
	/// An address the backend has never seen yields an empty list, not an
	/// error.
	pub async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, UtxoError> {
		self.backend()?.utxos_by_address(address).await
	}

	/// Resolves the output `input` refers to.
	///
	/// Returns `Ok(None)` when the backend does not know the transaction or
	/// the index is out of range.
	pub async fn utxo_by_input(&self, input: &InputRef) -> Result<Option<Utxo>, UtxoError> {
		self.backend()?.utxo_by_input(input).await
	}
}
