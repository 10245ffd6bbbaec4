//! Payment handler for chain transaction events.
//!
//! Resolves where a payment came from, totals what it paid to the wallet and
//! runs the reward gates. A payment that passes every gate is turned into a
//! reward transaction and submitted.

use rewarder_config::RewardConfig;
use rewarder_delivery::{DeliveryError, DeliveryService};
use rewarder_order::{BuildError, RewardBuilder};
use rewarder_types::{format_lovelace, ChainTransactionEvent, TransactionId};
use rewarder_utxo::UtxoService;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Provenance of a transaction whose inputs could not be resolved.
pub const UNKNOWN_SOURCE: &str = "(unknown)";

/// Errors that can occur while handling a payment.
#[derive(Debug, Error)]
pub enum PaymentError {
	/// The wallet outputs of the transaction sum past `u64::MAX`.
	#[error("Amount overflow while totalling outputs of {0}")]
	AmountOverflow(TransactionId),
	/// The reward transaction could not be built or signed.
	#[error("Build error: {0}")]
	Build(#[from] BuildError),
	/// The peer rejected the reward transaction or could not be reached.
	#[error("Submission error: {0}")]
	Submit(#[from] DeliveryError),
}

/// Why a payment did not earn a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// No reward address is configured; payments are only logged.
	NoRewardAddress,
	/// A source address is required and the payment came from elsewhere.
	SourceMismatch,
	/// The wallet received less than the configured minimum.
	BelowMinimum,
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SkipReason::NoRewardAddress => write!(f, "no reward address defined"),
			SkipReason::SourceMismatch => write!(f, "source address doesn't match"),
			SkipReason::BelowMinimum => write!(f, "total output amount is below reward minimum"),
		}
	}
}

/// Result of handling one event. Both variants are successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
	Skipped(SkipReason),
	/// Id of the submitted reward transaction.
	Rewarded(TransactionId),
}

/// Decides whether an incoming payment earns a reward and pays it.
///
/// Gates run in a fixed order: reward address configured, source address
/// matches, wallet total at or above the minimum. The first failing gate ends
/// handling with [`DispatchOutcome::Skipped`].
pub struct PaymentHandler {
	utxo: Arc<UtxoService>,
	builder: Arc<RewardBuilder>,
	delivery: Arc<DeliveryService>,
	monitored_address: String,
	config: RewardConfig,
}

impl PaymentHandler {
	/// Creates a new handler.
	///
	/// # Arguments
	///
	/// * `utxo` - Resolves transaction inputs to find the payer
	/// * `builder` - Builds and signs the reward transaction
	/// * `delivery` - Submits the reward transaction
	/// * `monitored_address` - The wallet's payment address
	/// * `config` - Reward policy
	pub fn new(
		utxo: Arc<UtxoService>,
		builder: Arc<RewardBuilder>,
		delivery: Arc<DeliveryService>,
		monitored_address: String,
		config: RewardConfig,
	) -> Self {
		Self {
			utxo,
			builder,
			delivery,
			monitored_address,
			config,
		}
	}

	/// Address whose incoming payments are totalled.
	pub fn monitored_address(&self) -> &str {
		&self.monitored_address
	}

	/// Handles one chain transaction.
	///
	/// Logs every output paying the wallet or the reward address, sums the
	/// lovelace sent to the wallet, then runs the gates. A payment that passes
	/// them all is rewarded with a single transaction of the configured amount.
	///
	/// # Errors
	///
	/// Returns an error if the wallet total overflows, the reward cannot be
	/// built or the submission fails. Skipped payments are not errors.
	#[instrument(skip_all, fields(tx_hash = %event.hash))]
	pub async fn handle(&self, event: ChainTransactionEvent) -> Result<DispatchOutcome, PaymentError> {
		let source = self.provenance(&event).await;
		let reward_address = self.config.reward_address.as_deref();

		let mut total: u64 = 0;
		for output in &event.outputs {
			let to_wallet = output.address == self.monitored_address;
			if !to_wallet && reward_address != Some(output.address.as_str()) {
				continue;
			}
			tracing::info!(
				"received TX {}: {} -> {} ({} lovelace)",
				event.hash,
				source,
				output.address,
				output.amount
			);
			if to_wallet {
				total = total
					.checked_add(output.amount)
					.ok_or(PaymentError::AmountOverflow(event.hash))?;
			}
		}

		let Some(reward_address) = reward_address else {
			tracing::info!("skipping further processing: {}", SkipReason::NoRewardAddress);
			return Ok(DispatchOutcome::Skipped(SkipReason::NoRewardAddress));
		};

		if let Some(required) = self.config.source_address.as_deref() {
			if required != source {
				tracing::info!(
					expected = %required,
					actual = %source,
					"{}",
					SkipReason::SourceMismatch
				);
				return Ok(DispatchOutcome::Skipped(SkipReason::SourceMismatch));
			}
		}

		if total < self.config.min_lovelace {
			tracing::info!(
				total = %format_lovelace(total),
				minimum = %format_lovelace(self.config.min_lovelace),
				"{}",
				SkipReason::BelowMinimum
			);
			return Ok(DispatchOutcome::Skipped(SkipReason::BelowMinimum));
		}

		tracing::info!(
			source = %source,
			total = %format_lovelace(total),
			reward_address = %reward_address,
			"Payment qualifies for reward"
		);
		let tx = self.builder.build_reward().await?;
		self.delivery.submit(&tx).await?;

		tracing::info!("submitted transaction {}", tx.id);
		Ok(DispatchOutcome::Rewarded(tx.id))
	}

	/// Owner of the first input that resolves, or [`UNKNOWN_SOURCE`].
	async fn provenance(&self, event: &ChainTransactionEvent) -> String {
		for input in &event.inputs {
			match self.utxo.utxo_by_input(input).await {
				Ok(Some(utxo)) => return utxo.address,
				Ok(None) => {
					tracing::warn!(input = %input, "could not lookup TX input ref (wrong network?)");
				},
				Err(e) => {
					tracing::warn!(input = %input, error = %e, "failed to lookup TX input ref");
				},
			}
		}
		UNKNOWN_SOURCE.to_string()
	}
}
