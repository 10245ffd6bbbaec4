use crate::{BuildError, ComposeError, TransactionComposer, TransactionDraft};
use rewarder_account::{AccountError, AccountService};
use rewarder_config::RewardConfig;
use rewarder_types::utils::transaction_id;
use rewarder_types::{format_lovelace, RewardTransaction, TxOutput, Value};
use rewarder_utxo::{UtxoError, UtxoService};
use std::sync::Arc;
use tracing::instrument;

/// Builds reward payments from the wallet to the reward address.
pub struct RewardBuilder {
	utxo: Arc<UtxoService>,
	account: Arc<AccountService>,
	composer: Option<Arc<dyn TransactionComposer>>,
	config: RewardConfig,
}

impl RewardBuilder {
	/// Creates a new reward builder.
	///
	/// # Arguments
	///
	/// * `utxo` - Lists the wallet's spendable outputs
	/// * `account` - Supplies the wallet address and keys
	/// * `composer` - Serializes and signs; without one every build fails
	///   with [`BuildError::ComposerUnavailable`]
	/// * `config` - Reward amount and reward address
	pub fn new(
		utxo: Arc<UtxoService>,
		account: Arc<AccountService>,
		composer: Option<Arc<dyn TransactionComposer>>,
		config: RewardConfig,
	) -> Self {
		Self {
			utxo,
			account,
			composer,
			config,
		}
	}

	/// Builds and signs a transaction paying `reward_amount` to the reward address.
	#[instrument(skip_all, fields(amount = self.config.reward_amount))]
	pub async fn build_reward(&self) -> Result<RewardTransaction, BuildError> {
		let reward_address = self
			.config
			.reward_address
			.as_deref()
			.ok_or_else(|| BuildError::BuildFailed("no reward address configured".into()))?;

		let funding_address = self
			.account
			.get_address()
			.await
			.map_err(|e| BuildError::Account(e.to_string()))?;

		let utxos = self
			.utxo
			.utxos_by_address(&funding_address)
			.await
			.map_err(|e| match e {
				UtxoError::NoBackendConfigured => BuildError::BackendUnavailable,
				other => BuildError::Resolver(other.to_string()),
			})?;
		if utxos.is_empty() {
			return Err(BuildError::NoFundingUtxo(funding_address));
		}

		let balance = utxos
			.iter()
			.try_fold(Value::default(), |acc, utxo| acc.checked_add(&utxo.value))
			.map_err(|_| BuildError::AmountOverflow)?;
		if balance.lovelace < self.config.reward_amount {
			return Err(BuildError::InsufficientFunds {
				available: balance.lovelace,
				required: self.config.reward_amount,
			});
		}

		tracing::debug!(
			funding_address = %funding_address,
			utxos = utxos.len(),
			balance = %format_lovelace(balance.lovelace),
			"Collected funding UTXOs"
		);

		let composer = self.composer.as_ref().ok_or(BuildError::ComposerUnavailable)?;

		let draft = TransactionDraft {
			inputs: utxos,
			outputs: vec![TxOutput {
				address: reward_address.to_string(),
				amount: self.config.reward_amount,
				assets: Default::default(),
			}],
			change_address: funding_address,
		};
		let unsigned = composer.compose(&draft).await.map_err(|e| match e {
			ComposeError::Sign(msg) => BuildError::SignFailed(msg),
			other => BuildError::BuildFailed(other.to_string()),
		})?;

		let keys = self.account.payment_keys().await.map_err(|e| match e {
			AccountError::KeyFormat(msg) => BuildError::KeyFormat(msg),
			other => BuildError::Account(other.to_string()),
		})?;
		let signed = composer
			.sign(unsigned, &keys)
			.await
			.map_err(|e| BuildError::SignFailed(e.to_string()))?;

		let body_id = transaction_id(&signed.bytes)
			.map_err(|e| BuildError::BuildFailed(format!("signed transaction unreadable: {}", e)))?;
		if body_id != signed.id {
			return Err(BuildError::BuildFailed(format!(
				"composer reported id {} but body hashes to {}",
				signed.id, body_id
			)));
		}

		tracing::info!(
			tx_id = %signed.id,
			era = %signed.era,
			size = signed.size(),
			reward_address = %reward_address,
			"Built reward transaction"
		);
		Ok(signed)
	}
}
