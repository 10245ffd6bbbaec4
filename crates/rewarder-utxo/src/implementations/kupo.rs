//! Kupo-backed UTXO lookups.
//!
//! Kupo answers `GET /matches/{pattern}` with every output matching the
//! pattern. Inputs are looked up with the `{index}@{tx id}` output-reference
//! pattern; addresses with the bech32 address and the `unspent` flag.

use crate::{UtxoError, UtxoInterface};
use async_trait::async_trait;
use rewarder_types::{InputRef, TransactionId, Utxo, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct KupoValue {
	coins: u64,
	/// Keys are `policy.name`, or just `policy` for an empty asset name.
	#[serde(default)]
	assets: HashMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct KupoMatch {
	transaction_id: String,
	output_index: u32,
	address: String,
	value: KupoValue,
}

impl KupoMatch {
	fn into_utxo(self) -> Result<Utxo, UtxoError> {
		let tx_id: TransactionId = self.transaction_id.parse().map_err(|e| {
			UtxoError::Backend(format!("Invalid tx id {}: {}", self.transaction_id, e))
		})?;

		let mut value = Value::from_lovelace(self.value.coins);
		for (key, quantity) in &self.value.assets {
			let (policy, name) = key.split_once('.').unwrap_or((key.as_str(), ""));
			value
				.add_asset(policy, name, *quantity)
				.map_err(|e| UtxoError::Backend(e.to_string()))?;
		}

		Ok(Utxo {
			input: InputRef::new(tx_id, self.output_index),
			address: self.address,
			value,
		})
	}
}

/// Kupo HTTP client. Kupo needs no credentials.
pub struct KupoBackend {
	client: reqwest::Client,
	base_url: String,
}

impl KupoBackend {
	/// Creates a client for the Kupo instance at `base_url`.
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UtxoError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| UtxoError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
		})
	}

	async fn matches(&self, pattern: &str, unspent: bool) -> Result<Vec<KupoMatch>, UtxoError> {
		let mut url = format!("{}/matches/{}", self.base_url, pattern);
		if unspent {
			url.push_str("?unspent");
		}

		let response = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| UtxoError::Backend(format!("Request to {} failed: {}", url, e)))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(UtxoError::Backend(format!(
				"Kupo returned {} for {}: {}",
				status, pattern, body
			)));
		}

		response
			.json()
			.await
			.map_err(|e| UtxoError::Backend(format!("Invalid response for {}: {}", pattern, e)))
	}
}

#[async_trait]
impl UtxoInterface for KupoBackend {
	fn name(&self) -> &'static str {
		"kupo"
	}

	async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, UtxoError> {
		let utxos = self
			.matches(address, true)
			.await?
			.into_iter()
			.map(KupoMatch::into_utxo)
			.collect::<Result<Vec<_>, _>>()?;

		tracing::debug!(backend = "kupo", address = %address, count = utxos.len(), "Fetched UTXOs");
		Ok(utxos)
	}

	async fn utxo_by_input(&self, input: &InputRef) -> Result<Option<Utxo>, UtxoError> {
		let pattern = format!("{}@{}", input.index, input.tx_id);
		let mut matches = self.matches(&pattern, false).await?;
		if matches.is_empty() {
			tracing::debug!(backend = "kupo", input = %input, "No matches for output reference");
			return Ok(None);
		}
		matches.swap_remove(0).into_utxo().map(Some)
	}
}
