//! Blockfrost-backed UTXO lookups.
//!
//! Uses `GET /addresses/{address}/utxos` (paginated) and
//! `GET /txs/{hash}/utxos`. A 404 from either endpoint means the backend has
//! no record: no UTXOs for the address, or an unknown transaction.

use crate::{UtxoError, UtxoInterface};
use async_trait::async_trait;
use reqwest::StatusCode;
use rewarder_types::{network_by_name, InputRef, SecretString, Utxo, Value};
use serde::Deserialize;
use std::time::Duration;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct AmountEntry {
	unit: String,
	quantity: String,
}

#[derive(Debug, Deserialize)]
struct AddressUtxo {
	address: String,
	tx_hash: String,
	output_index: u32,
	amount: Vec<AmountEntry>,
}

#[derive(Debug, Deserialize)]
struct TxOutputEntry {
	address: String,
	output_index: u32,
	amount: Vec<AmountEntry>,
}

#[derive(Debug, Deserialize)]
struct TxUtxos {
	outputs: Vec<TxOutputEntry>,
}

fn to_value(amount: &[AmountEntry]) -> Result<Value, UtxoError> {
	let mut value = Value::default();
	for entry in amount {
		let quantity: u64 = entry.quantity.parse().map_err(|_| {
			UtxoError::Backend(format!(
				"Invalid quantity '{}' for unit {}",
				entry.quantity, entry.unit
			))
		})?;
		value
			.add_unit(&entry.unit, quantity)
			.map_err(|e| UtxoError::Backend(e.to_string()))?;
	}
	Ok(value)
}

/// Blockfrost REST client authenticated with a project id.
pub struct BlockfrostBackend {
	client: reqwest::Client,
	base_url: String,
	project_id: SecretString,
}

impl BlockfrostBackend {
	/// Creates a client for the API rooted at `base_url`, e.g.
	/// `https://cardano-preprod.blockfrost.io/api/v0`.
	///
	/// # Arguments
	///
	/// * `base_url` - API root; a trailing `/` is ignored
	/// * `project_id` - Sent as the `project_id` header on every request
	/// * `timeout` - Per-request timeout
	pub fn new(
		base_url: impl Into<String>,
		project_id: SecretString,
		timeout: Duration,
	) -> Result<Self, UtxoError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| UtxoError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			project_id,
		})
	}

	/// Uses `base_url` when given, else the network's public Blockfrost root.
	pub fn for_network(
		network: &str,
		base_url: Option<&str>,
		project_id: SecretString,
		timeout: Duration,
	) -> Result<Self, UtxoError> {
		let base_url = match base_url {
			Some(url) => url.to_string(),
			None => network_by_name(network)
				.and_then(|info| info.blockfrost_url)
				.ok_or_else(|| {
					UtxoError::InvalidConfig(format!(
						"Blockfrost has no endpoint for network '{}'; set blockfrost_url",
						network
					))
				})?
				.to_string(),
		};
		Self::new(base_url, project_id, timeout)
	}

	/// Returns `None` on 404.
	async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>, UtxoError> {
		let url = format!("{}{}", self.base_url, path);
		let response = self
			.client
			.get(&url)
			.header("project_id", self.project_id.expose_secret())
			.send()
			.await
			.map_err(|e| UtxoError::Backend(format!("Request to {} failed: {}", url, e)))?;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(UtxoError::Backend(format!(
				"Blockfrost returned {} for {}: {}",
				status, path, body
			)));
		}

		response
			.json::<T>()
			.await
			.map(Some)
			.map_err(|e| UtxoError::Backend(format!("Invalid response for {}: {}", path, e)))
	}
}

#[async_trait]
impl UtxoInterface for BlockfrostBackend {
	fn name(&self) -> &'static str {
		"blockfrost"
	}

	async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, UtxoError> {
		let mut utxos = Vec::new();
		let mut page = 1;
		loop {
			let path = format!(
				"/addresses/{}/utxos?count={}&page={}",
				address, PAGE_SIZE, page
			);
			let Some(entries) = self.get::<Vec<AddressUtxo>>(&path).await? else {
				break;
			};
			let fetched = entries.len();
			for entry in entries {
				let tx_id = entry.tx_hash.parse().map_err(|e| {
					UtxoError::Backend(format!("Invalid tx hash {}: {}", entry.tx_hash, e))
				})?;
				utxos.push(Utxo {
					input: InputRef::new(tx_id, entry.output_index),
					address: entry.address,
					value: to_value(&entry.amount)?,
				});
			}
			if fetched < PAGE_SIZE {
				break;
			}
			page += 1;
		}

		tracing::debug!(backend = "blockfrost", address = %address, count = utxos.len(), "Fetched UTXOs");
		Ok(utxos)
	}

	async fn utxo_by_input(&self, input: &InputRef) -> Result<Option<Utxo>, UtxoError> {
		let path = format!("/txs/{}/utxos", input.tx_id);
		let Some(tx) = self.get::<TxUtxos>(&path).await? else {
			return Ok(None);
		};

		tx.outputs
			.into_iter()
			.find(|output| output.output_index == input.index)
			.map(|output| {
				Ok(Utxo {
					input: *input,
					value: to_value(&output.amount)?,
					address: output.address,
				})
			})
			.transpose()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::{Path, Query};
	use axum::http::{HeaderMap, StatusCode as HttpStatus};
	use axum::response::IntoResponse;
	use axum::routing::get;
	use axum::{Json, Router};
	use serde_json::json;
	use std::collections::HashMap;

	const TX: &str = "1111111111111111111111111111111111111111111111111111111111111111";

	async fn serve(router: Router) -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, router).await.unwrap();
		});
		format!("http://{}", addr)
	}

	fn authorized(headers: &HeaderMap) -> bool {
		headers.get("project_id").and_then(|v| v.to_str().ok()) == Some("preprodTestKey")
	}

	async fn address_utxos(
		headers: HeaderMap,
		Path(address): Path<String>,
		Query(query): Query<HashMap<String, String>>,
	) -> impl IntoResponse {
		if !authorized(&headers) {
			return HttpStatus::FORBIDDEN.into_response();
		}
		if address == "addr_test1qempty" {
			return HttpStatus::NOT_FOUND.into_response();
		}
		let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
		let count = if page == 1 { 100 } else { 3 };
		let entries: Vec<_> = (0..count)
			.map(|i| {
				json!({
					"address": address,
					"tx_hash": TX,
					"tx_index": i,
					"output_index": (page - 1) * 100 + i,
					"amount": [
						{"unit": "lovelace", "quantity": "2000000"},
						{"unit": format!("{}{}", "ab".repeat(28), "4d494e"), "quantity": "5"}
					],
					"block": "00",
					"data_hash": null
				})
			})
			.collect();
		Json(entries).into_response()
	}

	async fn tx_utxos(headers: HeaderMap, Path(hash): Path<String>) -> impl IntoResponse {
		if !authorized(&headers) {
			return HttpStatus::FORBIDDEN.into_response();
		}
		if hash != TX {
			return (HttpStatus::NOT_FOUND, "{\"status_code\":404}").into_response();
		}
		Json(json!({
			"hash": TX,
			"inputs": [],
			"outputs": [
				{"address": "addr_test1qsource", "output_index": 0, "amount": [{"unit": "lovelace", "quantity": "1000"}]},
				{"address": "addr_test1qother", "output_index": 1, "amount": [{"unit": "lovelace", "quantity": "9"}]}
			]
		}))
		.into_response()
	}

	async fn backend(key: &str) -> BlockfrostBackend {
		let url = serve(
			Router::new()
				.route("/addresses/{address}/utxos", get(address_utxos))
				.route("/txs/{hash}/utxos", get(tx_utxos)),
		)
		.await;
		BlockfrostBackend::new(url, SecretString::from(key), Duration::from_secs(5)).unwrap()
	}

	#[tokio::test]
	async fn test_address_utxos_paginates() {
		let backend = backend("preprodTestKey").await;
		let utxos = backend.utxos_by_address("addr_test1qwallet").await.unwrap();
		assert_eq!(utxos.len(), 103);
		assert_eq!(utxos[0].value.lovelace, 2_000_000);
		assert_eq!(utxos[102].input.index, 102);
		assert_eq!(utxos[0].value.assets[&"ab".repeat(28)]["4d494e"], 5);
	}

	#[tokio::test]
	async fn test_address_not_found_is_empty() {
		let backend = backend("preprodTestKey").await;
		assert!(backend.utxos_by_address("addr_test1qempty").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_utxo_by_input() {
		let backend = backend("preprodTestKey").await;
		let input = InputRef::new(TX.parse().unwrap(), 0);
		let utxo = backend.utxo_by_input(&input).await.unwrap().unwrap();
		assert_eq!(utxo.address, "addr_test1qsource");
		assert_eq!(utxo.value.lovelace, 1000);

		let missing_index = InputRef::new(TX.parse().unwrap(), 7);
		assert!(backend.utxo_by_input(&missing_index).await.unwrap().is_none());

		let unknown = InputRef::new(rewarder_types::TransactionId([0x22; 32]), 0);
		assert!(backend.utxo_by_input(&unknown).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_rejected_key_is_backend_error() {
		let backend = backend("wrong").await;
		let err = backend.utxos_by_address("addr_test1qwallet").await.unwrap_err();
		assert!(matches!(err, UtxoError::Backend(ref msg) if msg.contains("403")));
	}

	#[test]
	fn test_for_network_uses_table() {
		let backend = BlockfrostBackend::for_network(
			"preview",
			None,
			SecretString::from("k"),
			Duration::from_secs(1),
		)
		.unwrap();
		assert_eq!(backend.base_url, "https://cardano-preview.blockfrost.io/api/v0");
	}
}
