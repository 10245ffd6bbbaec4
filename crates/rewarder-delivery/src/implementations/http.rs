//! Submission through an HTTP submit API (e.g. cardano-submit-api).

use crate::{DeliveryError, DeliveryInterface};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use rewarder_types::RewardTransaction;
use std::time::Duration;

/// Posts transactions to a submit API endpoint.
pub struct HttpTransport {
	client: reqwest::Client,
	url: String,
}

impl HttpTransport {
	/// Creates a transport posting to `url`, e.g.
	/// `http://localhost:8090/api/submit/tx`.
	pub fn new(url: &str, timeout: Duration) -> Result<Self, DeliveryError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| DeliveryError::Network(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			url: url.to_string(),
		})
	}
}

#[async_trait]
impl DeliveryInterface for HttpTransport {
	fn name(&self) -> &'static str {
		"http"
	}

	/// Posts the raw CBOR; only `202 Accepted` counts as success.
	async fn submit(&self, tx: &RewardTransaction) -> Result<(), DeliveryError> {
		let response = self
			.client
			.post(&self.url)
			.header(CONTENT_TYPE, "application/cbor")
			.body(tx.bytes.clone())
			.send()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to send request to {}: {}", self.url, e)))?;

		let status = response.status();
		// read the body either way so the connection can be reused
		let body = response
			.text()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to read response body: {}", e)))?;

		if status == StatusCode::ACCEPTED {
			tracing::info!(url = %self.url, tx_id = %tx.id, "Submit API accepted transaction");
			Ok(())
		} else {
			Err(DeliveryError::Rejected {
				status: status.as_u16(),
				body,
			})
		}
	}
}
