//! Webhook receiver for chain follower events.
//!
//! The chain follower POSTs every transaction it sees to `/events`:
//!
//! ```json
//! {
//!   "type": "chainsync.transaction",
//!   "context": { "transactionHash": "<hex>", "blockNumber": 1, "slotNumber": 2 },
//!   "payload": {
//!     "inputs": [{ "transactionId": "<hex>", "index": 0 }],
//!     "outputs": [{ "address": "addr...", "amount": 1000000,
//!                   "assets": [{ "policyId": "<hex>", "name": "<hex>", "amount": 1 }] }]
//!   }
//! }
//! ```
//!
//! Events that pass the [`ChainFilter`] are forwarded to the engine.
//!
//! Responses: `202` forwarded, `200` filtered out, `400` malformed body,
//! `401` bad or missing bearer token, `503` engine no longer receiving.
//! `GET /health` answers `200` while the server runs.

use crate::{ChainFilter, DiscoveryError, DiscoveryInterface};
use async_trait::async_trait;
use axum::{
	body::Bytes,
	extract::State,
	http::{header::AUTHORIZATION, HeaderMap, StatusCode},
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use rewarder_types::{
	ChainTransactionEvent, ConfigSchema, EventContext, Field, FieldType, InputRef, Schema,
	SecretString, TransactionId, TxOutput, Value,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
	#[serde(rename = "type")]
	kind: String,
	context: WireContext,
	payload: WirePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContext {
	transaction_hash: String,
	#[serde(default)]
	block_number: u64,
	#[serde(default)]
	slot_number: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
	#[serde(default)]
	inputs: Vec<WireInput>,
	#[serde(default)]
	outputs: Vec<WireOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInput {
	transaction_id: String,
	index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOutput {
	address: String,
	amount: u64,
	#[serde(default)]
	assets: Vec<WireAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAsset {
	policy_id: String,
	#[serde(default)]
	name: String,
	amount: u64,
}

impl WireEvent {
	fn into_event(self) -> Result<(String, ChainTransactionEvent), DiscoveryError> {
		let hash: TransactionId = self.context.transaction_hash.parse().map_err(|e| {
			DiscoveryError::ParseError(format!(
				"transactionHash '{}': {}",
				self.context.transaction_hash, e
			))
		})?;

		let inputs = self
			.payload
			.inputs
			.into_iter()
			.map(|input| {
				let tx_id = input.transaction_id.parse().map_err(|e| {
					DiscoveryError::ParseError(format!("input '{}': {}", input.transaction_id, e))
				})?;
				Ok(InputRef::new(tx_id, input.index))
			})
			.collect::<Result<Vec<_>, DiscoveryError>>()?;

		let outputs = self
			.payload
			.outputs
			.into_iter()
			.map(|output| {
				let mut value = Value::from_lovelace(output.amount);
				for asset in &output.assets {
					value
						.add_asset(&asset.policy_id, &asset.name, asset.amount)
						.map_err(|_| {
							DiscoveryError::ParseError(format!(
								"asset amount overflow at output to {}",
								output.address
							))
						})?;
				}
				Ok(TxOutput {
					address: output.address,
					amount: value.lovelace,
					assets: value.assets,
				})
			})
			.collect::<Result<Vec<_>, DiscoveryError>>()?;

		let event = ChainTransactionEvent {
			hash,
			inputs,
			outputs,
			context: EventContext {
				block_number: self.context.block_number,
				slot: self.context.slot_number,
			},
		};
		Ok((self.kind, event))
	}
}

#[derive(Debug, Serialize)]
struct EventResponse {
	status: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	message: Option<String>,
}

fn respond(code: StatusCode, status: &'static str, message: Option<String>) -> Response {
	(code, Json(EventResponse { status, message })).into_response()
}

#[derive(Clone)]
struct WebhookState {
	sender: mpsc::UnboundedSender<ChainTransactionEvent>,
	filter: Arc<ChainFilter>,
	auth_token: Option<Arc<SecretString>>,
}

fn authorized(headers: &HeaderMap, token: &SecretString) -> bool {
	headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.is_some_and(|presented| {
			token.with_exposed(|expected| bool::from(presented.as_bytes().ct_eq(expected.as_bytes())))
		})
}

async fn handle_event(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
	if let Some(token) = &state.auth_token {
		if !authorized(&headers, token) {
			return respond(StatusCode::UNAUTHORIZED, "error", Some("invalid or missing bearer token".into()));
		}
	}

	let wire: WireEvent = match serde_json::from_slice(&body) {
		Ok(wire) => wire,
		Err(e) => {
			tracing::debug!(error = %e, "Rejected malformed event");
			return respond(StatusCode::BAD_REQUEST, "error", Some(format!("invalid event: {}", e)));
		},
	};
	let (kind, event) = match wire.into_event() {
		Ok(converted) => converted,
		Err(e) => return respond(StatusCode::BAD_REQUEST, "error", Some(e.to_string())),
	};

	if !state.filter.accepts(&kind, &event) {
		tracing::trace!(kind = %kind, tx_hash = %event.hash, "Event filtered out");
		return respond(StatusCode::OK, "filtered", None);
	}

	let hash = event.hash;
	if state.sender.send(event).is_err() {
		tracing::warn!(tx_hash = %hash, "Event pipeline closed, dropping event");
		return respond(StatusCode::SERVICE_UNAVAILABLE, "error", Some("pipeline closed".into()));
	}
	tracing::debug!(tx_hash = %hash, "Forwarded chain event");
	respond(StatusCode::ACCEPTED, "accepted", None)
}

async fn handle_health() -> Response {
	respond(StatusCode::OK, "ok", None)
}

fn router(state: WebhookState) -> Router {
	Router::new()
		.route("/events", post(handle_event))
		.route("/health", get(handle_health))
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}

/// HTTP server receiving events pushed by the chain follower.
pub struct WebhookDiscovery {
	api_host: String,
	api_port: u16,
	auth_token: Option<Arc<SecretString>>,
	filter: Arc<ChainFilter>,
	is_running: Arc<AtomicBool>,
	shutdown_signal: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl WebhookDiscovery {
	/// Creates a webhook receiver. Nothing listens until
	/// [`start_monitoring`](DiscoveryInterface::start_monitoring) is called.
	///
	/// # Arguments
	///
	/// * `api_host` - Interface to bind, e.g. `0.0.0.0`
	/// * `api_port` - Port to bind; `0` picks a free one
	/// * `auth_token` - Bearer token required on `/events` when set
	/// * `filter` - Decides which events are forwarded
	pub fn new(
		api_host: String,
		api_port: u16,
		auth_token: Option<SecretString>,
		filter: ChainFilter,
	) -> Self {
		Self {
			api_host,
			api_port,
			auth_token: auth_token.map(Arc::new),
			filter: Arc::new(filter),
			is_running: Arc::new(AtomicBool::new(false)),
			shutdown_signal: Arc::new(Mutex::new(None)),
		}
	}

	/// Serves the router on an already bound listener until shutdown is
	/// signalled.
	async fn run_server(
		listener: TcpListener,
		state: WebhookState,
		mut shutdown_rx: mpsc::Receiver<()>,
	) -> Result<(), String> {
		axum::serve(listener, router(state))
			.with_graceful_shutdown(async move {
				let _ = shutdown_rx.recv().await;
				tracing::info!("Shutting down webhook server");
			})
			.await
			.map_err(|e| format!("Server error: {}", e))
	}
}

/// Configuration schema for the webhook receiver.
pub struct WebhookDiscoverySchema;

impl ConfigSchema for WebhookDiscoverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), rewarder_types::ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"api_port",
				FieldType::Integer {
					min: Some(1),
					max: Some(65535),
				},
			)],
			vec![
				Field::new("api_host", FieldType::String),
				Field::new("auth_token", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl DiscoveryInterface for WebhookDiscovery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(WebhookDiscoverySchema)
	}

	async fn start_monitoring(
		&self,
		sender: mpsc::UnboundedSender<ChainTransactionEvent>,
	) -> Result<(), DiscoveryError> {
		if self.is_running.load(Ordering::SeqCst) {
			return Err(DiscoveryError::AlreadyMonitoring);
		}

		let addr = format!("{}:{}", self.api_host, self.api_port)
			.parse::<SocketAddr>()
			.map_err(|e| {
				DiscoveryError::Connection(format!(
					"Invalid address '{}:{}': {}",
					self.api_host, self.api_port, e
				))
			})?;

		// a bind failure is returned to the caller, not left to the server task
		let listener = TcpListener::bind(addr).await.map_err(|e| {
			DiscoveryError::Connection(format!("Failed to bind address {}: {}", addr, e))
		})?;
		let local_addr = listener.local_addr().unwrap_or(addr);
		tracing::info!(address = %local_addr, "Webhook discovery listening");

		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		*self.shutdown_signal.lock().await = Some(shutdown_tx);

		let state = WebhookState {
			sender,
			filter: self.filter.clone(),
			auth_token: self.auth_token.clone(),
		};
		self.is_running.store(true, Ordering::SeqCst);
		let is_running = self.is_running.clone();
		tokio::spawn(async move {
			if let Err(e) = Self::run_server(listener, state, shutdown_rx).await {
				tracing::error!("Webhook server error: {}", e);
			}
			is_running.store(false, Ordering::SeqCst);
		});

		tracing::info!(watched = ?self.filter.watched(), "Monitoring chain events");
		Ok(())
	}

	async fn stop_monitoring(&self) -> Result<(), DiscoveryError> {
		if !self.is_running.load(Ordering::SeqCst) {
			return Ok(());
		}

		if let Some(shutdown_tx) = self.shutdown_signal.lock().await.take() {
			let _ = shutdown_tx.send(()).await;
		}

		self.is_running.store(false, Ordering::SeqCst);
		Ok(())
	}
}

/// Factory for the `webhook` discovery implementation.
///
/// ```toml
/// api_host = "0.0.0.0"   # optional
/// api_port = 8082
/// auth_token = "secret"  # optional, required as `Authorization: Bearer <token>`
/// ```
pub fn create_discovery(
	config: &toml::Value,
	watched: &[String],
) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError> {
	WebhookDiscoverySchema
		.validate(config)
		.map_err(|e| DiscoveryError::ValidationError(e.to_string()))?;

	let api_host = config
		.get("api_host")
		.and_then(|v| v.as_str())
		.unwrap_or("0.0.0.0")
		.to_string();

	let api_port = config
		.get("api_port")
		.and_then(|v| v.as_integer())
		.and_then(|port| u16::try_from(port).ok())
		.ok_or_else(|| DiscoveryError::ValidationError("api_port is required".to_string()))?;

	let auth_token = config
		.get("auth_token")
		.and_then(|v| v.as_str())
		.filter(|token| !token.is_empty())
		.map(SecretString::from);

	if watched.is_empty() {
		return Err(DiscoveryError::ValidationError(
			"no addresses to watch".to_string(),
		));
	}

	Ok(Box::new(WebhookDiscovery::new(
		api_host,
		api_port,
		auth_token,
		ChainFilter::new(watched.to_vec()),
	)))
}

/// Registry for the webhook discovery implementation.
pub struct Registry;

impl rewarder_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "webhook";
	type Factory = crate::DiscoveryFactory;

	fn factory() -> Self::Factory {
		create_discovery
	}
}

impl crate::DiscoveryRegistry for Registry {}
