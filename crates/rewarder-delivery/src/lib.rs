//! Reward transaction submission.
//!
//! One transport is selected at startup from the `[submit]` section: a
//! node-to-node peer, a local node socket, or an HTTP submit API. Without any
//! of them the first bootstrap peer of the configured network is used.

use async_trait::async_trait;
use rewarder_config::{RewarderConfig, SubmitConfig};
use rewarder_types::{network_by_name, RewardTransaction};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub mod protocol;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod node_to_client;
	pub mod node_to_node;
}

/// Errors that can occur during submission.
#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Failed to connect to {0}")]
	Connect(String),
	#[error("Unknown network: {0}")]
	UnknownNetwork(String),
	/// Handshake refusal, malformed or unexpected message.
	#[error("Protocol error: {0}")]
	Protocol(String),
	#[error("Failed to close connection: {0}")]
	Close(String),
	#[error("Network error: {0}")]
	Network(String),
	/// The HTTP submit API answered with something other than `202`.
	#[error("Submission rejected with status {status}: {body}")]
	Rejected { status: u16, body: String },
	#[error("Not supported: {0}")]
	NotSupported(String),
}

/// Channel for protocol failures that happen outside a caller's await point.
pub type FatalSender = mpsc::UnboundedSender<DeliveryError>;

/// Trait defining the interface for submission transports.
///
/// A transport carries one signed transaction to the network per call. It
/// does not wait for the transaction to be included in a block.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Short transport name for logs.
	fn name(&self) -> &'static str;

	/// Hands `tx` to the network. Returns once the peer has taken it.
	async fn submit(&self, tx: &RewardTransaction) -> Result<(), DeliveryError>;
}

/// Service that submits reward transactions through the selected transport.
///
/// Only one submission is in flight at a time; the node-to-node transport
/// opens a fresh connection per transaction and the peer must not see two
/// sessions interleave.
pub struct DeliveryService {
	transport: Box<dyn DeliveryInterface>,
	submit_lock: Mutex<()>,
}

impl DeliveryService {
	/// Creates a service over an already built transport.
	pub fn new(transport: Box<dyn DeliveryInterface>) -> Self {
		Self {
			transport,
			submit_lock: Mutex::new(()),
		}
	}

	/// Picks the transport: peer address, then socket path, then URL, then the
	/// network's first bootstrap peer.
	pub fn from_config(
		submit: &SubmitConfig,
		rewarder: &RewarderConfig,
		fatal: FatalSender,
	) -> Result<Self, DeliveryError> {
		use implementations::{http, node_to_client, node_to_node};

		let grace = Duration::from_millis(submit.grace_period_ms);
		let magic = || {
			rewarder
				.network_magic()
				.ok_or_else(|| DeliveryError::UnknownNetwork(rewarder.network.clone()))
		};

		let transport: Box<dyn DeliveryInterface> = if let Some(address) = &submit.address {
			Box::new(node_to_node::NodeToNodeTransport::new(address.clone(), magic()?, grace, fatal))
		} else if let Some(path) = &submit.socket_path {
			Box::new(node_to_client::NodeToClientTransport::new(path.clone()))
		} else if let Some(url) = &submit.url {
			Box::new(http::HttpTransport::new(
				url,
				Duration::from_secs(submit.http_timeout_seconds),
			)?)
		} else {
			let network = network_by_name(&rewarder.network)
				.ok_or_else(|| DeliveryError::UnknownNetwork(rewarder.network.clone()))?;
			let peer = network.bootstrap_peers.first().ok_or_else(|| {
				DeliveryError::UnknownNetwork(format!(
					"no bootstrap peers known for {}",
					rewarder.network
				))
			})?;
			Box::new(node_to_node::NodeToNodeTransport::new(peer.address(), magic()?, grace, fatal))
		};

		tracing::info!(component = "delivery", implementation = %transport.name(), "Loaded");
		Ok(Self::new(transport))
	}

	/// Name of the selected transport.
	pub fn transport_name(&self) -> &'static str {
		self.transport.name()
	}

	/// Submits `tx`; concurrent callers wait for the one in flight.
	pub async fn submit(&self, tx: &RewardTransaction) -> Result<(), DeliveryError> {
		let _guard = self.submit_lock.lock().await;
		tracing::debug!(tx_id = %tx.id, transport = self.transport.name(), size = tx.size(), "Submitting");
		self.transport.submit(tx).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rewarder_types::{Era, TransactionId};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	fn rewarder(network: &str) -> RewarderConfig {
		RewarderConfig {
			id: "test".into(),
			network: network.into(),
			network_magic: None,
			max_concurrent_events: 100,
		}
	}

	fn select(submit: SubmitConfig, network: &str) -> Result<&'static str, DeliveryError> {
		let (fatal, _) = mpsc::unbounded_channel();
		DeliveryService::from_config(&submit, &rewarder(network), fatal).map(|s| s.transport_name())
	}

	#[test]
	fn test_transport_precedence() {
		let all = SubmitConfig {
			address: Some("relay.example:3001".into()),
			socket_path: Some("/tmp/node.socket".into()),
			url: Some("http://localhost:8090/api/submit/tx".into()),
			..SubmitConfig::default()
		};
		assert_eq!(select(all.clone(), "preprod").unwrap(), "node-to-node");

		let socket_and_url = SubmitConfig {
			address: None,
			..all.clone()
		};
		assert_eq!(select(socket_and_url.clone(), "preprod").unwrap(), "node-to-client");

		let url = SubmitConfig {
			socket_path: None,
			..socket_and_url
		};
		assert_eq!(select(url, "preprod").unwrap(), "http");

		assert_eq!(select(SubmitConfig::default(), "preview").unwrap(), "node-to-node");
	}

	#[test]
	fn test_fallback_needs_known_network_with_peers() {
		assert!(matches!(
			select(SubmitConfig::default(), "nonesuch"),
			Err(DeliveryError::UnknownNetwork(_))
		));
		assert!(matches!(
			select(SubmitConfig::default(), "devnet"),
			Err(DeliveryError::UnknownNetwork(_))
		));
	}

	struct Slow {
		in_flight: Arc<AtomicUsize>,
		max_seen: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl DeliveryInterface for Slow {
		fn name(&self) -> &'static str {
			"slow"
		}

		async fn submit(&self, _tx: &RewardTransaction) -> Result<(), DeliveryError> {
			let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_seen.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_submissions_are_serialized() {
		let max_seen = Arc::new(AtomicUsize::new(0));
		let service = Arc::new(DeliveryService::new(Box::new(Slow {
			in_flight: Arc::new(AtomicUsize::new(0)),
			max_seen: max_seen.clone(),
		})));
		let tx = RewardTransaction {
			bytes: vec![0x80],
			id: TransactionId([1; 32]),
			era: Era::Conway,
		};

		let handles: Vec<_> = (0..4)
			.map(|_| {
				let service = service.clone();
				let tx = tx.clone();
				tokio::spawn(async move { service.submit(&tx).await })
			})
			.collect();
		for handle in handles {
			handle.await.unwrap().unwrap();
		}
		assert_eq!(max_seen.load(Ordering::SeqCst), 1);
	}
}
