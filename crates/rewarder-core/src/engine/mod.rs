//! Event loop of the rewarder.
//!
//! Receives chain events from discovery and hands each one to the payment
//! handler on its own task. Protocol failures reported by the submission
//! client arrive on a separate channel and stop the engine.

pub mod lifecycle;

use crate::handlers::{DispatchOutcome, PaymentHandler};
use rewarder_config::Config;
use rewarder_delivery::{DeliveryError, DeliveryService};
use rewarder_discovery::DiscoveryService;
use rewarder_types::{truncate_id, ChainTransactionEvent, TransactionId};
use rewarder_utxo::UtxoService;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};

/// Errors that can stop the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	/// A discovery source failed to start or stop.
	#[error("Service error: {0}")]
	Service(String),
	/// The submission protocol entered an unknown state; the process must stop.
	#[error("Fatal protocol error: {0}")]
	Fatal(String),
}

/// Number of recently dispatched transaction hashes remembered for duplicate
/// suppression.
const RECENT_TX_CAPACITY: usize = 4096;

/// Bounded set of recently seen transaction hashes. The oldest hash is
/// forgotten once capacity is reached.
#[derive(Debug)]
pub(crate) struct RecentTransactions {
	capacity: usize,
	order: VecDeque<TransactionId>,
	members: HashSet<TransactionId>,
}

impl RecentTransactions {
	pub(crate) fn new(capacity: usize) -> Self {
		Self {
			capacity,
			order: VecDeque::with_capacity(capacity),
			members: HashSet::with_capacity(capacity),
		}
	}

	/// Records `hash`. Returns `false` if it is already remembered.
	pub(crate) fn insert(&mut self, hash: TransactionId) -> bool {
		if !self.members.insert(hash) {
			return false;
		}
		self.order.push_back(hash);
		if self.order.len() > self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		true
	}
}

/// Runs the rewarder: owns the services built by
/// [`RewarderBuilder`](crate::RewarderBuilder) and dispatches every chain
/// event discovery delivers to the [`PaymentHandler`].
#[derive(Clone)]
pub struct RewarderEngine {
	pub(crate) config: Config,
	pub(crate) utxo: Arc<UtxoService>,
	pub(crate) delivery: Arc<DeliveryService>,
	pub(crate) discovery: Arc<DiscoveryService>,
	pub(crate) payment_handler: Arc<PaymentHandler>,
	fatal_rx: Arc<Mutex<mpsc::UnboundedReceiver<DeliveryError>>>,
	stop: Arc<Notify>,
}

impl RewarderEngine {
	/// Creates an engine from assembled services.
	///
	/// # Arguments
	///
	/// * `fatal_rx` - Receives protocol errors from the submission client; the
	///   first one ends [`run`](Self::run).
	pub fn new(
		config: Config,
		utxo: Arc<UtxoService>,
		delivery: Arc<DeliveryService>,
		discovery: Arc<DiscoveryService>,
		payment_handler: Arc<PaymentHandler>,
		fatal_rx: mpsc::UnboundedReceiver<DeliveryError>,
	) -> Self {
		Self {
			config,
			utxo,
			delivery,
			discovery,
			payment_handler,
			fatal_rx: Arc::new(Mutex::new(fatal_rx)),
			stop: Arc::new(Notify::new()),
		}
	}

	/// Runs until Ctrl-C, [`stop`](Self::stop) or a fatal protocol error.
	pub async fn run(&self) -> Result<(), EngineError> {
		let (event_tx, mut event_rx) = mpsc::unbounded_channel();
		self.discovery
			.start_all(event_tx)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;

		let mut fatal_rx = self.fatal_rx.lock().await;
		let semaphore = Arc::new(Semaphore::new(self.config.rewarder.max_concurrent_events));
		// the follower may replay transactions after a reconnect
		let mut seen = RecentTransactions::new(RECENT_TX_CAPACITY);

		let result = loop {
			tokio::select! {
				Some(event) = event_rx.recv() => {
					if !seen.insert(event.hash) {
						tracing::debug!(tx_hash = %event.hash, "Ignoring already handled transaction");
						continue;
					}
					self.spawn_handler(&semaphore, event).await;
				}

				Some(error) = fatal_rx.recv() => {
					tracing::error!(error = %error, "Submission protocol failed, stopping");
					break Err(EngineError::Fatal(error.to_string()));
				}

				_ = self.stop.notified() => {
					break Ok(());
				}

				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received shutdown signal");
					break Ok(());
				}
			}
		};

		if let Err(e) = self.shutdown().await {
			tracing::warn!(error = %e, "Failed to stop discovery");
		}

		result
	}

	/// Asks a running [`run`](Self::run) to return.
	pub fn stop(&self) {
		self.stop.notify_one();
	}

	/// Returns the configuration the engine was built with.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the handler that decides and pays rewards.
	pub fn payment_handler(&self) -> &Arc<PaymentHandler> {
		&self.payment_handler
	}

	/// Handles `event` on its own task once a concurrency permit is free.
	async fn spawn_handler(&self, semaphore: &Arc<Semaphore>, event: ChainTransactionEvent) {
		let handler = self.payment_handler.clone();
		match semaphore.clone().acquire_owned().await {
			Ok(permit) => {
				tokio::spawn(async move {
					let _permit = permit;
					let hash = event.hash;
					match handler.handle(event).await {
						Ok(DispatchOutcome::Rewarded(tx_id)) => {
							tracing::debug!(
								tx_hash = %truncate_id(&hash.to_hex()),
								reward_tx = %tx_id,
								"Payment rewarded"
							);
						},
						Ok(DispatchOutcome::Skipped(reason)) => {
							tracing::debug!(tx_hash = %truncate_id(&hash.to_hex()), reason = %reason, "Payment skipped");
						},
						Err(e) => {
							tracing::warn!(tx_hash = %hash, error = %e, "Failed to reward payment");
						},
					}
				});
			},
			Err(e) => {
				tracing::error!("Failed to acquire semaphore permit: {}", e);
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rewarder_account::implementations::local::LocalWallet;
	use rewarder_account::{keys, AccountService};
	use rewarder_config::RewardConfig;
	use rewarder_delivery::DeliveryInterface;
	use rewarder_discovery::{DiscoveryError, DiscoveryInterface};
	use rewarder_order::RewardBuilder;
	use rewarder_types::{
		ConfigSchema, EventContext, InputRef, RewardTransaction, TxOutput, Utxo, ValidationError,
	};
	use rewarder_utxo::{UtxoError, UtxoInterface};
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::time::Duration;

	const WALLET: &str = "addr_test1qwallet";

	struct CountingLookups(Arc<AtomicUsize>);

	#[async_trait]
	impl UtxoInterface for CountingLookups {
		fn name(&self) -> &'static str {
			"counting"
		}

		async fn utxos_by_address(&self, _address: &str) -> Result<Vec<Utxo>, UtxoError> {
			Ok(vec![])
		}

		async fn utxo_by_input(&self, _input: &InputRef) -> Result<Option<Utxo>, UtxoError> {
			self.0.fetch_add(1, Ordering::SeqCst);
			Ok(None)
		}
	}

	struct NoopTransport;

	#[async_trait]
	impl DeliveryInterface for NoopTransport {
		fn name(&self) -> &'static str {
			"noop"
		}

		async fn submit(&self, _tx: &RewardTransaction) -> Result<(), DeliveryError> {
			Ok(())
		}
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
			Ok(())
		}
	}

	/// Emits `events` as soon as monitoring starts.
	struct ReplayDiscovery {
		events: Vec<ChainTransactionEvent>,
		stopped: Arc<AtomicBool>,
		fail_stop: bool,
	}

	#[async_trait]
	impl DiscoveryInterface for ReplayDiscovery {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn start_monitoring(
			&self,
			sender: mpsc::UnboundedSender<ChainTransactionEvent>,
		) -> Result<(), DiscoveryError> {
			for event in &self.events {
				sender
					.send(event.clone())
					.map_err(|e| DiscoveryError::Connection(e.to_string()))?;
			}
			Ok(())
		}

		async fn stop_monitoring(&self) -> Result<(), DiscoveryError> {
			self.stopped.store(true, Ordering::SeqCst);
			if self.fail_stop {
				return Err(DiscoveryError::Connection("listener already gone".into()));
			}
			Ok(())
		}
	}

	fn config() -> Config {
		r#"
[rewarder]
id = "engine-test"
max_concurrent_events = 2

[reward]

[account]
primary = "local"
[account.implementations.local]
payment_address = "addr_test1qwallet"

[discovery]
[discovery.implementations.replay]
"#
		.parse()
		.unwrap()
	}

	fn event(byte: u8) -> ChainTransactionEvent {
		ChainTransactionEvent {
			hash: TransactionId([byte; 32]),
			inputs: vec![InputRef::new(TransactionId([byte; 32]), 0)],
			outputs: vec![TxOutput {
				address: WALLET.into(),
				amount: 80_000_000,
				assets: Default::default(),
			}],
			context: EventContext::default(),
		}
	}

	struct Fixture {
		engine: RewarderEngine,
		lookups: Arc<AtomicUsize>,
		stopped: Arc<AtomicBool>,
		fatal: mpsc::UnboundedSender<DeliveryError>,
	}

	fn fixture(events: Vec<ChainTransactionEvent>) -> Fixture {
		fixture_with(events, false)
	}

	fn fixture_with(events: Vec<ChainTransactionEvent>, fail_stop: bool) -> Fixture {
		let config = config();
		let lookups = Arc::new(AtomicUsize::new(0));
		let utxo = Arc::new(UtxoService::new(Some(Box::new(CountingLookups(lookups.clone())))));

		let mut signing = vec![0x58, 0x80];
		signing.extend([0x22; 128]);
		let keys = keys::payment_keys(&signing, None).unwrap();
		let account = Arc::new(AccountService::new(Box::new(LocalWallet::new(WALLET.into(), keys))));

		let reward = RewardConfig {
			reward_address: None,
			..config.reward.clone()
		};
		let builder = Arc::new(RewardBuilder::new(utxo.clone(), account, None, reward.clone()));
		let delivery = Arc::new(DeliveryService::new(Box::new(NoopTransport)));
		let handler = Arc::new(PaymentHandler::new(
			utxo.clone(),
			builder,
			delivery.clone(),
			WALLET.into(),
			reward,
		));

		let stopped = Arc::new(AtomicBool::new(false));
		let discovery = Arc::new(DiscoveryService::new(vec![Box::new(ReplayDiscovery {
			events,
			stopped: stopped.clone(),
			fail_stop,
		})]));

		let (fatal, fatal_rx) = mpsc::unbounded_channel();
		Fixture {
			engine: RewarderEngine::new(config, utxo, delivery, discovery, handler, fatal_rx),
			lookups,
			stopped,
			fatal,
		}
	}

	#[tokio::test]
	async fn test_events_handled_once_then_stop() {
		let fixture = fixture(vec![event(1), event(2), event(1)]);
		let engine = fixture.engine.clone();
		let running = tokio::spawn(async move { engine.run().await });

		for _ in 0..100 {
			if fixture.lookups.load(Ordering::SeqCst) >= 2 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(fixture.lookups.load(Ordering::SeqCst), 2);

		fixture.engine.stop();
		running.await.unwrap().unwrap();
		assert!(fixture.stopped.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn test_fatal_protocol_error_stops_engine() {
		let fixture = fixture(vec![]);
		let engine = fixture.engine.clone();
		let running = tokio::spawn(async move { engine.run().await });

		fixture
			.fatal
			.send(DeliveryError::Protocol("unexpected message on tx-submission".into()))
			.unwrap();

		let result = tokio::time::timeout(Duration::from_secs(5), running)
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(result, Err(EngineError::Fatal(msg)) if msg.contains("tx-submission")));
		assert!(fixture.stopped.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn test_fatal_error_survives_failed_discovery_stop() {
		let fixture = fixture_with(vec![], true);
		let engine = fixture.engine.clone();
		let running = tokio::spawn(async move { engine.run().await });

		fixture
			.fatal
			.send(DeliveryError::Protocol("peer sent MsgDone mid-exchange".into()))
			.unwrap();

		let result = tokio::time::timeout(Duration::from_secs(5), running)
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(result, Err(EngineError::Fatal(msg)) if msg.contains("MsgDone")));
		assert!(fixture.stopped.load(Ordering::SeqCst));
	}

	#[test]
	fn test_recent_transactions_forget_oldest() {
		let mut recent = RecentTransactions::new(2);
		assert!(recent.insert(TransactionId([1; 32])));
		assert!(!recent.insert(TransactionId([1; 32])));
		assert!(recent.insert(TransactionId([2; 32])));
		assert!(recent.insert(TransactionId([3; 32])));

		// [1] was evicted by [3]
		assert!(recent.insert(TransactionId([1; 32])));
		assert!(!recent.insert(TransactionId([3; 32])));
	}
}
