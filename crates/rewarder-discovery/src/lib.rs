//! Chain event intake for the rewarder.
//!
//! A chain follower runs outside this process and pushes decoded transaction
//! events to one of the discovery implementations. Each implementation
//! applies the [`ChainFilter`] and forwards the surviving events to the
//! engine over an unbounded channel.

use async_trait::async_trait;
use rewarder_types::{ChainTransactionEvent, ConfigSchema, ImplementationRegistry};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod filter;

/// Re-export implementations
pub mod implementations {
	pub mod webhook;
}

pub use filter::ChainFilter;

/// Errors that can occur during event discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	/// The event source could not be bound or reached.
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Already monitoring")]
	AlreadyMonitoring,
	/// An incoming event could not be decoded.
	#[error("Parse error: {0}")]
	ParseError(String),
	#[error("Validation error: {0}")]
	ValidationError(String),
}

/// Trait defining the interface for chain event sources.
///
/// Implementations only forward transaction events that pay a watched
/// address; everything else is dropped before it reaches the engine.
#[async_trait]
pub trait DiscoveryInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Starts delivering matching events through `sender` until
	/// [`stop_monitoring`](Self::stop_monitoring) is called.
	async fn start_monitoring(
		&self,
		sender: mpsc::UnboundedSender<ChainTransactionEvent>,
	) -> Result<(), DiscoveryError>;

	/// Stops delivering events. Stopping an idle source is a no-op.
	async fn stop_monitoring(&self) -> Result<(), DiscoveryError>;
}

/// Factory signature. The second argument lists the watched addresses.
pub type DiscoveryFactory =
	fn(&toml::Value, &[String]) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError>;

/// Registry trait for discovery implementations.
pub trait DiscoveryRegistry: ImplementationRegistry<Factory = DiscoveryFactory> {}

/// Returns every discovery implementation linked into this crate as
/// `(name, factory)` pairs.
pub fn get_all_implementations() -> Vec<(&'static str, DiscoveryFactory)> {
	use implementations::webhook;

	vec![(webhook::Registry::NAME, webhook::Registry::factory())]
}

/// Runs every configured discovery implementation into one channel.
pub struct DiscoveryService {
	implementations: Vec<Box<dyn DiscoveryInterface>>,
}

impl DiscoveryService {
	/// Creates a service over already constructed implementations.
	pub fn new(implementations: Vec<Box<dyn DiscoveryInterface>>) -> Self {
		Self { implementations }
	}

	/// Fails on the first implementation that cannot start.
	pub async fn start_all(
		&self,
		sender: mpsc::UnboundedSender<ChainTransactionEvent>,
	) -> Result<(), DiscoveryError> {
		for implementation in &self.implementations {
			implementation.start_monitoring(sender.clone()).await?;
		}
		Ok(())
	}

	/// Stops every implementation, failing on the first error.
	pub async fn stop_all(&self) -> Result<(), DiscoveryError> {
		for implementation in &self.implementations {
			implementation.stop_monitoring().await?;
		}
		Ok(())
	}
}
