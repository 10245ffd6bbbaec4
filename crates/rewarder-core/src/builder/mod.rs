//! Assembles a [`RewarderEngine`] from configuration.
//!
//! Account, discovery and composer implementations are pluggable and picked
//! by name from factory maps. The UTXO resolver and the submission transport
//! are selected directly from their configuration sections.

use crate::engine::RewarderEngine;
use crate::handlers::PaymentHandler;
use rewarder_account::{AccountError, AccountInterface, AccountService};
use rewarder_config::Config;
use rewarder_delivery::DeliveryService;
use rewarder_discovery::{DiscoveryError, DiscoveryInterface, DiscoveryService};
use rewarder_order::{ComposeError, RewardBuilder, TransactionComposer};
use rewarder_utxo::UtxoService;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur while assembling the engine.
#[derive(Debug, Error)]
pub enum BuilderError {
	/// A component rejected its configuration or failed to start.
	#[error("Configuration error: {0}")]
	Config(String),
	/// The configuration names an implementation this binary does not link.
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions by implementation name.
pub struct RewarderFactories<AF, DIF, CF> {
	pub account_factories: HashMap<String, AF>,
	pub discovery_factories: HashMap<String, DIF>,
	pub composer_factories: HashMap<String, CF>,
}

/// Builder for [`RewarderEngine`].
pub struct RewarderBuilder {
	config: Config,
}

impl RewarderBuilder {
	/// Creates a builder for a validated configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine.
	///
	/// Loads the primary account and reads the wallet address, then creates
	/// the UTXO resolver, the composer, the submission client and every
	/// configured discovery source. Discovery watches the wallet address.
	///
	/// # Arguments
	///
	/// * `factories` - Account, discovery and composer factories by
	///   implementation name
	///
	/// # Errors
	///
	/// Returns [`BuilderError::MissingComponent`] when the configuration
	/// selects an account or composer with no factory, and
	/// [`BuilderError::Config`] when a component cannot be created or no
	/// discovery source is available.
	pub async fn build<AF, DIF, CF>(
		self,
		factories: RewarderFactories<AF, DIF, CF>,
	) -> Result<RewarderEngine, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		DIF: Fn(&toml::Value, &[String]) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError>,
		CF: Fn(&toml::Value) -> Result<Box<dyn TransactionComposer>, ComposeError>,
	{
		// Account
		let primary_account = self.config.account.primary.as_str();
		let account_config = self
			.config
			.account
			.implementations
			.get(primary_account)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary account '{}' has no configuration",
					primary_account
				))
			})?;
		let factory = factories
			.account_factories
			.get(primary_account)
			.ok_or_else(|| BuilderError::MissingComponent(format!("account '{}'", primary_account)))?;
		let implementation = factory(account_config).map_err(|e| {
			tracing::error!(
				component = "account",
				implementation = %primary_account,
				error = %e,
				"Failed to create account implementation"
			);
			BuilderError::Config(format!(
				"Failed to create account implementation '{}': {}",
				primary_account, e
			))
		})?;
		tracing::info!(component = "account", implementation = %primary_account, "Loaded");
		let account = Arc::new(AccountService::new(implementation));

		let wallet_address = account.get_address().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to get wallet address");
			BuilderError::Config(format!("Failed to get wallet address: {}", e))
		})?;

		// UTXO resolver
		let utxo = Arc::new(
			UtxoService::from_config(&self.config.utxo, &self.config.rewarder.network)
				.map_err(|e| BuilderError::Config(format!("Failed to create UTXO resolver: {}", e)))?,
		);

		// Composer
		let composer: Option<Arc<dyn TransactionComposer>> = match &self.config.composer.primary {
			Some(name) => match (
				factories.composer_factories.get(name),
				self.config.composer.implementations.get(name),
			) {
				(Some(factory), Some(config)) => {
					let implementation = factory(config).map_err(|e| {
						tracing::error!(
							component = "composer",
							implementation = %name,
							error = %e,
							"Failed to create composer implementation"
						);
						BuilderError::Config(format!(
							"Failed to create composer implementation '{}': {}",
							name, e
						))
					})?;
					tracing::info!(component = "composer", implementation = %name, "Loaded");
					Some(Arc::from(implementation))
				},
				(None, _) => {
					tracing::error!(
						component = "composer",
						implementation = %name,
						"Composer is not linked into this build"
					);
					return Err(BuilderError::MissingComponent(format!("composer '{}'", name)));
				},
				(Some(_), None) => {
					return Err(BuilderError::Config(format!(
						"Primary composer '{}' has no configuration",
						name
					)));
				},
			},
			None => {
				tracing::warn!("No composer configured - rewards will not be built");
				None
			},
		};

		// Delivery
		let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
		let delivery = Arc::new(
			DeliveryService::from_config(&self.config.submit, &self.config.rewarder, fatal_tx)
				.map_err(|e| BuilderError::Config(format!("Failed to create submission client: {}", e)))?,
		);

		// Discovery
		let watched = vec![wallet_address.clone()];
		let mut discovery_implementations = Vec::new();
		for (name, config) in &self.config.discovery.implementations {
			let Some(factory) = factories.discovery_factories.get(name) else {
				tracing::warn!(component = "discovery", implementation = %name, "Unknown implementation, skipping");
				continue;
			};
			match factory(config, &watched) {
				Ok(implementation) => {
					discovery_implementations.push(implementation);
					tracing::info!(component = "discovery", implementation = %name, "Loaded");
				},
				Err(e) => {
					tracing::error!(
						component = "discovery",
						implementation = %name,
						error = %e,
						"Failed to create discovery implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create discovery implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if discovery_implementations.is_empty() {
			return Err(BuilderError::Config(
				"No discovery implementations available".to_string(),
			));
		}
		let discovery = Arc::new(DiscoveryService::new(discovery_implementations));

		let builder = Arc::new(RewardBuilder::new(
			utxo.clone(),
			account,
			composer,
			self.config.reward.clone(),
		));
		let payment_handler = Arc::new(PaymentHandler::new(
			utxo.clone(),
			builder,
			delivery.clone(),
			wallet_address,
			self.config.reward.clone(),
		));

		Ok(RewarderEngine::new(
			self.config,
			utxo,
			delivery,
			discovery,
			payment_handler,
			fatal_rx,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rewarder_account::implementations::local;
	use rewarder_order::ComposerFactory;
	use rewarder_types::{ChainTransactionEvent, ConfigSchema, ValidationError};
	use std::sync::Mutex;

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
			Ok(())
		}
	}

	struct IdleDiscovery;

	#[async_trait]
	impl DiscoveryInterface for IdleDiscovery {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn start_monitoring(
			&self,
			_sender: mpsc::UnboundedSender<ChainTransactionEvent>,
		) -> Result<(), DiscoveryError> {
			Ok(())
		}

		async fn stop_monitoring(&self) -> Result<(), DiscoveryError> {
			Ok(())
		}
	}

	fn config_with_composer(signing_key: &str, composer: &str) -> Config {
		format!(
			r#"
[rewarder]
id = "builder-test"

[reward]
reward_address = "addr_test1qreward"

[submit]
url = "http://127.0.0.1:8090/api/submit/tx"

[account]
primary = "local"
[account.implementations.local]
payment_address = "addr_test1qwallet"
signing_key_cbor = "{}"

[discovery]
[discovery.implementations.idle]
{}"#,
			signing_key, composer
		)
		.parse()
		.unwrap()
	}

	fn config(signing_key: &str) -> Config {
		config_with_composer(signing_key, "")
	}

	fn signing_key() -> String {
		let mut cbor = vec![0x58, 0x80];
		cbor.extend([0x33; 128]);
		hex::encode(cbor)
	}

	type DiscoveryFn = Box<
		dyn Fn(&toml::Value, &[String]) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError>,
	>;

	fn factories(
		discovery: HashMap<String, DiscoveryFn>,
	) -> RewarderFactories<rewarder_account::AccountFactory, DiscoveryFn, ComposerFactory> {
		RewarderFactories {
			account_factories: HashMap::from([("local".to_string(), local::create_account as rewarder_account::AccountFactory)]),
			discovery_factories: discovery,
			composer_factories: HashMap::new(),
		}
	}

	#[tokio::test]
	async fn test_build_watches_wallet_address() {
		let watched = Arc::new(Mutex::new(Vec::new()));
		let captured = watched.clone();
		let discovery: DiscoveryFn = Box::new(move |_config, addresses| {
			captured.lock().unwrap().extend_from_slice(addresses);
			Ok(Box::new(IdleDiscovery))
		});

		let engine = RewarderBuilder::new(config(&signing_key()))
			.build(factories(HashMap::from([("idle".to_string(), discovery)])))
			.await
			.unwrap();

		assert_eq!(engine.payment_handler().monitored_address(), "addr_test1qwallet");
		assert_eq!(*watched.lock().unwrap(), vec!["addr_test1qwallet".to_string()]);
		assert_eq!(engine.delivery.transport_name(), "http");
		assert!(engine.utxo.backend_name().is_none());
	}

	#[tokio::test]
	async fn test_bad_key_fails_build() {
		let discovery: DiscoveryFn = Box::new(|_, _| Ok(Box::new(IdleDiscovery)));
		let result = RewarderBuilder::new(config("5820abcd"))
			.build(factories(HashMap::from([("idle".to_string(), discovery)])))
			.await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("local")));
	}

	#[tokio::test]
	async fn test_discovery_required() {
		let result = RewarderBuilder::new(config(&signing_key()))
			.build(factories(HashMap::new()))
			.await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("No discovery")));

		let failing: DiscoveryFn =
			Box::new(|_, _| Err(DiscoveryError::ValidationError("api_port is required".into())));
		let result = RewarderBuilder::new(config(&signing_key()))
			.build(factories(HashMap::from([("idle".to_string(), failing)])))
			.await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("api_port")));
	}

	#[tokio::test]
	async fn test_unlinked_composer_fails_build() {
		let discovery: DiscoveryFn = Box::new(|_, _| Ok(Box::new(IdleDiscovery)));
		let config = config_with_composer(
			&signing_key(),
			"\n[composer]\nprimary = \"apollo\"\n[composer.implementations.apollo]\n",
		);
		let result = RewarderBuilder::new(config)
			.build(factories(HashMap::from([("idle".to_string(), discovery)])))
			.await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(msg)) if msg.contains("apollo")));
	}
}
