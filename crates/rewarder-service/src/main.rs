//! Main entry point for the rewarder service.
//!
//! Watches the wallet's payment address through the configured discovery
//! sources and pays a reward for every qualifying incoming payment.

use clap::Parser;
use rewarder_config::Config;
use rewarder_core::{RewarderBuilder, RewarderEngine, RewarderFactories};
use rewarder_order::ComposerFactory;
use std::collections::HashMap;
use std::path::PathBuf;

/// Command-line arguments for the rewarder service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Runs the rewarder until interrupted.
///
/// A fatal submission protocol error ends `run` with an error, which makes
/// the process exit with status 1.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started rewarder");

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.rewarder.id);

	let rewarder = build_rewarder(config).await?;
	rewarder.initialize().await?;

	if let Err(e) = rewarder.run().await {
		tracing::error!(error = %e, "Rewarder stopped with error");
		return Err(e.into());
	}

	tracing::info!("Stopped rewarder");
	Ok(())
}

/// Collects `(name, factory)` pairs into a lookup map.
fn factory_map<F>(implementations: Vec<(&'static str, F)>) -> HashMap<String, F> {
	implementations
		.into_iter()
		.map(|(name, factory)| {
			tracing::debug!("Registering implementation: {}", name);
			(name.to_string(), factory)
		})
		.collect()
}

/// Wires every implementation linked into this binary.
///
/// No transaction composer ships in-tree; builds that link one register it
/// under the name used in `[composer]`.
async fn build_rewarder(config: Config) -> Result<RewarderEngine, Box<dyn std::error::Error>> {
	let factories = RewarderFactories {
		account_factories: factory_map(rewarder_account::get_all_implementations()),
		discovery_factories: factory_map(rewarder_discovery::get_all_implementations()),
		composer_factories: HashMap::<String, ComposerFactory>::new(),
	};

	Ok(RewarderBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::tempdir;

	fn signing_key_hex() -> String {
		let mut cbor = vec![0x58, 0x80];
		cbor.extend([0x44; 128]);
		hex::encode(cbor)
	}

	#[tokio::test]
	async fn test_build_from_config_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("config.toml");
		fs::write(
			&path,
			format!(
				r#"
[rewarder]
id = "service-test"
network = "preview"

[reward]
reward_address = "addr_test1qreward"
min_lovelace = 10000000

[submit]
url = "http://127.0.0.1:8090/api/submit/tx"

[account]
primary = "local"
[account.implementations.local]
payment_address = "addr_test1qwallet"
signing_key_cbor = "{}"

[discovery]
[discovery.implementations.webhook]
api_host = "127.0.0.1"
api_port = 18082
"#,
				signing_key_hex()
			),
		)
		.unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		let engine = build_rewarder(config).await.unwrap();
		assert_eq!(engine.config().rewarder.network, "preview");
		assert_eq!(engine.payment_handler().monitored_address(), "addr_test1qwallet");
	}

	#[tokio::test]
	async fn test_unknown_account_implementation_fails() {
		let config: Config = r#"
[rewarder]
id = "service-test"

[reward]

[account]
primary = "hardware"
[account.implementations.hardware]

[discovery]
[discovery.implementations.webhook]
api_port = 18083
"#
		.parse()
		.unwrap();

		assert!(build_rewarder(config).await.is_err());
	}

	#[test]
	fn test_factory_map_keys() {
		let map = factory_map(rewarder_discovery::get_all_implementations());
		assert!(map.contains_key("webhook"));
	}
}
