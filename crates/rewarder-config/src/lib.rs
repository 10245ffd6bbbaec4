//! Configuration for the rewarder.
//!
//! Configuration is TOML. String values may reference environment variables
//! with `${VAR}` or `${VAR:-default}`; an empty string for an optional value
//! means "not set", which keeps `${VAR:-}` usable for optional settings.
//!
//! ## Modular Configuration Support
//!
//! A file may pull in others with `include = ["a.toml", "b.toml"]`. Each
//! top-level section may only be defined once across all files.

mod loader;

use regex::Regex;
use rewarder_types::{network_by_name, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub rewarder: RewarderConfig,
	pub reward: RewardConfig,
	#[serde(default)]
	pub utxo: UtxoConfig,
	#[serde(default)]
	pub submit: SubmitConfig,
	pub account: AccountConfig,
	pub discovery: DiscoveryConfig,
	#[serde(default)]
	pub composer: ComposerConfig,
}

/// Process identity and network selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewarderConfig {
	pub id: String,
	/// Network name, e.g. `preprod` or `mainnet`.
	#[serde(default = "default_network")]
	pub network: String,
	/// Protocol magic override for networks missing from the built-in table.
	#[serde(default)]
	pub network_magic: Option<u32>,
	/// Upper bound on events handled concurrently.
	#[serde(default = "default_max_concurrent_events")]
	pub max_concurrent_events: usize,
}

fn default_network() -> String {
	"preprod".to_string()
}

fn default_max_concurrent_events() -> usize {
	100
}

impl RewarderConfig {
	/// Magic for the handshake: the explicit override, else the known network's.
	pub fn network_magic(&self) -> Option<u32> {
		self.network_magic
			.or_else(|| network_by_name(&self.network).map(|network| network.magic))
	}
}

/// Reward policy, read-only after start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RewardConfig {
	/// Minimum total (in lovelace) paid to the wallet for a transaction to qualify.
	#[serde(default = "default_min_lovelace")]
	pub min_lovelace: u64,
	/// Lovelace paid to the reward address per qualifying transaction.
	#[serde(default = "default_reward_amount")]
	pub reward_amount: u64,
	/// Destination of rewards. Unset disables rewarding.
	#[serde(default, deserialize_with = "empty_as_none")]
	pub reward_address: Option<String>,
	/// When set, only transactions whose provenance matches exactly qualify.
	#[serde(default, deserialize_with = "empty_as_none")]
	pub source_address: Option<String>,
}

fn default_min_lovelace() -> u64 {
	50_000_000
}

fn default_reward_amount() -> u64 {
	5_000_000
}

impl Default for RewardConfig {
	fn default() -> Self {
		Self {
			min_lovelace: default_min_lovelace(),
			reward_amount: default_reward_amount(),
			reward_address: None,
			source_address: None,
		}
	}
}

/// Indexer backends for UTXO lookups. Blockfrost wins when both are set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UtxoConfig {
	#[serde(default, deserialize_with = "empty_secret_as_none")]
	pub blockfrost_api_key: Option<SecretString>,
	/// Overrides the Blockfrost API root derived from the network.
	#[serde(default, deserialize_with = "empty_as_none")]
	pub blockfrost_url: Option<String>,
	#[serde(default, deserialize_with = "empty_as_none")]
	pub kupo_url: Option<String>,
	#[serde(default = "default_utxo_timeout")]
	pub timeout_seconds: u64,
}

fn default_utxo_timeout() -> u64 {
	30
}

impl Default for UtxoConfig {
	fn default() -> Self {
		Self {
			blockfrost_api_key: None,
			blockfrost_url: None,
			kupo_url: None,
			timeout_seconds: default_utxo_timeout(),
		}
	}
}

/// Submission target. First set wins: `address`, `socket_path`, `url`.
/// With none set the network's first bootstrap relay is used.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitConfig {
	/// `host:port` of a node speaking node-to-node.
	#[serde(default, deserialize_with = "empty_as_none")]
	pub address: Option<String>,
	/// Local node socket (node-to-client).
	#[serde(default, deserialize_with = "empty_as_none")]
	pub socket_path: Option<String>,
	/// HTTP submit API endpoint.
	#[serde(default, deserialize_with = "empty_as_none")]
	pub url: Option<String>,
	/// Wait after the peer acknowledged the transaction, before closing.
	#[serde(default = "default_grace_period_ms")]
	pub grace_period_ms: u64,
	#[serde(default = "default_http_timeout")]
	pub http_timeout_seconds: u64,
}

fn default_grace_period_ms() -> u64 {
	2_000
}

fn default_http_timeout() -> u64 {
	300
}

impl Default for SubmitConfig {
	fn default() -> Self {
		Self {
			address: None,
			socket_path: None,
			url: None,
			grace_period_ms: default_grace_period_ms(),
			http_timeout_seconds: default_http_timeout(),
		}
	}
}

/// Account selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Name of the implementation that owns the wallet.
	pub primary: String,
	/// Implementation-specific tables, validated by each implementation.
	pub implementations: HashMap<String, toml::Value>,
}

/// Discovery sources. Every listed implementation is started.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
	pub implementations: HashMap<String, toml::Value>,
}

/// Transaction composer selection. Empty means rewards cannot be built.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComposerConfig {
	#[serde(default, deserialize_with = "empty_as_none")]
	pub primary: Option<String>,
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<String>::deserialize(deserializer)?;
	Ok(value.filter(|s| !s.trim().is_empty()))
}

fn empty_secret_as_none<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<SecretString>::deserialize(deserializer)?;
	Ok(value.filter(|s| !s.is_empty()))
}

/// Replaces `${VAR}` and `${VAR:-default}` with values from the environment.
///
/// Input is capped at 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut resolved = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(name.as_str()) {
			Ok(value) => value,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						name.as_str()
					)))
				},
			},
		};
		resolved.push_str(&input[last..whole.start()]);
		resolved.push_str(&value);
		last = whole.end();
	}
	resolved.push_str(&input[last..]);

	Ok(resolved)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path = Path::new(path);
		let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path.file_name().ok_or_else(|| {
			ConfigError::Validation(format!("Invalid path: {}", path.display()))
		})?;

		loader::ConfigLoader::new(base_dir).load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.rewarder.id.is_empty() {
			return Err(ConfigError::Validation("Rewarder ID cannot be empty".into()));
		}
		if self.rewarder.network.is_empty() {
			return Err(ConfigError::Validation("Network cannot be empty".into()));
		}
		if self.rewarder.max_concurrent_events == 0 {
			return Err(ConfigError::Validation(
				"max_concurrent_events must be at least 1".into(),
			));
		}

		if self.reward.reward_amount == 0 {
			return Err(ConfigError::Validation(
				"reward_amount must be greater than 0".into(),
			));
		}

		if self.utxo.timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"utxo timeout_seconds must be greater than 0".into(),
			));
		}
		for (name, url) in [
			("blockfrost_url", &self.utxo.blockfrost_url),
			("kupo_url", &self.utxo.kupo_url),
			("submit url", &self.submit.url),
		] {
			if let Some(url) = url {
				if !url.starts_with("http://") && !url.starts_with("https://") {
					return Err(ConfigError::Validation(format!(
						"{} must start with http:// or https://",
						name
					)));
				}
			}
		}

		if self.submit.http_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"submit http_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.submit.grace_period_ms > 60_000 {
			return Err(ConfigError::Validation(
				"submit grace_period_ms cannot exceed 60000".into(),
			));
		}

		if self.account.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one account implementation must be configured".into(),
			));
		}
		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		if self.discovery.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one discovery implementation required".into(),
			));
		}

		if let Some(primary) = &self.composer.primary {
			if !self.composer.implementations.contains_key(primary) {
				return Err(ConfigError::Validation(format!(
					"Primary composer '{}' not found in implementations",
					primary
				)));
			}
		}

		if self.reward.reward_address.is_none() {
			tracing::warn!("No reward address configured; payments will be observed but never rewarded");
		}

		Ok(())
	}
}

/// Parses a TOML string: resolves environment variables, then validates.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[rewarder]
id = "rewarder-test"

[reward]
reward_address = "addr_test1qreward"

[account]
primary = "local"
[account.implementations.local]
payment_address = "addr_test1qwallet"

[discovery]
[discovery.implementations.webhook]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("REWARDER_TEST_HOST", "localhost");
		std::env::set_var("REWARDER_TEST_PORT", "1442");

		let result = resolve_env_vars("url = \"http://${REWARDER_TEST_HOST}:${REWARDER_TEST_PORT}\"").unwrap();
		assert_eq!(result, "url = \"http://localhost:1442\"");

		std::env::remove_var("REWARDER_TEST_HOST");
		std::env::remove_var("REWARDER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let result = resolve_env_vars("network = \"${REWARDER_MISSING_NETWORK:-preview}\"").unwrap();
		assert_eq!(result, "network = \"preview\"");

		let result = resolve_env_vars("key = \"${REWARDER_MISSING_KEY:-}\"").unwrap();
		assert_eq!(result, "key = \"\"");
	}

	#[test]
	fn test_numeric_values_from_env() {
		std::env::set_var("REWARDER_TEST_REWARD_AMOUNT", "2500000");
		let config_str = MINIMAL.replace(
			"[reward]\n",
			"[reward]\nmin_lovelace = ${REWARDER_UNSET_MIN_LOVELACE:-42000000}\nreward_amount = ${REWARDER_TEST_REWARD_AMOUNT:-5000000}\n",
		);
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.reward.min_lovelace, 42_000_000);
		assert_eq!(config.reward.reward_amount, 2_500_000);
		std::env::remove_var("REWARDER_TEST_REWARD_AMOUNT");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${REWARDER_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("REWARDER_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.rewarder.network, "preprod");
		assert_eq!(config.rewarder.network_magic(), Some(1));
		assert_eq!(config.rewarder.max_concurrent_events, 100);
		assert_eq!(config.reward.min_lovelace, 50_000_000);
		assert_eq!(config.reward.reward_amount, 5_000_000);
		assert_eq!(config.reward.source_address, None);
		assert_eq!(config.submit.grace_period_ms, 2_000);
		assert_eq!(config.submit.http_timeout_seconds, 300);
		assert!(config.utxo.blockfrost_api_key.is_none());
		assert!(config.composer.primary.is_none());
	}

	#[test]
	fn test_empty_strings_are_unset() {
		let config_str = format!(
			"{}\n[utxo]\nblockfrost_api_key = \"${{REWARDER_UNSET_BF:-}}\"\nkupo_url = \"\"\n[submit]\naddress = \"\"\nurl = \"http://localhost:8090/api/submit/tx\"\n",
			MINIMAL.replace("reward_address = \"addr_test1qreward\"", "reward_address = \"\"")
		);
		let config: Config = config_str.parse().unwrap();
		assert!(config.utxo.blockfrost_api_key.is_none());
		assert!(config.utxo.kupo_url.is_none());
		assert!(config.submit.address.is_none());
		assert!(config.reward.reward_address.is_none());
		assert_eq!(
			config.submit.url.as_deref(),
			Some("http://localhost:8090/api/submit/tx")
		);
	}

	#[test]
	fn test_unknown_network_uses_magic_override() {
		let config_str = MINIMAL.replace(
			"id = \"rewarder-test\"",
			"id = \"rewarder-test\"\nnetwork = \"private\"\nnetwork_magic = 1097911063",
		);
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.rewarder.network_magic(), Some(1097911063));

		let config_str = MINIMAL.replace(
			"id = \"rewarder-test\"",
			"id = \"rewarder-test\"\nnetwork = \"private\"",
		);
		let config: Config = config_str.parse().unwrap();
		assert_eq!(config.rewarder.network_magic(), None);
	}

	#[test]
	fn test_zero_reward_rejected() {
		let config_str = MINIMAL.replace(
			"[reward]",
			"[reward]\nreward_amount = 0",
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("reward_amount"));
	}

	#[test]
	fn test_primary_account_must_exist() {
		let config_str = MINIMAL.replace("primary = \"local\"", "primary = \"hsm\"");
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("Primary account 'hsm'"));
	}

	#[test]
	fn test_invalid_url_rejected() {
		let config_str = format!("{}\n[utxo]\nkupo_url = \"localhost:1442\"\n", MINIMAL);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("kupo_url"));
	}

	#[test]
	fn test_composer_primary_must_exist() {
		let config_str = format!("{}\n[composer]\nprimary = \"external\"\n", MINIMAL);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("Primary composer 'external'"));
	}
}
