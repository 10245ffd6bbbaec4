//! Account backed by local key material.
//!
//! Keys come either from cardano-cli text envelope files or from inline CBOR
//! hex. They are parsed once at construction so malformed keys fail startup.

use crate::keys::{self, PaymentKeys, TextEnvelope};
use crate::{AccountError, AccountInterface};
use async_trait::async_trait;
use rewarder_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::path::Path;

/// Wallet holding its address and parsed keys in memory.
pub struct LocalWallet {
	address: String,
	keys: PaymentKeys,
}

impl LocalWallet {
	/// Creates a wallet from an address and already extracted keys.
	pub fn new(address: String, keys: PaymentKeys) -> Self {
		Self { address, keys }
	}
}

/// Configuration schema for [`LocalWallet`].
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let non_empty = |value: &toml::Value| match value.as_str() {
			Some(s) if !s.trim().is_empty() => Ok(()),
			_ => Err("must be a non-empty string".to_string()),
		};

		let schema = Schema::new(
			vec![Field::new("payment_address", FieldType::String).with_validator(non_empty)],
			vec![
				Field::new("signing_key_file", FieldType::String),
				Field::new("signing_key_cbor", FieldType::String),
				Field::new("verification_key_file", FieldType::String),
				Field::new("verification_key_cbor", FieldType::String),
			],
		);
		schema.validate(config)?;

		let has = |key: &str| {
			config
				.get(key)
				.and_then(|v| v.as_str())
				.is_some_and(|s| !s.is_empty())
		};
		if !has("signing_key_file") && !has("signing_key_cbor") {
			return Err(ValidationError::MissingField(
				"signing_key_file or signing_key_cbor".to_string(),
			));
		}
		Ok(())
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<String, AccountError> {
		Ok(self.address.clone())
	}

	async fn payment_keys(&self) -> Result<PaymentKeys, AccountError> {
		Ok(self.keys.clone())
	}
}

/// Reads a key from `<name>_file` (text envelope) or `<name>_cbor` (hex), file first.
fn load_key(config: &toml::Value, name: &str) -> Result<Option<Vec<u8>>, AccountError> {
	let setting = |suffix: &str| {
		config
			.get(format!("{}_{}", name, suffix))
			.and_then(|v| v.as_str())
			.filter(|s| !s.is_empty())
	};

	if let Some(path) = setting("file") {
		let json = std::fs::read_to_string(Path::new(path))
			.map_err(|e| AccountError::Io(format!("Failed to read {}: {}", path, e)))?;
		let envelope = TextEnvelope::parse(&json)?;
		tracing::debug!(key = name, kind = %envelope.kind, "Loaded key envelope");
		return envelope.cbor().map(Some);
	}

	setting("cbor").map(keys::decode_hex).transpose()
}

/// Factory for the `local` account implementation.
///
/// ```toml
/// payment_address = "addr_test1..."
/// signing_key_file = "payment.skey"        # or signing_key_cbor = "5880..."
/// verification_key_file = "payment.vkey"   # optional
/// ```
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidConfig(e.to_string()))?;

	let address = config
		.get("payment_address")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::InvalidConfig("payment_address is required".into()))?
		.trim()
		.to_string();

	let signing = load_key(config, "signing_key")?
		.ok_or_else(|| AccountError::InvalidConfig("signing key is required".into()))?;
	let verification = load_key(config, "verification_key")?;
	let keys = keys::payment_keys(&signing, verification.as_deref())?;

	Ok(Box::new(LocalWallet::new(address, keys)))
}

/// Registry for the local wallet implementation.
pub struct Registry;

impl rewarder_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn signing_hex() -> String {
		let mut cbor = vec![0x58, 0x80];
		cbor.extend([0xaa; 64]);
		cbor.extend([0xbb; 32]);
		cbor.extend([0xcc; 32]);
		hex::encode(cbor)
	}

	#[tokio::test]
	async fn test_inline_keys() {
		let config: toml::Value = toml::from_str(&format!(
			"payment_address = \"addr_test1qwallet\"\nsigning_key_cbor = \"{}\"",
			signing_hex()
		))
		.unwrap();

		let account = create_account(&config).unwrap();
		assert_eq!(account.address().await.unwrap(), "addr_test1qwallet");
		let keys = account.payment_keys().await.unwrap();
		assert_eq!(keys.verification_key, [0xbb; 32]);
		assert_eq!(keys.signing_key.len(), 96);
	}

	#[tokio::test]
	async fn test_envelope_files() {
		let dir = TempDir::new().unwrap();
		let skey = dir.path().join("payment.skey");
		let vkey = dir.path().join("payment.vkey");
		fs::write(
			&skey,
			format!(
				r#"{{"type":"PaymentExtendedSigningKeyShelley_ed25519_bip32","description":"","cborHex":"{}"}}"#,
				signing_hex()
			),
		)
		.unwrap();
		fs::write(
			&vkey,
			format!(
				r#"{{"type":"PaymentVerificationKeyShelley_ed25519","description":"","cborHex":"5820{}"}}"#,
				hex::encode([0xbb; 32])
			),
		)
		.unwrap();

		let mut table = toml::Table::new();
		table.insert("payment_address".into(), "addr_test1qwallet".into());
		table.insert("signing_key_file".into(), skey.to_string_lossy().to_string().into());
		table.insert("verification_key_file".into(), vkey.to_string_lossy().to_string().into());

		let account = create_account(&toml::Value::Table(table)).unwrap();
		let keys = account.payment_keys().await.unwrap();
		assert_eq!(keys.verification_key, [0xbb; 32]);
	}

	#[test]
	fn test_missing_signing_key_rejected() {
		let config: toml::Value = toml::from_str("payment_address = \"addr_test1qwallet\"").unwrap();
		let err = create_account(&config).err().unwrap();
		assert!(matches!(err, AccountError::InvalidConfig(_)));
	}

	#[test]
	fn test_truncated_key_rejected() {
		let config: toml::Value = toml::from_str(&format!(
			"payment_address = \"addr_test1qwallet\"\nsigning_key_cbor = \"{}\"",
			&signing_hex()[..100]
		))
		.unwrap();
		let err = create_account(&config).err().unwrap();
		assert!(matches!(err, AccountError::KeyFormat(_)));
	}
}
