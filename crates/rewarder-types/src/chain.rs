//! Chain data model shared by the discovery, resolver and builder crates.
//!
//! Addresses are kept in their bech32 text form; equality between addresses is
//! exact string equality throughout the system.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Policy tag some indexers use for the base currency.
pub const ADA_POLICY: &str = "ada";
/// Asset name / unit of the base currency.
pub const LOVELACE_UNIT: &str = "lovelace";
/// Length in hex characters of a minting policy id.
pub const POLICY_ID_HEX_LEN: usize = 56;

/// Error returned when a transaction id cannot be parsed from hex.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionIdError {
	#[error("Invalid hex: {0}")]
	InvalidHex(String),
	#[error("Expected 32 bytes, got {0}")]
	InvalidLength(usize),
}

/// Error returned when summing amounts would exceed `u64::MAX`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Amount overflow")]
pub struct AmountOverflow;

/// A 32-byte transaction hash (blake2b-256 of the transaction body).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub [u8; 32]);

impl TransactionId {
	/// Raw hash bytes.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// Lowercase hex, as used by explorers and the node CLI.
	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl FromStr for TransactionId {
	type Err = TransactionIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(s).map_err(|e| TransactionIdError::InvalidHex(e.to_string()))?;
		let array: [u8; 32] = bytes
			.as_slice()
			.try_into()
			.map_err(|_| TransactionIdError::InvalidLength(bytes.len()))?;
		Ok(Self(array))
	}
}

impl TryFrom<&[u8]> for TransactionId {
	type Error = TransactionIdError;

	fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
		let array: [u8; 32] = bytes
			.try_into()
			.map_err(|_| TransactionIdError::InvalidLength(bytes.len()))?;
		Ok(Self(array))
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TransactionId({})", self.to_hex())
	}
}

impl Serialize for TransactionId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for TransactionId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// Reference to a transaction output: the producing transaction and the output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
	pub tx_id: TransactionId,
	pub index: u32,
}

impl InputRef {
	pub fn new(tx_id: TransactionId, index: u32) -> Self {
		Self { tx_id, index }
	}
}

impl fmt::Display for InputRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.tx_id, self.index)
	}
}

/// Native tokens: policy id (hex) to asset name (hex) to quantity.
pub type MultiAsset = BTreeMap<String, BTreeMap<String, u64>>;

/// A bundle of base currency plus native tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
	pub lovelace: u64,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub assets: MultiAsset,
}

impl Value {
	pub fn from_lovelace(lovelace: u64) -> Self {
		Self {
			lovelace,
			assets: MultiAsset::new(),
		}
	}

	/// Adds a `(policy, asset name, quantity)` entry.
	///
	/// The reserved base-currency tag (`ada` / `lovelace`) is folded into the
	/// main amount and never recorded as a token.
	pub fn add_asset(&mut self, policy: &str, name: &str, quantity: u64) -> Result<(), AmountOverflow> {
		if policy == ADA_POLICY && name == LOVELACE_UNIT {
			self.lovelace = self.lovelace.checked_add(quantity).ok_or(AmountOverflow)?;
			return Ok(());
		}
		let slot = self
			.assets
			.entry(policy.to_string())
			.or_default()
			.entry(name.to_string())
			.or_insert(0);
		*slot = slot.checked_add(quantity).ok_or(AmountOverflow)?;
		Ok(())
	}

	/// Adds an entry keyed by a concatenated unit (`lovelace` or `<policy><name>` in hex).
	pub fn add_unit(&mut self, unit: &str, quantity: u64) -> Result<(), AmountOverflow> {
		if unit == LOVELACE_UNIT {
			self.lovelace = self.lovelace.checked_add(quantity).ok_or(AmountOverflow)?;
			return Ok(());
		}
		let split = POLICY_ID_HEX_LEN.min(unit.len());
		let (policy, name) = unit.split_at(split);
		self.add_asset(policy, name, quantity)
	}

	/// Sums two values, failing if any single quantity overflows.
	pub fn checked_add(&self, other: &Value) -> Result<Value, AmountOverflow> {
		let mut sum = self.clone();
		sum.lovelace = sum.lovelace.checked_add(other.lovelace).ok_or(AmountOverflow)?;
		for (policy, names) in &other.assets {
			for (name, quantity) in names {
				sum.add_asset(policy, name, *quantity)?;
			}
		}
		Ok(sum)
	}

	/// Whether any native token quantity is recorded.
	pub fn has_assets(&self) -> bool {
		self.assets.values().any(|names| !names.is_empty())
	}
}

/// An output as observed in a chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
	pub address: String,
	/// Base-currency amount in lovelace.
	pub amount: u64,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub assets: MultiAsset,
}

/// An unspent output as reported by an indexing backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
	pub input: InputRef,
	pub address: String,
	pub value: Value,
}

/// Informational position of a transaction on chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
	pub block_number: u64,
	pub slot: u64,
}

/// A confirmed transaction delivered by the chain follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransactionEvent {
	pub hash: TransactionId,
	pub inputs: Vec<InputRef>,
	pub outputs: Vec<TxOutput>,
	#[serde(default)]
	pub context: EventContext,
}

impl ChainTransactionEvent {
	/// Whether any output pays to `address`.
	pub fn pays_to(&self, address: &str) -> bool {
		self.outputs.iter().any(|output| output.address == address)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TX: &str = "4f1b2c3d4e5f60718293a4b5c6d7e8f9000102030405060708090a0b0c0d0e0f";

	#[test]
	fn test_transaction_id_parse_and_display() {
		let id: TransactionId = TX.parse().unwrap();
		assert_eq!(id.to_string(), TX);
		assert_eq!(id.as_bytes()[0], 0x4f);
	}

	#[test]
	fn test_transaction_id_rejects_wrong_length() {
		assert_eq!(
			"abcd".parse::<TransactionId>(),
			Err(TransactionIdError::InvalidLength(2))
		);
		assert!(matches!(
			"zz".parse::<TransactionId>(),
			Err(TransactionIdError::InvalidHex(_))
		));
	}

	#[test]
	fn test_input_ref_display() {
		let input = InputRef::new(TX.parse().unwrap(), 3);
		assert_eq!(input.to_string(), format!("{}#3", TX));
	}

	#[test]
	fn test_reserved_tag_is_base_amount() {
		let mut value = Value::default();
		value.add_asset(ADA_POLICY, LOVELACE_UNIT, 2_000_000).unwrap();
		value.add_asset("aa".repeat(28).as_str(), "746f6b656e", 5).unwrap();
		assert_eq!(value.lovelace, 2_000_000);
		assert_eq!(value.assets.len(), 1);
		assert!(value.has_assets());
	}

	#[test]
	fn test_add_unit_splits_policy() {
		let policy = "bb".repeat(28);
		let mut value = Value::default();
		value.add_unit(LOVELACE_UNIT, 7).unwrap();
		value.add_unit(&format!("{}4d494e", policy), 11).unwrap();
		assert_eq!(value.lovelace, 7);
		assert_eq!(value.assets[&policy]["4d494e"], 11);
	}

	#[test]
	fn test_checked_add_detects_overflow() {
		let a = Value::from_lovelace(u64::MAX);
		let b = Value::from_lovelace(1);
		assert_eq!(a.checked_add(&b), Err(AmountOverflow));
		assert_eq!(
			Value::from_lovelace(1).checked_add(&b).unwrap().lovelace,
			2
		);
	}

	#[test]
	fn test_event_serde_uses_hex_ids() {
		let event = ChainTransactionEvent {
			hash: TX.parse().unwrap(),
			inputs: vec![InputRef::new(TX.parse().unwrap(), 0)],
			outputs: vec![TxOutput {
				address: "addr_test1xyz".into(),
				amount: 1,
				assets: MultiAsset::new(),
			}],
			context: EventContext::default(),
		};
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["hash"], TX);
		assert!(event.pays_to("addr_test1xyz"));
		assert!(!event.pays_to("addr_test1abc"));
	}
}
