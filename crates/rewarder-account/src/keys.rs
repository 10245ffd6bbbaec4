//! Payment key extraction.
//!
//! Keys arrive CBOR-wrapped, as in the `cborHex` field of a cardano-cli text
//! envelope:
//!
//! * verification key: `0x58 0x20` followed by the 32-byte ed25519 public key;
//! * extended signing key: `0x58 0x80` followed by 128 bytes laid out as
//!   `extended secret (64) | public key (32) | chain code (32)`.
//!
//! The signer expects the signing key without the embedded public key, i.e.
//! `extended secret (64) | chain code (32)`.

use crate::AccountError;
use rewarder_types::SecretBytes;
use serde::Deserialize;

const CBOR_PREFIX_LEN: usize = 2;
const VERIFICATION_KEY_LEN: usize = 32;
const EXTENDED_SIGNING_KEY_LEN: usize = 128;
const EXTENDED_SECRET_LEN: usize = 64;
const PUBLIC_KEY_END: usize = EXTENDED_SECRET_LEN + VERIFICATION_KEY_LEN;

/// Key pair handed to the transaction composer for witnessing.
#[derive(Debug, Clone)]
pub struct PaymentKeys {
	pub verification_key: [u8; VERIFICATION_KEY_LEN],
	/// `extended secret | chain code`, 96 bytes.
	pub signing_key: SecretBytes,
}

/// cardano-cli key file.
#[derive(Debug, Deserialize)]
pub struct TextEnvelope {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub description: String,
	#[serde(rename = "cborHex")]
	pub cbor_hex: String,
}

impl TextEnvelope {
	/// Parses the JSON of a `.skey` or `.vkey` file.
	pub fn parse(json: &str) -> Result<Self, AccountError> {
		serde_json::from_str(json)
			.map_err(|e| AccountError::KeyFormat(format!("Invalid key envelope: {}", e)))
	}

	/// Decodes `cborHex`.
	pub fn cbor(&self) -> Result<Vec<u8>, AccountError> {
		decode_hex(&self.cbor_hex)
	}
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, AccountError> {
	hex::decode(value.trim())
		.map_err(|e| AccountError::KeyFormat(format!("Invalid hex: {}", e)))
}

fn strip_prefix<'a>(cbor: &'a [u8], payload_len: usize, what: &str) -> Result<&'a [u8], AccountError> {
	let expected = CBOR_PREFIX_LEN + payload_len;
	if cbor.len() != expected {
		return Err(AccountError::KeyFormat(format!(
			"{} must be {} bytes, got {}",
			what,
			expected,
			cbor.len()
		)));
	}
	// major type 2 (bytes) with a one-byte length
	if cbor[0] != 0x58 || usize::from(cbor[1]) != payload_len {
		return Err(AccountError::KeyFormat(format!(
			"{} has unexpected header {:02x}{:02x}",
			what, cbor[0], cbor[1]
		)));
	}
	Ok(&cbor[CBOR_PREFIX_LEN..])
}

/// Returns the raw 32-byte key from a CBOR-wrapped verification key.
pub fn extract_verification_key(cbor: &[u8]) -> Result<[u8; VERIFICATION_KEY_LEN], AccountError> {
	let raw = strip_prefix(cbor, VERIFICATION_KEY_LEN, "Verification key")?;
	let mut key = [0u8; VERIFICATION_KEY_LEN];
	key.copy_from_slice(raw);
	Ok(key)
}

/// Returns the signing key with the embedded public key removed, plus that public key.
pub fn extract_signing_key(
	cbor: &[u8],
) -> Result<(SecretBytes, [u8; VERIFICATION_KEY_LEN]), AccountError> {
	let raw = strip_prefix(cbor, EXTENDED_SIGNING_KEY_LEN, "Signing key")?;

	let mut signing = Vec::with_capacity(EXTENDED_SIGNING_KEY_LEN - VERIFICATION_KEY_LEN);
	signing.extend_from_slice(&raw[..EXTENDED_SECRET_LEN]);
	signing.extend_from_slice(&raw[PUBLIC_KEY_END..]);

	let mut embedded = [0u8; VERIFICATION_KEY_LEN];
	embedded.copy_from_slice(&raw[EXTENDED_SECRET_LEN..PUBLIC_KEY_END]);

	Ok((SecretBytes::new(signing), embedded))
}

/// Builds the key pair, checking that an explicit verification key matches
/// the one embedded in the signing key.
pub fn payment_keys(
	signing_cbor: &[u8],
	verification_cbor: Option<&[u8]>,
) -> Result<PaymentKeys, AccountError> {
	let (signing_key, embedded) = extract_signing_key(signing_cbor)?;
	let verification_key = match verification_cbor {
		Some(cbor) => {
			let key = extract_verification_key(cbor)?;
			if key != embedded {
				return Err(AccountError::KeyFormat(
					"Verification key does not match signing key".into(),
				));
			}
			key
		},
		None => embedded,
	};

	Ok(PaymentKeys {
		verification_key,
		signing_key,
	})
}
