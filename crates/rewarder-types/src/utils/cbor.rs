//! Minimal inspection of serialized transactions.
//!
//! A Shelley-era (and later) transaction is the CBOR array
//! `[body, witness_set, is_valid, auxiliary_data]`; its id is the blake2b-256
//! hash of the body exactly as it appears in the serialized bytes.

use crate::TransactionId;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use minicbor::data::Type;
use minicbor::Decoder;
use thiserror::Error;

type Blake2b256 = Blake2b<U32>;

/// Errors raised while inspecting transaction bytes.
#[derive(Debug, Error)]
pub enum CborError {
	#[error("CBOR decode error: {0}")]
	Decode(#[from] minicbor::decode::Error),
	#[error("Malformed transaction: {0}")]
	Malformed(String),
}

/// Blake2b with a 256-bit digest, the hash behind transaction ids.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
	let mut hasher = Blake2b256::new();
	hasher.update(data);
	let mut out = [0u8; 32];
	out.copy_from_slice(&hasher.finalize());
	out
}

/// Computes the id of a serialized transaction from its body bytes.
pub fn transaction_id(tx: &[u8]) -> Result<TransactionId, CborError> {
	let mut decoder = Decoder::new(tx);
	match decoder.array()? {
		Some(3) | Some(4) | None => {},
		Some(n) => {
			return Err(CborError::Malformed(format!(
				"expected a 3 or 4 element array, got {}",
				n
			)))
		},
	}

	match decoder.datatype()? {
		Type::Map | Type::MapIndef => {},
		other => {
			return Err(CborError::Malformed(format!(
				"transaction body must be a map, got {:?}",
				other
			)))
		},
	}

	let start = decoder.position();
	decoder.skip()?;
	let end = decoder.position();

	Ok(TransactionId(blake2b_256(&tx[start..end])))
}

/// Builds small but structurally valid transactions for tests in dependent crates.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
	use minicbor::encode::Error;
	use minicbor::Encoder;
	use std::convert::Infallible;

	/// Encodes `[{2: fee}, {}, true, null]`; distinct fees give distinct ids.
	pub fn signed_transaction(fee: u64) -> Result<Vec<u8>, Error<Infallible>> {
		let mut encoder = Encoder::new(Vec::new());
		encoder
			.array(4)?
			.map(1)?
			.u8(2)?
			.u64(fee)?
			.map(0)?
			.bool(true)?
			.null()?;
		Ok(encoder.into_writer())
	}

	/// The body bytes of [`signed_transaction`].
	pub fn body(fee: u64) -> Result<Vec<u8>, Error<Infallible>> {
		let mut encoder = Encoder::new(Vec::new());
		encoder.map(1)?.u8(2)?.u64(fee)?;
		Ok(encoder.into_writer())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_blake2b_256_known_vector() {
		// blake2b-256 of the empty string
		assert_eq!(
			hex::encode(blake2b_256(b"")),
			"0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
		);
	}

	#[test]
	fn test_transaction_id_hashes_body_span() {
		let tx = testing::signed_transaction(170_000).unwrap();
		let body = testing::body(170_000).unwrap();
		let id = transaction_id(&tx).unwrap();
		assert_eq!(id.0, blake2b_256(&body));
		assert_ne!(id, transaction_id(&testing::signed_transaction(1).unwrap()).unwrap());
	}

	#[test]
	fn test_transaction_id_rejects_non_transaction() {
		let mut encoder = minicbor::Encoder::new(Vec::new());
		encoder.array(2).unwrap().u8(1).unwrap().u8(2).unwrap();
		let bytes = encoder.into_writer();
		assert!(matches!(
			transaction_id(&bytes),
			Err(CborError::Malformed(_))
		));

		assert!(transaction_id(&[0x84]).is_err());
	}
}
