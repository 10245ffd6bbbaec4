//! Types for transactions handed to the submission client.

use crate::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger era of a transaction.
///
/// The discriminant is the hard-fork-combinator era index used on the wire by
/// the transaction-submission mini-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum Era {
	Byron = 0,
	Shelley = 1,
	Allegra = 2,
	Mary = 3,
	Alonzo = 4,
	Babbage = 5,
	Conway = 6,
}

impl Era {
	/// Wire index of the era.
	pub fn index(self) -> u16 {
		self as u16
	}

	/// Era for a wire index, `None` for eras after Conway.
	pub fn from_index(index: u16) -> Option<Self> {
		match index {
			0 => Some(Era::Byron),
			1 => Some(Era::Shelley),
			2 => Some(Era::Allegra),
			3 => Some(Era::Mary),
			4 => Some(Era::Alonzo),
			5 => Some(Era::Babbage),
			6 => Some(Era::Conway),
			_ => None,
		}
	}
}

impl fmt::Display for Era {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Era::Byron => "byron",
			Era::Shelley => "shelley",
			Era::Allegra => "allegra",
			Era::Mary => "mary",
			Era::Alonzo => "alonzo",
			Era::Babbage => "babbage",
			Era::Conway => "conway",
		};
		f.write_str(name)
	}
}

/// A signed, serialized reward transaction ready for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct RewardTransaction {
	/// Full CBOR encoding of the signed transaction.
	pub bytes: Vec<u8>,
	pub id: TransactionId,
	pub era: Era,
}

impl RewardTransaction {
	pub fn size(&self) -> usize {
		self.bytes.len()
	}
}

impl fmt::Debug for RewardTransaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RewardTransaction")
			.field("id", &self.id)
			.field("era", &self.era)
			.field("size", &self.bytes.len())
			.finish()
	}
}
