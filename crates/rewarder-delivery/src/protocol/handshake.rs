//! Node-to-node handshake (mini-protocol 0).

use minicbor::decode::Error as DecodeError;
use minicbor::encode::{Error as EncodeError, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};

pub const PROTOCOL_ID: u16 = 0;

/// Node-to-node versions proposed by the client.
pub const PROPOSED_VERSIONS: [u64; 2] = [13, 14];

/// Version parameters for node-to-node v13 and later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionData {
	pub network_magic: u32,
	pub initiator_only: bool,
	pub peer_sharing: u8,
	pub query: bool,
}

impl VersionData {
	/// Parameters for a short-lived submission connection.
	pub fn submitter(network_magic: u32) -> Self {
		Self {
			network_magic,
			initiator_only: true,
			peer_sharing: 0,
			query: false,
		}
	}
}

impl<C> Encode<C> for VersionData {
	fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> Result<(), EncodeError<W::Error>> {
		e.array(4)?
			.u32(self.network_magic)?
			.bool(self.initiator_only)?
			.u8(self.peer_sharing)?
			.bool(self.query)?;
		Ok(())
	}
}

impl<'b, C> Decode<'b, C> for VersionData {
	fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, DecodeError> {
		if d.array()? != Some(4) {
			return Err(DecodeError::message("expected 4 version parameters"));
		}
		Ok(Self {
			network_magic: d.u32()?,
			initiator_only: d.bool()?,
			peer_sharing: d.u8()?,
			query: d.bool()?,
		})
	}
}

/// Handshake messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Version table, ascending by version number.
	ProposeVersions(Vec<(u64, VersionData)>),
	AcceptVersion(u64, VersionData),
	Refuse(String),
	QueryReply(Vec<u64>),
}

impl Message {
	/// Proposes [`PROPOSED_VERSIONS`] for `network_magic`.
	pub fn propose(network_magic: u32) -> Self {
		Message::ProposeVersions(
			PROPOSED_VERSIONS
				.iter()
				.map(|version| (*version, VersionData::submitter(network_magic)))
				.collect(),
		)
	}
}

impl<C> Encode<C> for Message {
	fn encode<W: Write>(&self, e: &mut Encoder<W>, ctx: &mut C) -> Result<(), EncodeError<W::Error>> {
		match self {
			Message::ProposeVersions(versions) => {
				e.array(2)?.u8(0)?.map(versions.len() as u64)?;
				for (version, data) in versions {
					e.u64(*version)?;
					data.encode(e, ctx)?;
				}
			},
			Message::AcceptVersion(version, data) => {
				e.array(3)?.u8(1)?.u64(*version)?;
				data.encode(e, ctx)?;
			},
			Message::Refuse(reason) => {
				// Refused(version, text)
				e.array(2)?.u8(2)?.array(3)?.u8(2)?.u64(0)?.str(reason)?;
			},
			Message::QueryReply(versions) => {
				e.array(2)?.u8(3)?.map(versions.len() as u64)?;
				for version in versions {
					e.u64(*version)?.null()?;
				}
			},
		}
		Ok(())
	}
}

impl<'b, C> Decode<'b, C> for Message {
	fn decode(d: &mut Decoder<'b>, ctx: &mut C) -> Result<Self, DecodeError> {
		d.array()?;
		match d.u8()? {
			0 => {
				let len = d
					.map()?
					.ok_or_else(|| DecodeError::message("indefinite version table"))?;
				let mut versions = Vec::with_capacity(len as usize);
				for _ in 0..len {
					versions.push((d.u64()?, VersionData::decode(d, ctx)?));
				}
				Ok(Message::ProposeVersions(versions))
			},
			1 => {
				let version = d.u64()?;
				Ok(Message::AcceptVersion(version, VersionData::decode(d, ctx)?))
			},
			2 => Ok(Message::Refuse(refuse_reason(d)?)),
			3 => {
				let len = d
					.map()?
					.ok_or_else(|| DecodeError::message("indefinite version table"))?;
				let mut versions = Vec::with_capacity(len as usize);
				for _ in 0..len {
					versions.push(d.u64()?);
					d.skip()?;
				}
				Ok(Message::QueryReply(versions))
			},
			tag => Err(DecodeError::message(format!("unknown handshake message {}", tag))),
		}
	}
}

/// `[0, [versions]]` mismatch, `[1, version, text]` decode error or
/// `[2, version, text]` refusal.
fn refuse_reason(d: &mut Decoder<'_>) -> Result<String, DecodeError> {
	d.array()?;
	match d.u8()? {
		0 => {
			let mut versions = Vec::new();
			for version in d.array_iter::<u64>()? {
				versions.push(version?);
			}
			Ok(format!("version mismatch, peer supports {:?}", versions))
		},
		1 => {
			let version = d.u64()?;
			Ok(format!("peer failed to decode v{} parameters: {}", version, d.str()?))
		},
		2 => {
			let version = d.u64()?;
			Ok(format!("refused v{}: {}", version, d.str()?))
		},
		other => Err(DecodeError::message(format!("unknown refuse reason {}", other))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_propose_encoding() {
		let bytes = minicbor::to_vec(Message::propose(1)).unwrap();
		// [0, {13: [1, true, 0, false], 14: [1, true, 0, false]}]
		assert_eq!(
			bytes,
			vec![0x82, 0x00, 0xa2, 0x0d, 0x84, 0x01, 0xf5, 0x00, 0xf4, 0x0e, 0x84, 0x01, 0xf5, 0x00, 0xf4]
		);
		assert_eq!(minicbor::decode::<Message>(&bytes).unwrap(), Message::propose(1));
	}

	#[test]
	fn test_decode_accept() {
		let bytes = minicbor::to_vec(Message::AcceptVersion(14, VersionData::submitter(2))).unwrap();
		match minicbor::decode::<Message>(&bytes).unwrap() {
			Message::AcceptVersion(14, data) => assert_eq!(data.network_magic, 2),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn test_decode_version_mismatch() {
		// [2, [0, [10, 11]]]
		let bytes = [0x82, 0x02, 0x82, 0x00, 0x82, 0x0a, 0x0b];
		match minicbor::decode::<Message>(&bytes).unwrap() {
			Message::Refuse(reason) => assert!(reason.contains("[10, 11]")),
			other => panic!("unexpected {:?}", other),
		}
	}
}
