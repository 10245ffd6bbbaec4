//! Node-to-node transaction submission (mini-protocol 4).
//!
//! The protocol is pull based: after `MsgInit` the peer asks for transaction
//! ids and then for the bodies it wants. Ids and bodies are era-tagged as
//! `[era, id]` and `[era, #6.24(bytes)]`.

use minicbor::data::{Tag, Type};
use minicbor::decode::Error as DecodeError;
use minicbor::encode::{Error as EncodeError, Write};
use minicbor::{Decode, Decoder, Encode, Encoder};
use rewarder_types::Era;

pub const PROTOCOL_ID: u16 = 4;

/// CBOR-in-CBOR.
const ENCODED_CBOR_TAG: u64 = 24;

/// Era-tagged transaction id, `[era, id]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraTxId {
	pub era: u16,
	pub id: [u8; 32],
}

/// Era-tagged transaction body, `[era, #6.24(bytes)]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraTxBody {
	pub era: u16,
	pub bytes: Vec<u8>,
}

/// Tx-submission messages, as seen from the client that owns the
/// transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	Init,
	RequestTxIds { blocking: bool, ack: u16, req: u16 },
	ReplyTxIds(Vec<(EraTxId, u32)>),
	RequestTxs(Vec<EraTxId>),
	ReplyTxs(Vec<EraTxBody>),
	Done,
}

impl<C> Encode<C> for EraTxId {
	fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> Result<(), EncodeError<W::Error>> {
		e.array(2)?.u16(self.era)?.bytes(&self.id)?;
		Ok(())
	}
}

/// Reads an era index, rejecting eras this client does not know.
fn decode_era(d: &mut Decoder<'_>) -> Result<u16, DecodeError> {
	let index = d.u16()?;
	Era::from_index(index)
		.map(Era::index)
		.ok_or_else(|| DecodeError::message(format!("unknown era {}", index)))
}

impl<'b, C> Decode<'b, C> for EraTxId {
	fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, DecodeError> {
		d.array()?;
		let era = decode_era(d)?;
		let id = d
			.bytes()?
			.try_into()
			.map_err(|_| DecodeError::message("transaction id must be 32 bytes"))?;
		Ok(Self { era, id })
	}
}

impl<C> Encode<C> for Message {
	fn encode<W: Write>(&self, e: &mut Encoder<W>, ctx: &mut C) -> Result<(), EncodeError<W::Error>> {
		match self {
			Message::Init => {
				e.array(1)?.u8(6)?;
			},
			Message::RequestTxIds { blocking, ack, req } => {
				e.array(4)?.u8(0)?.bool(*blocking)?.u16(*ack)?.u16(*req)?;
			},
			Message::ReplyTxIds(ids) => {
				e.array(2)?.u8(1)?.begin_array()?;
				for (id, size) in ids {
					e.array(2)?;
					id.encode(e, ctx)?;
					e.u32(*size)?;
				}
				e.end()?;
			},
			Message::RequestTxs(ids) => {
				e.array(2)?.u8(2)?.begin_array()?;
				for id in ids {
					id.encode(e, ctx)?;
				}
				e.end()?;
			},
			Message::ReplyTxs(bodies) => {
				e.array(2)?.u8(3)?.begin_array()?;
				for body in bodies {
					e.array(2)?
						.u16(body.era)?
						.tag(Tag::new(ENCODED_CBOR_TAG))?
						.bytes(&body.bytes)?;
				}
				e.end()?;
			},
			Message::Done => {
				e.array(1)?.u8(4)?;
			},
		}
		Ok(())
	}
}

/// Decodes a definite or indefinite array, consuming the trailing break.
fn decode_list<'b, T, F>(d: &mut Decoder<'b>, mut item: F) -> Result<Vec<T>, DecodeError>
where
	F: FnMut(&mut Decoder<'b>) -> Result<T, DecodeError>,
{
	let mut items = Vec::new();
	match d.array()? {
		Some(len) => {
			for _ in 0..len {
				items.push(item(d)?);
			}
		},
		None => loop {
			if d.datatype()? == Type::Break {
				d.set_position(d.position() + 1);
				break;
			}
			items.push(item(d)?);
		},
	}
	Ok(items)
}

impl<'b, C> Decode<'b, C> for Message {
	fn decode(d: &mut Decoder<'b>, ctx: &mut C) -> Result<Self, DecodeError> {
		d.array()?;
		match d.u8()? {
			0 => Ok(Message::RequestTxIds {
				blocking: d.bool()?,
				ack: d.u16()?,
				req: d.u16()?,
			}),
			1 => {
				let ids = decode_list(d, |d| {
					d.array()?;
					Ok((EraTxId::decode(d, ctx)?, d.u32()?))
				})?;
				Ok(Message::ReplyTxIds(ids))
			},
			2 => Ok(Message::RequestTxs(decode_list(d, |d| EraTxId::decode(d, ctx))?)),
			3 => {
				let bodies = decode_list(d, |d| {
					d.array()?;
					let era = decode_era(d)?;
					let tag = d.tag()?;
					if tag.as_u64() != ENCODED_CBOR_TAG {
						return Err(DecodeError::message(format!(
							"expected tag 24 around transaction, got {}",
							tag.as_u64()
						)));
					}
					Ok(EraTxBody {
						era,
						bytes: d.bytes()?.to_vec(),
					})
				})?;
				Ok(Message::ReplyTxs(bodies))
			},
			4 => Ok(Message::Done),
			6 => Ok(Message::Init),
			tag => Err(DecodeError::message(format!(
				"unknown tx-submission message {}",
				tag
			))),
		}
	}
}

/// Client side callbacks of the protocol.
pub trait TxSubmissionHandler {
	/// Ids to advertise. An empty reply to a blocking request ends the protocol.
	fn request_tx_ids(&mut self, blocking: bool, ack: u16, req: u16) -> Vec<(EraTxId, u32)>;

	/// Bodies for the requested ids.
	fn request_txs(&mut self, ids: &[EraTxId]) -> Vec<EraTxBody>;
}

/// Builds the reply to a peer request. Returns `None` for messages that need
/// no reply.
pub fn respond<H: TxSubmissionHandler>(handler: &mut H, request: &Message) -> Option<Message> {
	match request {
		Message::RequestTxIds { blocking, ack, req } => {
			let ids = handler.request_tx_ids(*blocking, *ack, *req);
			if ids.is_empty() && *blocking {
				// a blocking request must not get an empty reply
				Some(Message::Done)
			} else {
				Some(Message::ReplyTxIds(ids))
			}
		},
		Message::RequestTxs(ids) => Some(Message::ReplyTxs(handler.request_txs(ids))),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Fixed(Vec<(EraTxId, u32)>);

	impl TxSubmissionHandler for Fixed {
		fn request_tx_ids(&mut self, _blocking: bool, _ack: u16, _req: u16) -> Vec<(EraTxId, u32)> {
			self.0.clone()
		}

		fn request_txs(&mut self, _ids: &[EraTxId]) -> Vec<EraTxBody> {
			vec![EraTxBody {
				era: 6,
				bytes: vec![0x84],
			}]
		}
	}

	fn id() -> EraTxId {
		EraTxId {
			era: 6,
			id: [0xab; 32],
		}
	}

	#[test]
	fn test_fixed_messages() {
		assert_eq!(minicbor::to_vec(Message::Init).unwrap(), vec![0x81, 0x06]);
		assert_eq!(minicbor::to_vec(Message::Done).unwrap(), vec![0x81, 0x04]);
		let request = [0x84, 0x00, 0xf5, 0x00, 0x01];
		assert_eq!(
			minicbor::decode::<Message>(&request).unwrap(),
			Message::RequestTxIds {
				blocking: true,
				ack: 0,
				req: 1
			}
		);
	}

	#[test]
	fn test_reply_txs_wraps_body_in_tag_24() {
		let bytes = minicbor::to_vec(Message::ReplyTxs(vec![EraTxBody {
			era: 6,
			bytes: vec![0x84, 0xa0],
		}]))
		.unwrap();
		// [3, [_ [6, 24(h'84a0')]]]
		assert_eq!(bytes, vec![0x82, 0x03, 0x9f, 0x82, 0x06, 0xd8, 0x18, 0x42, 0x84, 0xa0, 0xff]);
		assert!(matches!(
			minicbor::decode::<Message>(&bytes).unwrap(),
			Message::ReplyTxs(bodies) if bodies[0].bytes == vec![0x84, 0xa0]
		));
	}

	#[test]
	fn test_request_txs_definite_and_indefinite() {
		let indefinite = minicbor::to_vec(Message::RequestTxs(vec![id(), id()])).unwrap();
		assert_eq!(indefinite[2], 0x9f);

		let mut definite = minicbor::Encoder::new(Vec::new());
		definite.array(2).unwrap().u8(2).unwrap().array(1).unwrap();
		definite.encode(id()).unwrap();
		let definite = definite.into_writer();

		assert_eq!(
			minicbor::decode::<Message>(&indefinite).unwrap(),
			Message::RequestTxs(vec![id(), id()])
		);
		assert_eq!(
			minicbor::decode::<Message>(&definite).unwrap(),
			Message::RequestTxs(vec![id()])
		);
	}

	#[test]
	fn test_unknown_era_rejected() {
		let mut bytes = minicbor::Encoder::new(Vec::new());
		bytes.array(2).unwrap().u8(2).unwrap().array(1).unwrap();
		bytes.array(2).unwrap().u16(9).unwrap().bytes(&[0xab; 32]).unwrap();
		let bytes = bytes.into_writer();

		let err = minicbor::decode::<Message>(&bytes).unwrap_err();
		assert!(err.to_string().contains("unknown era 9"));
	}

	#[test]
	fn test_empty_blocking_reply_becomes_done() {
		let mut empty = Fixed(vec![]);
		let blocking = Message::RequestTxIds {
			blocking: true,
			ack: 1,
			req: 1,
		};
		let non_blocking = Message::RequestTxIds {
			blocking: false,
			ack: 1,
			req: 1,
		};
		assert_eq!(respond(&mut empty, &blocking), Some(Message::Done));
		assert_eq!(respond(&mut empty, &non_blocking), Some(Message::ReplyTxIds(vec![])));

		let mut one = Fixed(vec![(id(), 200)]);
		assert_eq!(respond(&mut one, &blocking), Some(Message::ReplyTxIds(vec![(id(), 200)])));
		assert_eq!(respond(&mut one, &Message::Done), None);
	}
}
