//! Ouroboros multiplexer framing.
//!
//! Every segment starts with an 8-byte big-endian header:
//!
//! ```text
//! | timestamp (u32, µs) | mode (1 bit) | protocol (15 bits) | length (u16) |
//! ```
//!
//! The mode bit is set on segments sent by the responder side of a
//! mini-protocol. A message may span several segments; segments of different
//! mini-protocols are reassembled into separate buffers.

use bytes::{Buf, BytesMut};
use minicbor::{Decode, Encode};
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 8;
/// Largest payload sent in one segment; longer messages are split.
pub const MAX_SEGMENT_PAYLOAD: usize = 12_288;
const RESPONDER_FLAG: u16 = 0x8000;

/// Errors raised while framing or unframing segments.
#[derive(Debug, Error)]
pub enum MuxError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Connection closed by peer")]
	Closed,
	#[error("Failed to decode message on protocol {protocol}: {source}")]
	Decode {
		protocol: u16,
		source: minicbor::decode::Error,
	},
	#[error("Failed to encode message: {0}")]
	Encode(String),
}

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
	pub timestamp: u32,
	pub protocol: u16,
	pub responder: bool,
	pub length: u16,
}

impl SegmentHeader {
	pub fn to_bytes(self) -> [u8; HEADER_LEN] {
		let mode = if self.responder {
			self.protocol | RESPONDER_FLAG
		} else {
			self.protocol
		};
		let mut out = [0u8; HEADER_LEN];
		out[..4].copy_from_slice(&self.timestamp.to_be_bytes());
		out[4..6].copy_from_slice(&mode.to_be_bytes());
		out[6..].copy_from_slice(&self.length.to_be_bytes());
		out
	}

	pub fn from_bytes(raw: [u8; HEADER_LEN]) -> Self {
		let mode = u16::from_be_bytes([raw[4], raw[5]]);
		Self {
			timestamp: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
			protocol: mode & !RESPONDER_FLAG,
			responder: mode & RESPONDER_FLAG != 0,
			length: u16::from_be_bytes([raw[6], raw[7]]),
		}
	}
}

/// Sending half: encodes messages and splits them into segments.
pub struct MuxWriter<W> {
	writer: W,
	started: Instant,
	responder: bool,
}

impl<W: AsyncWrite + Unpin> MuxWriter<W> {
	/// Writer for the initiator side of the connection.
	pub fn new(writer: W) -> Self {
		Self {
			writer,
			started: Instant::now(),
			responder: false,
		}
	}

	/// Writer for the responder side; sets the mode bit on every segment.
	pub fn responder(writer: W) -> Self {
		Self {
			responder: true,
			..Self::new(writer)
		}
	}

	/// Sends `message` on `protocol`.
	pub async fn send<M: Encode<()>>(&mut self, protocol: u16, message: &M) -> Result<(), MuxError> {
		let payload = minicbor::to_vec(message).map_err(|e| MuxError::Encode(e.to_string()))?;
		self.send_raw(protocol, &payload).await
	}

	/// Sends an already encoded payload on `protocol`.
	pub async fn send_raw(&mut self, protocol: u16, payload: &[u8]) -> Result<(), MuxError> {
		for chunk in payload.chunks(MAX_SEGMENT_PAYLOAD) {
			let header = SegmentHeader {
				// wraps after ~71 minutes, as on the wire
				timestamp: self.started.elapsed().as_micros() as u32,
				protocol,
				responder: self.responder,
				length: chunk.len() as u16,
			};
			self.writer.write_all(&header.to_bytes()).await?;
			self.writer.write_all(chunk).await?;
		}
		self.writer.flush().await?;
		Ok(())
	}

	pub fn into_inner(self) -> W {
		self.writer
	}
}

/// Receiving half: reassembles segments per mini-protocol and decodes
/// complete messages.
pub struct MuxReader<R> {
	reader: R,
	buffers: HashMap<u16, BytesMut>,
}

impl<R: AsyncRead + Unpin> MuxReader<R> {
	pub fn new(reader: R) -> Self {
		Self {
			reader,
			buffers: HashMap::new(),
		}
	}

	/// Waits for the next complete message on `protocol`.
	pub async fn recv<M>(&mut self, protocol: u16) -> Result<M, MuxError>
	where
		M: for<'b> Decode<'b, ()>,
	{
		loop {
			if let Some(message) = self.try_decode(protocol)? {
				return Ok(message);
			}
			self.read_segment().await?;
		}
	}

	fn try_decode<M>(&mut self, protocol: u16) -> Result<Option<M>, MuxError>
	where
		M: for<'b> Decode<'b, ()>,
	{
		let Some(buffer) = self.buffers.get_mut(&protocol) else {
			return Ok(None);
		};
		if buffer.is_empty() {
			return Ok(None);
		}

		let mut decoder = minicbor::Decoder::new(&buffer[..]);
		match decoder.decode::<M>() {
			Ok(message) => {
				let used = decoder.position();
				buffer.advance(used);
				Ok(Some(message))
			},
			// partial message, wait for the next segment
			Err(e) if e.is_end_of_input() => Ok(None),
			Err(source) => Err(MuxError::Decode { protocol, source }),
		}
	}

	async fn read_segment(&mut self) -> Result<(), MuxError> {
		let mut raw = [0u8; HEADER_LEN];
		match self.reader.read_exact(&mut raw).await {
			Ok(_) => {},
			Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(MuxError::Closed),
			Err(e) => return Err(e.into()),
		}
		let header = SegmentHeader::from_bytes(raw);

		let mut payload = vec![0u8; usize::from(header.length)];
		self.reader.read_exact(&mut payload).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::UnexpectedEof {
				MuxError::Closed
			} else {
				e.into()
			}
		})?;

		tracing::trace!(
			protocol = header.protocol,
			responder = header.responder,
			length = header.length,
			"Received segment"
		);
		self.buffers
			.entry(header.protocol)
			.or_default()
			.extend_from_slice(&payload);
		Ok(())
	}

	pub fn into_inner(self) -> R {
		self.reader
	}
}
