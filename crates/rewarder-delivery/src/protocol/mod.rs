//! Ouroboros node-to-node protocol pieces needed to push one transaction.

pub mod handshake;
pub mod mux;
pub mod session;
pub mod txsubmission;

use mux::{MuxError, MuxReader, MuxWriter};
use session::{SessionState, SubmissionSession};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use txsubmission::Message;

/// Errors that end a node-to-node exchange.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error(transparent)]
	Mux(#[from] MuxError),
	#[error("Handshake refused: {0}")]
	Refused(String),
	/// A message arrived that the current protocol state does not allow.
	#[error("Unexpected {message} on {protocol}")]
	Unexpected {
		protocol: &'static str,
		message: String,
	},
}

/// Runs the version handshake as initiator and returns the agreed version.
pub async fn handshake<R, W>(
	reader: &mut MuxReader<R>,
	writer: &mut MuxWriter<W>,
	network_magic: u32,
) -> Result<u64, ProtocolError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	writer
		.send(handshake::PROTOCOL_ID, &handshake::Message::propose(network_magic))
		.await?;

	match reader.recv(handshake::PROTOCOL_ID).await? {
		handshake::Message::AcceptVersion(version, data) => {
			if data.network_magic != network_magic {
				return Err(ProtocolError::Refused(format!(
					"peer accepted v{} with network magic {}, expected {}",
					version, data.network_magic, network_magic
				)));
			}
			Ok(version)
		},
		handshake::Message::Refuse(reason) => Err(ProtocolError::Refused(reason)),
		other => Err(ProtocolError::Unexpected {
			protocol: "handshake",
			message: format!("{:?}", other),
		}),
	}
}

/// Answers tx-submission requests from the peer until `stop` fires.
///
/// Consumes the session, so its completion sender is dropped when this
/// returns. Returns the writer half for the caller to shut down. A peer
/// closing the connection after completion is not an error.
pub async fn serve_tx_submission<R, W>(
	mut reader: MuxReader<R>,
	mut writer: MuxWriter<W>,
	mut session: SubmissionSession,
	mut stop: oneshot::Receiver<()>,
) -> (MuxWriter<W>, Result<(), ProtocolError>)
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let result = serve_requests(&mut reader, &mut writer, &mut session, &mut stop).await;

	tracing::debug!(from = ?session.state(), sent = session.is_sent(), "Tx-submission session closed");
	session.set_state(SessionState::Closed);
	(writer, result)
}

async fn serve_requests<R, W>(
	reader: &mut MuxReader<R>,
	writer: &mut MuxWriter<W>,
	session: &mut SubmissionSession,
	stop: &mut oneshot::Receiver<()>,
) -> Result<(), ProtocolError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	loop {
		let received = tokio::select! {
			_ = &mut *stop => return Ok(()),
			received = reader.recv::<Message>(txsubmission::PROTOCOL_ID) => received,
		};
		let request = match received {
			Ok(request) => request,
			Err(MuxError::Closed) if session.state() == SessionState::Draining => return Ok(()),
			Err(e) => return Err(e.into()),
		};

		let Some(reply) = txsubmission::respond(session, &request) else {
			return Err(ProtocolError::Unexpected {
				protocol: "tx-submission",
				message: format!("{:?}", request),
			});
		};
		writer.send(txsubmission::PROTOCOL_ID, &reply).await?;

		if reply == Message::Done {
			// protocol terminated; nothing more will arrive on it
			let _ = (&mut *stop).await;
			return Ok(());
		}
	}
}
