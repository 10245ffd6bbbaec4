//! Submission to a relay over the node-to-node tx-submission protocol.
//!
//! A connection is opened per transaction. After the handshake the session
//! advertises the transaction, serves its body when asked, and signals
//! completion when the peer comes back for more ids. The connection is kept
//! open for a grace period so the peer can finish validating before it sees
//! the socket close.

use crate::protocol::mux::{MuxReader, MuxWriter};
use crate::protocol::session::{SessionState, SubmissionSession};
use crate::protocol::{self, txsubmission};
use crate::{DeliveryError, DeliveryInterface, FatalSender};
use async_trait::async_trait;
use rewarder_types::RewardTransaction;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::instrument;

/// Submits each transaction over a fresh connection to a relay.
pub struct NodeToNodeTransport {
	address: String,
	network_magic: u32,
	grace_period: Duration,
	fatal: FatalSender,
}

impl NodeToNodeTransport {
	/// Creates a transport for the relay at `address` (`host:port`).
	///
	/// # Arguments
	///
	/// * `network_magic` - Proposed in the handshake; the peer refuses a
	///   different network
	/// * `grace_period` - How long the connection stays open after the peer
	///   has taken the transaction
	/// * `fatal` - Receives errors of the background protocol task
	pub fn new(address: String, network_magic: u32, grace_period: Duration, fatal: FatalSender) -> Self {
		Self {
			address,
			network_magic,
			grace_period,
			fatal,
		}
	}
}

#[async_trait]
impl DeliveryInterface for NodeToNodeTransport {
	fn name(&self) -> &'static str {
		"node-to-node"
	}

	#[instrument(skip_all, fields(peer = %self.address, tx_id = %tx.id))]
	async fn submit(&self, tx: &RewardTransaction) -> Result<(), DeliveryError> {
		let stream = TcpStream::connect(&self.address)
			.await
			.map_err(|e| DeliveryError::Connect(format!("{}: {}", self.address, e)))?;
		let (read_half, write_half) = stream.into_split();
		let mut reader = MuxReader::new(read_half);
		let mut writer = MuxWriter::new(write_half);

		let version = protocol::handshake(&mut reader, &mut writer, self.network_magic)
			.await
			.map_err(|e| DeliveryError::Protocol(e.to_string()))?;
		tracing::debug!(version, "Handshake accepted");

		let (mut session, completed) = SubmissionSession::new(tx.clone());
		session.set_state(SessionState::Connected);
		writer
			.send(txsubmission::PROTOCOL_ID, &txsubmission::Message::Init)
			.await
			.map_err(|e| DeliveryError::Protocol(e.to_string()))?;

		let (stop, stopped) = oneshot::channel();
		let fatal = self.fatal.clone();
		let peer = self.address.clone();
		let task = tokio::spawn(async move {
			let (writer, result) = protocol::serve_tx_submission(reader, writer, session, stopped).await;
			if let Err(e) = &result {
				tracing::error!(peer = %peer, error = %e, "Tx-submission protocol failed");
				let _ = fatal.send(DeliveryError::Protocol(format!("{}: {}", peer, e)));
			}
			(writer, result)
		});

		// errors only if the protocol task ended without completing
		let delivered = completed.await.is_ok();
		if delivered {
			tracing::debug!(grace_ms = self.grace_period.as_millis() as u64, "Peer fetched transaction");
			tokio::time::sleep(self.grace_period).await;
		}
		let _ = stop.send(());

		let (writer, result) = task
			.await
			.map_err(|e| DeliveryError::Protocol(format!("protocol task panicked: {}", e)))?;
		let mut write_half = writer.into_inner();
		let shutdown = write_half.shutdown().await;

		result.map_err(|e| DeliveryError::Protocol(e.to_string()))?;
		if !delivered {
			return Err(DeliveryError::Protocol(
				"peer ended tx-submission before fetching the transaction".into(),
			));
		}
		shutdown.map_err(|e| DeliveryError::Close(e.to_string()))?;

		tracing::info!("Transaction delivered to peer");
		Ok(())
	}
}
