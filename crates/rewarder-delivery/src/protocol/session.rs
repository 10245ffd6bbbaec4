//! State of a single-transaction submission.

use super::txsubmission::{EraTxBody, EraTxId, TxSubmissionHandler};
use rewarder_types::RewardTransaction;
use tokio::sync::oneshot;

/// Progress of a [`SubmissionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Idle,
	Connected,
	/// Id advertised, body not yet served.
	Advertising,
	/// Body served, waiting for the peer's next id request.
	Delivering,
	/// Completion signalled; grace period before closing.
	Draining,
	Closed,
}

/// Serves one transaction to the peer and signals completion once the peer
/// asks for more ids after receiving the body.
pub struct SubmissionSession {
	tx: RewardTransaction,
	sent: bool,
	state: SessionState,
	done: Option<oneshot::Sender<()>>,
}

impl SubmissionSession {
	/// Creates a session for `tx`. The receiver fires once the peer has taken
	/// the transaction.
	pub fn new(tx: RewardTransaction) -> (Self, oneshot::Receiver<()>) {
		let (done, completed) = oneshot::channel();
		let session = Self {
			tx,
			sent: false,
			state: SessionState::Idle,
			done: Some(done),
		};
		(session, completed)
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn set_state(&mut self, state: SessionState) {
		self.state = state;
	}

	/// Whether the body has been served to the peer.
	pub fn is_sent(&self) -> bool {
		self.sent
	}

	fn era_id(&self) -> EraTxId {
		EraTxId {
			era: self.tx.era.index(),
			id: *self.tx.id.as_bytes(),
		}
	}

	fn complete(&mut self) {
		if let Some(done) = self.done.take() {
			self.state = SessionState::Draining;
			// receiver gone means submit already gave up
			let _ = done.send(());
		}
	}
}

impl TxSubmissionHandler for SubmissionSession {
	fn request_tx_ids(&mut self, blocking: bool, ack: u16, req: u16) -> Vec<(EraTxId, u32)> {
		tracing::debug!(blocking, ack, req, sent = self.sent, "Peer requested tx ids");
		if self.sent {
			self.complete();
			return Vec::new();
		}
		self.state = SessionState::Advertising;
		vec![(self.era_id(), self.tx.size() as u32)]
	}

	fn request_txs(&mut self, ids: &[EraTxId]) -> Vec<EraTxBody> {
		tracing::debug!(requested = ids.len(), tx_id = %self.tx.id, "Peer requested tx bodies");
		self.sent = true;
		self.state = SessionState::Delivering;
		vec![EraTxBody {
			era: self.tx.era.index(),
			bytes: self.tx.bytes.clone(),
		}]
	}
}
