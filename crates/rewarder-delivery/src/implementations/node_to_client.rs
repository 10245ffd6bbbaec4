//! Local node socket (node-to-client) submission.
//!
//! Only the transport selection is in place; the local tx-submission
//! mini-protocol is not implemented and every submission fails.

use crate::{DeliveryError, DeliveryInterface};
use async_trait::async_trait;
use rewarder_types::RewardTransaction;

/// Placeholder transport for a local node socket.
pub struct NodeToClientTransport {
	socket_path: String,
}

impl NodeToClientTransport {
	pub fn new(socket_path: String) -> Self {
		Self { socket_path }
	}
}

#[async_trait]
impl DeliveryInterface for NodeToClientTransport {
	fn name(&self) -> &'static str {
		"node-to-client"
	}

	async fn submit(&self, tx: &RewardTransaction) -> Result<(), DeliveryError> {
		tracing::warn!(socket_path = %self.socket_path, tx_id = %tx.id, "Node-to-client submission is not available");
		Err(DeliveryError::NotSupported(format!(
			"node-to-client submission via {}; configure submit.address or submit.url",
			self.socket_path
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rewarder_types::{Era, TransactionId};

	#[tokio::test]
	async fn test_submit_is_explicit_failure() {
		let transport = NodeToClientTransport::new("/run/cardano/node.socket".into());
		let tx = RewardTransaction {
			bytes: vec![0x80],
			id: TransactionId([3; 32]),
			era: Era::Conway,
		};
		assert!(matches!(
			transport.submit(&tx).await,
			Err(DeliveryError::NotSupported(msg)) if msg.contains("node.socket")
		));
	}
}
