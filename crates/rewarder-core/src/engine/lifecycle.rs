//! Startup and shutdown of the rewarder engine.

use super::{EngineError, RewarderEngine};

impl RewarderEngine {
	/// Logs the effective setup before events start flowing.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		let reward = &self.config.reward;
		tracing::info!(
			rewarder_id = %self.config.rewarder.id,
			network = %self.config.rewarder.network,
			wallet = %self.payment_handler.monitored_address(),
			utxo_backend = self.utxo.backend_name().unwrap_or("none"),
			transport = self.delivery.transport_name(),
			"Initializing rewarder engine"
		);
		tracing::info!(
			min_lovelace = reward.min_lovelace,
			reward_amount = reward.reward_amount,
			reward_address = reward.reward_address.as_deref().unwrap_or("(none)"),
			source_address = reward.source_address.as_deref().unwrap_or("(any)"),
			"Reward policy"
		);
		Ok(())
	}

	/// Stops every discovery source. Called by [`run`](Self::run) on exit.
	pub(crate) async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down rewarder engine");

		self.discovery
			.stop_all()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;

		Ok(())
	}
}
