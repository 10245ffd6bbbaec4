use rewarder_types::ChainTransactionEvent;

/// Event type emitted by the chain follower for confirmed transactions.
pub const TRANSACTION_EVENT: &str = "chainsync.transaction";

/// Keeps transaction events that pay one of the watched addresses.
///
/// Inputs only carry output references, so matching is done on outputs.
#[derive(Debug, Clone)]
pub struct ChainFilter {
	watched: Vec<String>,
}

impl ChainFilter {
	pub fn new(watched: Vec<String>) -> Self {
		Self { watched }
	}

	pub fn watched(&self) -> &[String] {
		&self.watched
	}

	/// Whether an event of type `kind` should reach the engine.
	pub fn accepts(&self, kind: &str, event: &ChainTransactionEvent) -> bool {
		kind == TRANSACTION_EVENT && self.watched.iter().any(|address| event.pays_to(address))
	}
}
