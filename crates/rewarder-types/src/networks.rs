//! Well-known Cardano networks.
//!
//! Each entry carries the protocol magic used in the node-to-node handshake,
//! the public bootstrap relays used when no submission target is configured,
//! and the Blockfrost API root for that network.

use serde::Serialize;

/// A relay host and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Peer {
	pub host: &'static str,
	pub port: u16,
}

impl Peer {
	/// `host:port` for dialing.
	pub fn address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

/// Static description of a known network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
	pub name: &'static str,
	/// Protocol magic proposed in the handshake.
	pub magic: u32,
	pub bootstrap_peers: &'static [Peer],
	pub blockfrost_url: Option<&'static str>,
}

pub const MAINNET: NetworkInfo = NetworkInfo {
	name: "mainnet",
	magic: 764824073,
	bootstrap_peers: &[
		Peer {
			host: "backbone.cardano.iog.io",
			port: 3001,
		},
		Peer {
			host: "backbone.mainnet.emurgornd.com",
			port: 3001,
		},
		Peer {
			host: "backbone.mainnet.cardanofoundation.org",
			port: 3001,
		},
	],
	blockfrost_url: Some("https://cardano-mainnet.blockfrost.io/api/v0"),
};

pub const PREPROD: NetworkInfo = NetworkInfo {
	name: "preprod",
	magic: 1,
	bootstrap_peers: &[Peer {
		host: "preprod-node.play.dev.cardano.org",
		port: 3001,
	}],
	blockfrost_url: Some("https://cardano-preprod.blockfrost.io/api/v0"),
};

pub const PREVIEW: NetworkInfo = NetworkInfo {
	name: "preview",
	magic: 2,
	bootstrap_peers: &[Peer {
		host: "preview-node.play.dev.cardano.org",
		port: 3001,
	}],
	blockfrost_url: Some("https://cardano-preview.blockfrost.io/api/v0"),
};

pub const SANCHONET: NetworkInfo = NetworkInfo {
	name: "sanchonet",
	magic: 4,
	bootstrap_peers: &[Peer {
		host: "sanchonet-node.play.dev.cardano.org",
		port: 3001,
	}],
	blockfrost_url: None,
};

/// Local development network; it has no public relays.
pub const DEVNET: NetworkInfo = NetworkInfo {
	name: "devnet",
	magic: 42,
	bootstrap_peers: &[],
	blockfrost_url: None,
};

const KNOWN_NETWORKS: [NetworkInfo; 5] = [MAINNET, PREPROD, PREVIEW, SANCHONET, DEVNET];

/// Looks up a network by name (case-insensitive).
pub fn network_by_name(name: &str) -> Option<&'static NetworkInfo> {
	KNOWN_NETWORKS
		.iter()
		.find(|network| network.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_by_name() {
		assert_eq!(network_by_name("preprod").unwrap().magic, 1);
		assert_eq!(network_by_name("MAINNET").unwrap().magic, 764824073);
		assert!(network_by_name("unknown").is_none());
	}

	#[test]
	fn test_devnet_has_no_peers() {
		let devnet = network_by_name("devnet").unwrap();
		assert!(devnet.bootstrap_peers.is_empty());
		assert_eq!(
			PREPROD.bootstrap_peers[0].address(),
			"preprod-node.play.dev.cardano.org:3001"
		);
	}
}
