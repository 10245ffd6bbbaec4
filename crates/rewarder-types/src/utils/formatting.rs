//! Display helpers for log lines.

/// Shortens a hex id to its first 8 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Renders a lovelace amount as ADA with six decimals, e.g. `5.000000 ADA`.
pub fn format_lovelace(lovelace: u64) -> String {
	format!("{}.{:06} ADA", lovelace / 1_000_000, lovelace % 1_000_000)
}
