//! Registry trait for implementations selectable by name in the configuration.

/// Ties a configuration name to the factory that builds the implementation.
///
/// Each pluggable module (account, discovery, composer) exposes a `Registry`
/// struct implementing this trait, so the service can assemble its factory
/// maps without hard-coding names in two places.
pub trait ImplementationRegistry {
	/// Key used under `[<section>.implementations.<NAME>]`.
	const NAME: &'static str;

	/// Factory function type for the module.
	type Factory;

	fn factory() -> Self::Factory;
}
