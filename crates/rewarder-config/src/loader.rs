//! Multi-file configuration loading.
//!
//! The entry file may list other files under `include`. Included files are
//! merged section by section; defining the same top-level section twice is an
//! error, as is including a file that was already loaded.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loads a configuration file together with its includes.
pub struct ConfigLoader {
	base_path: PathBuf,
	loaded_files: HashSet<PathBuf>,
	/// Top-level section name to the file that defined it.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	/// Creates a loader resolving relative paths against `base_path`.
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads `config_path`, merges its includes and validates the result.
	///
	/// # Errors
	///
	/// Returns an error if a file cannot be read or parsed, a section is
	/// defined twice, a file is included twice or itself has includes, or
	/// validation fails.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let entry_path = self.resolve_path(config_path)?;
		let mut merged = self.read_table(&entry_path).await?;

		let includes = match merged.remove("include") {
			Some(value) => parse_includes(&value)?,
			None => Vec::new(),
		};
		self.claim_sections(&merged, &entry_path)?;

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let table = self.read_table(&include_path).await?;
			if table.contains_key("include") {
				return Err(ConfigError::Validation(format!(
					"Nested include in {} is not supported",
					include_path.display()
				)));
			}
			self.claim_sections(&table, &include_path)?;
			merged.extend(table);
		}

		tracing::debug!(
			files = self.loaded_files.len(),
			sections = self.section_sources.len(),
			"Loaded configuration files"
		);

		let rendered = toml::to_string(&toml::Value::Table(merged)).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		rendered.parse()
	}

	/// Reads one file, resolving environment variables before parsing.
	async fn read_table(&mut self, path: &Path) -> Result<toml::Table, ConfigError> {
		let canonical = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;
		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		let resolved = resolve_env_vars(&content)?;
		Ok(toml::from_str(&resolved)?)
	}

	fn claim_sections(&mut self, table: &toml::Table, source: &Path) -> Result<(), ConfigError> {
		for key in table.keys() {
			if let Some(existing) = self.section_sources.get(key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}. \
					Each top-level section must be unique across all configuration files.",
					key,
					existing.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

fn parse_includes(value: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match value {
		toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
		toml::Value::Array(items) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		_ => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}
