//! Boot options and engine configuration.

use std::collections::BTreeMap;
use std::path::Path;

use canopy_primitives::Value;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// First node id handed out on a freshly booted server.
///
/// Ids below this are left to the server itself (root group, default group).
pub const FIRST_NODE_ID: i32 = 1000;

/// Key/value options passed to a server or interpreter boot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootOptions(BTreeMap<String, Value>);

impl BootOptions {
	/// Creates an empty option set.
	pub fn new() -> Self {
		Self::default()
	}

	/// The stated defaults shared by servers and interpreters.
	pub fn defaults() -> Self {
		Self::new().set("stdin", false).set("echo", true).set("debug", false)
	}

	/// Sets one option.
	#[must_use]
	pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// Reads a boolean option, treating absence as `false`.
	pub fn flag(&self, key: &str) -> bool {
		matches!(self.0.get(key), Some(Value::Bool(true)))
	}

	/// The first node id a server booted with these options should allocate.
	pub fn first_node_id(&self) -> i32 {
		self.get("first_node_id")
			.and_then(Value::as_i64)
			.and_then(|raw| i32::try_from(raw).ok())
			.unwrap_or(FIRST_NODE_ID)
	}

	/// Returns `self` layered over `defaults`; keys set in `self` win.
	#[must_use]
	pub fn merged_over(&self, defaults: &BootOptions) -> BootOptions {
		let mut merged = defaults.0.clone();
		merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
		Self(merged)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}
}

/// How a stream reacts to errors pushed by its source or raised by its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorPolicy {
	/// Log the error and keep consuming the source.
	#[default]
	Log,
	/// Stop the stream and fail with the error.
	FailFast,
}

/// Stream behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
	pub on_error: StreamErrorPolicy,
}

/// Process-wide engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Defaults applied under caller options when booting a server.
	pub server: BootOptions,
	/// Defaults applied under caller options when booting an interpreter.
	pub interpreter: BootOptions,
	pub stream: StreamOptions,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			server: BootOptions::defaults(),
			interpreter: BootOptions::defaults(),
			stream: StreamOptions::default(),
		}
	}
}

impl EngineConfig {
	/// Parses a TOML document. Missing boot options fall back to
	/// [`BootOptions::defaults`].
	pub fn from_toml_str(text: &str) -> Result<Self> {
		let parsed: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
		let defaults = BootOptions::defaults();
		Ok(Self {
			server: parsed.server.merged_over(&defaults),
			interpreter: parsed.interpreter.merged_over(&defaults),
			stream: parsed.stream,
		})
	}

	/// Reads and parses a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
		let config = Self::from_toml_str(&text)?;
		tracing::debug!(path = %path.display(), "engine.config.loaded");
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn caller_options_win_over_defaults() {
		let caller = BootOptions::new().set("echo", false).set("port", 57110);
		let merged = caller.merged_over(&BootOptions::defaults());
		assert!(!merged.flag("echo"));
		assert!(!merged.flag("stdin"));
		assert_eq!(merged.get("port"), Some(&Value::Int(57110)));
		assert_eq!(merged.iter().count(), 4);
	}

	#[test]
	fn first_node_id_defaults_when_absent() {
		assert_eq!(BootOptions::new().first_node_id(), FIRST_NODE_ID);
		assert_eq!(BootOptions::new().set("first_node_id", 2000).first_node_id(), 2000);
	}

	#[test]
	fn toml_sections_are_layered_over_defaults() {
		let config = EngineConfig::from_toml_str(
			r#"
			[server]
			echo = false
			port = 57120

			[stream]
			on_error = "fail_fast"
			"#,
		)
		.unwrap();
		assert!(!config.server.flag("echo"));
		assert_eq!(config.server.get("stdin"), Some(&Value::Bool(false)));
		assert_eq!(config.interpreter, BootOptions::defaults());
		assert_eq!(config.stream.on_error, StreamErrorPolicy::FailFast);
	}

	#[test]
	fn malformed_toml_is_a_config_error() {
		let err = EngineConfig::from_toml_str("[server").unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig);
	}

	#[test]
	fn load_reads_from_disk() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[interpreter]\ndebug = true").unwrap();
		let config = EngineConfig::load(file.path()).unwrap();
		assert!(config.interpreter.flag("debug"));
		assert!(config.interpreter.flag("echo"));
	}
}
