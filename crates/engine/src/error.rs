//! Error taxonomy for tree evaluation.

use std::fmt;

use canopy_primitives::NodeId;
use thiserror::Error;

/// A convenient type alias for `Result` with `E` = [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Which collaborator a boot or availability error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
	Server,
	Interpreter,
}

impl fmt::Display for TargetKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Server => "server",
			Self::Interpreter => "interpreter",
		})
	}
}

/// The step of a spawning primitive that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnStage {
	/// Resolving the definition selector.
	Definition,
	/// Resolving the argument mapping.
	Arguments,
	/// Handing the control message to the transport.
	Send,
	/// Waiting for the server to report the node running.
	Confirmation,
}

impl fmt::Display for SpawnStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Definition => "definition",
			Self::Arguments => "arguments",
			Self::Send => "send",
			Self::Confirmation => "confirmation",
		})
	}
}

/// Flat classification of an [`EngineError`], looking through spawn wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	ResolutionFailed,
	BootFailed,
	CompileFailed,
	EngineUnavailable,
	SendFailed,
	Abandoned,
	InvalidConfig,
}

/// Possible errors while evaluating a tree.
///
/// Errors are `Clone` so a deferred value can be awaited by every consumer
/// that shares it.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EngineError {
	/// A callable or deferred computation inside a dynamic value failed.
	///
	/// `label` is the dotted path of the slot being resolved; it is empty
	/// until the resolver attaches it.
	#[error("failed to resolve `{label}`: {message}")]
	Resolution { label: String, message: String },
	/// A server or interpreter failed to start.
	#[error("failed to boot {target}: {message}")]
	BootFailed { target: TargetKind, message: String },
	/// The interpreter rejected a synth definition.
	#[error("failed to compile synth definition `{def_name}`: {error}")]
	CompileFailed {
		def_name: String,
		/// Diagnostic text reported by the interpreter.
		error: String,
		/// The caller's source fragment, kept for diagnostics.
		source_code: String,
	},
	/// The target went away or was never present.
	#[error("engine unavailable: {reason}")]
	EngineUnavailable { reason: String },
	/// The transport refused a control message.
	#[error("failed to send {address}: {message}")]
	Send { address: &'static str, message: String },
	/// A spawning primitive failed; `stage` names where.
	#[error("{stage} stage failed{}: {source}", node_suffix(.node_id))]
	Spawn {
		stage: SpawnStage,
		node_id: Option<NodeId>,
		source: Box<EngineError>,
	},
	/// The owning subtree was torn down while this evaluation was pending.
	#[error("evaluation abandoned")]
	Abandoned,
	/// Configuration could not be read or parsed.
	#[error("invalid configuration: {0}")]
	Config(String),
}

fn node_suffix(node_id: &Option<NodeId>) -> String {
	node_id.map(|id| format!(" for node {id}")).unwrap_or_default()
}

impl EngineError {
	/// Creates an unlabelled resolution failure for use inside callables.
	pub fn resolution(message: impl Into<String>) -> Self {
		Self::Resolution {
			label: String::new(),
			message: message.into(),
		}
	}

	/// Creates an availability failure.
	pub fn unavailable(reason: impl Into<String>) -> Self {
		Self::EngineUnavailable { reason: reason.into() }
	}

	/// Wraps `self` as the failure of one spawn stage.
	pub fn at_stage(self, stage: SpawnStage, node_id: Option<NodeId>) -> Self {
		Self::Spawn {
			stage,
			node_id,
			source: Box::new(self),
		}
	}

	/// Attaches the slot label to an unlabelled resolution failure.
	pub(crate) fn labelled(self, label: &str) -> Self {
		match self {
			Self::Resolution { label: existing, message } if existing.is_empty() => Self::Resolution {
				label: label.to_owned(),
				message,
			},
			other => other,
		}
	}

	/// Returns the innermost error below any spawn wrappers.
	pub fn root_cause(&self) -> &EngineError {
		let mut current = self;
		while let Self::Spawn { source, .. } = current {
			current = source;
		}
		current
	}

	/// Returns the stage of the outermost spawn wrapper, if any.
	pub fn stage(&self) -> Option<SpawnStage> {
		match self {
			Self::Spawn { stage, .. } => Some(*stage),
			_ => None,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Spawn { source, .. } => source.kind(),
			Self::Resolution { .. } => ErrorKind::ResolutionFailed,
			Self::BootFailed { .. } => ErrorKind::BootFailed,
			Self::CompileFailed { .. } => ErrorKind::CompileFailed,
			Self::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
			Self::Send { .. } => ErrorKind::SendFailed,
			Self::Abandoned => ErrorKind::Abandoned,
			Self::Config(_) => ErrorKind::InvalidConfig,
		}
	}

	/// True for silent cancellations that callers should not report.
	pub fn is_abandoned(&self) -> bool {
		self.kind() == ErrorKind::Abandoned
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn labelled_only_fills_empty_labels() {
		let err = EngineError::resolution("boom").labelled("args.freq");
		assert_eq!(err.to_string(), "failed to resolve `args.freq`: boom");
		let again = err.clone().labelled("other");
		assert_eq!(again, err);
	}

	#[test]
	fn kind_and_root_cause_see_through_spawn_layers() {
		let inner = EngineError::unavailable("server quit");
		let err = inner.clone().at_stage(SpawnStage::Confirmation, Some(NodeId(1001))).at_stage(SpawnStage::Definition, None);
		assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
		assert_eq!(err.root_cause(), &inner);
		assert_eq!(err.stage(), Some(SpawnStage::Definition));
	}

	#[test]
	fn spawn_display_names_stage_and_node() {
		let err = EngineError::resolution("nope").at_stage(SpawnStage::Arguments, Some(NodeId(1000)));
		assert_eq!(err.to_string(), "arguments stage failed for node 1000: failed to resolve ``: nope");
	}
}
