use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer handle naming a runtime object (synth or group) on one server.
///
/// Identifiers are unique for the lifetime of the server that allocated them
/// and are never reused while it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i32);

/// The root group every server starts with.
pub const ROOT_GROUP: NodeId = NodeId(0);

impl NodeId {
	/// Returns the raw integer identifier.
	pub const fn get(self) -> i32 {
		self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i32> for NodeId {
	fn from(raw: i32) -> Self {
		Self(raw)
	}
}

impl From<NodeId> for i32 {
	fn from(id: NodeId) -> Self {
		id.0
	}
}
