//! Process-wide state shared by every context, partitioned per server.
//!
//! Each server target owns a [`ServerState`] with typed accessors for the
//! synth-definition cache and the node metadata index. Writes replace whole
//! values under a lock, so concurrent writers to one key end with one of the
//! written values and never a mix.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use canopy_primitives::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// What kind of node a metadata entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
	Synth,
	Group,
}

/// Best-effort annotation for one node on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
	pub kind: NodeKind,
	/// Group the node was appended to.
	pub parent: NodeId,
	/// Definition a synth was spawned from.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub def_name: Option<String>,
}

impl NodeState {
	pub fn synth(parent: NodeId, def_name: impl Into<String>) -> Self {
		Self {
			kind: NodeKind::Synth,
			parent,
			def_name: Some(def_name.into()),
		}
	}

	pub fn group(parent: NodeId) -> Self {
		Self {
			kind: NodeKind::Group,
			parent,
			def_name: None,
		}
	}
}

/// State attached to one server target for its lifetime.
#[derive(Debug, Default)]
pub struct ServerState {
	synth_defs: RwLock<BTreeMap<String, JsonValue>>,
	nodes: RwLock<HashMap<NodeId, NodeState>>,
}

impl ServerState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores a compiled definition's descriptor, replacing any previous one.
	pub fn put_synth_def(&self, name: impl Into<String>, descriptor: JsonValue) {
		let name = name.into();
		tracing::debug!(def = %name, "engine.store.put_synth_def");
		self.synth_defs.write().insert(name, descriptor);
	}

	pub fn synth_def(&self, name: &str) -> Option<JsonValue> {
		self.synth_defs.read().get(name).cloned()
	}

	/// Names of every stored definition, sorted.
	pub fn synth_def_names(&self) -> Vec<String> {
		self.synth_defs.read().keys().cloned().collect()
	}

	/// Records metadata for a node, replacing any previous entry.
	pub fn record_node(&self, node_id: NodeId, state: NodeState) {
		self.nodes.write().insert(node_id, state);
	}

	pub fn node(&self, node_id: NodeId) -> Option<NodeState> {
		self.nodes.read().get(&node_id).cloned()
	}

	/// Drops metadata for a freed node.
	pub fn forget_node(&self, node_id: NodeId) -> Option<NodeState> {
		self.nodes.write().remove(&node_id)
	}

	pub fn node_count(&self) -> usize {
		self.nodes.read().len()
	}
}

/// Process-wide store handed to server boots.
#[derive(Debug, Clone, Default)]
pub struct Store {
	servers: Arc<RwLock<HashMap<String, Arc<ServerState>>>>,
}

impl Store {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the state for the server named `key`, creating it on first use.
	pub fn server_state(&self, key: &str) -> Arc<ServerState> {
		if let Some(state) = self.servers.read().get(key) {
			return Arc::clone(state);
		}
		let mut servers = self.servers.write();
		Arc::clone(servers.entry(key.to_owned()).or_default())
	}

	/// Destroys the state for a server that has gone away.
	pub fn remove_server(&self, key: &str) -> Option<Arc<ServerState>> {
		self.servers.write().remove(key)
	}

	pub fn server_count(&self) -> usize {
		self.servers.read().len()
	}
}
