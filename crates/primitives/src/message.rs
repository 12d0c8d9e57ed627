use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{NodeId, Value};

/// Placement of a new node relative to its target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddAction {
	/// First child of the target group.
	Head,
	/// Last child of the target group.
	Tail,
	/// Immediately before the target node.
	Before,
	/// Immediately after the target node.
	After,
	/// Replaces the target node.
	Replace,
}

impl AddAction {
	/// Numeric code used on the wire.
	pub const fn code(self) -> i32 {
		match self {
			Self::Head => 0,
			Self::Tail => 1,
			Self::Before => 2,
			Self::After => 3,
			Self::Replace => 4,
		}
	}
}

/// A control message addressed to a synthesis server.
///
/// Byte layout is owned by the transport; this type only fixes the
/// semantic content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
	/// Create a synth from a loaded definition.
	SynthNew {
		def_name: String,
		node_id: NodeId,
		add_action: AddAction,
		target: NodeId,
		args: BTreeMap<String, Value>,
	},
	/// Create an empty group.
	GroupNew { node_id: NodeId, add_action: AddAction, target: NodeId },
	/// Load a compiled definition.
	DefRecv { bytes: Vec<u8> },
	/// Free one or more nodes.
	NodeFree { node_ids: Vec<NodeId> },
}

impl Message {
	/// Creates a synth creation message.
	pub fn synth_new(def_name: impl Into<String>, node_id: NodeId, add_action: AddAction, target: NodeId, args: BTreeMap<String, Value>) -> Self {
		Self::SynthNew {
			def_name: def_name.into(),
			node_id,
			add_action,
			target,
			args,
		}
	}

	/// Creates a group creation message.
	pub fn group_new(node_id: NodeId, add_action: AddAction, target: NodeId) -> Self {
		Self::GroupNew { node_id, add_action, target }
	}

	/// Creates a definition upload message.
	pub fn def_recv(bytes: impl Into<Vec<u8>>) -> Self {
		Self::DefRecv { bytes: bytes.into() }
	}

	/// Creates a node free message.
	pub fn node_free(node_ids: impl IntoIterator<Item = NodeId>) -> Self {
		Self::NodeFree {
			node_ids: node_ids.into_iter().collect(),
		}
	}

	/// Command address the transport should use.
	pub const fn address(&self) -> &'static str {
		match self {
			Self::SynthNew { .. } => "/s_new",
			Self::GroupNew { .. } => "/g_new",
			Self::DefRecv { .. } => "/d_recv",
			Self::NodeFree { .. } => "/n_free",
		}
	}

	/// The node this message creates, if any.
	pub const fn created_node(&self) -> Option<NodeId> {
		match self {
			Self::SynthNew { node_id, .. } | Self::GroupNew { node_id, .. } => Some(*node_id),
			Self::DefRecv { .. } | Self::NodeFree { .. } => None,
		}
	}
}
