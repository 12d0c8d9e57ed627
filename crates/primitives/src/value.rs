use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeId;

/// Plain data produced by resolving a dynamic value.
///
/// This is the only shape that crosses into control messages: every callable
/// and deferred computation has already been evaluated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
	#[default]
	Nil,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	List(Vec<Value>),
	Map(BTreeMap<String, Value>),
}

/// Conversion failure from [`Value`] into a concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, found {found}")]
pub struct ValueError {
	pub expected: &'static str,
	pub found: &'static str,
}

impl Value {
	/// Short name of the variant, used in diagnostics.
	pub const fn type_name(&self) -> &'static str {
		match self {
			Self::Nil => "nil",
			Self::Bool(_) => "bool",
			Self::Int(_) => "int",
			Self::Float(_) => "float",
			Self::Str(_) => "string",
			Self::List(_) => "list",
			Self::Map(_) => "map",
		}
	}

	pub const fn is_nil(&self) -> bool {
		matches!(self, Self::Nil)
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	pub const fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Numeric view; integers widen to floats.
	pub const fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Int(i) => Some(*i as f64),
			Self::Float(f) => Some(*f),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Self::List(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			Self::Map(map) => Some(map),
			_ => None,
		}
	}

	/// Interprets the value as a node identifier.
	pub fn as_node_id(&self) -> Result<NodeId, ValueError> {
		self.as_i64()
			.and_then(|raw| i32::try_from(raw).ok())
			.map(NodeId)
			.ok_or(ValueError {
				expected: "node id",
				found: self.type_name(),
			})
	}

	/// Interprets the value as a string, consuming it.
	pub fn into_string(self) -> Result<String, ValueError> {
		match self {
			Self::Str(s) => Ok(s),
			other => Err(ValueError {
				expected: "string",
				found: other.type_name(),
			}),
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Self::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Self::Int(v.into())
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Self::Int(v)
	}
}

impl From<f32> for Value {
	fn from(v: f32) -> Self {
		Self::Float(v.into())
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Self::Float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Self::Str(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Self::Str(v)
	}
}

impl From<NodeId> for Value {
	fn from(id: NodeId) -> Self {
		Self::Int(id.0.into())
	}
}

impl From<Vec<Value>> for Value {
	fn from(items: Vec<Value>) -> Self {
		Self::List(items)
	}
}

impl From<BTreeMap<String, Value>> for Value {
	fn from(map: BTreeMap<String, Value>) -> Self {
		Self::Map(map)
	}
}
