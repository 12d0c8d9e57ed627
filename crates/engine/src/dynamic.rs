//! Values that still need evaluating against a [`Context`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use canopy_primitives::{BoxFutureStatic, NodeId, Value};
use futures::FutureExt;
use futures::future::Shared;

use crate::{Context, Result};

/// Signature of a callable slot: invoked with the evaluating context, it
/// eventually produces another dynamic value.
pub type CallableFn = dyn Fn(Context) -> BoxFutureStatic<Result<Dynamic>> + Send + Sync;

/// A computation started ahead of resolution whose result may be awaited by
/// several consumers.
pub type DeferredValue = Shared<BoxFutureStatic<Result<Dynamic>>>;

/// A value that may be literal, computed from the context, awaited, or a
/// structure of further dynamic values.
///
/// Tree nodes built by the composition primitives are callables, so a child
/// list is just a list of dynamic values.
#[derive(Clone)]
pub enum Dynamic {
	Literal(Value),
	Callable(Arc<CallableFn>),
	Deferred(DeferredValue),
	Map(BTreeMap<String, Dynamic>),
	List(Vec<Dynamic>),
}

impl fmt::Debug for Dynamic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
			Self::Callable(_) => f.write_str("Callable(..)"),
			Self::Deferred(_) => f.write_str("Deferred(..)"),
			Self::Map(entries) => f.debug_map().entries(entries.iter()).finish(),
			Self::List(items) => f.debug_list().entries(items.iter()).finish(),
		}
	}
}

impl Default for Dynamic {
	fn default() -> Self {
		Self::Literal(Value::Nil)
	}
}

impl Dynamic {
	/// Wraps a plain value.
	pub fn literal(value: impl Into<Value>) -> Self {
		Self::Literal(value.into())
	}

	/// Wraps a synchronous callable.
	pub fn from_fn<F>(f: F) -> Self
	where
		F: Fn(&Context) -> Result<Dynamic> + Send + Sync + 'static,
	{
		Self::Callable(Arc::new(move |ctx: Context| {
			let out = f(&ctx);
			std::future::ready(out).boxed()
		}))
	}

	/// Wraps an asynchronous callable.
	pub fn from_async<F, Fut>(f: F) -> Self
	where
		F: Fn(Context) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Dynamic>> + Send + 'static,
	{
		Self::Callable(Arc::new(move |ctx: Context| f(ctx).boxed()))
	}

	/// Wraps a computation that does not depend on the context.
	///
	/// The future runs at most once; every resolution of a clone of this
	/// value observes the same outcome.
	pub fn deferred<Fut>(fut: Fut) -> Self
	where
		Fut: Future<Output = Result<Dynamic>> + Send + 'static,
	{
		Self::Deferred(fut.boxed().shared())
	}

	/// Builds a named mapping of dynamic values.
	pub fn map<K, I>(entries: I) -> Self
	where
		K: Into<String>,
		I: IntoIterator<Item = (K, Dynamic)>,
	{
		Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
	}

	/// Builds an ordered collection of dynamic values.
	pub fn list(items: impl IntoIterator<Item = Dynamic>) -> Self {
		Self::List(items.into_iter().collect())
	}
}

impl From<Value> for Dynamic {
	fn from(v: Value) -> Self {
		Self::Literal(v)
	}
}

impl From<&str> for Dynamic {
	fn from(v: &str) -> Self {
		Self::Literal(v.into())
	}
}

impl From<String> for Dynamic {
	fn from(v: String) -> Self {
		Self::Literal(v.into())
	}
}

impl From<bool> for Dynamic {
	fn from(v: bool) -> Self {
		Self::Literal(v.into())
	}
}

impl From<i32> for Dynamic {
	fn from(v: i32) -> Self {
		Self::Literal(v.into())
	}
}

impl From<i64> for Dynamic {
	fn from(v: i64) -> Self {
		Self::Literal(v.into())
	}
}

impl From<f64> for Dynamic {
	fn from(v: f64) -> Self {
		Self::Literal(v.into())
	}
}

impl From<NodeId> for Dynamic {
	fn from(id: NodeId) -> Self {
		Self::Literal(id.into())
	}
}

impl From<Vec<Dynamic>> for Dynamic {
	fn from(items: Vec<Dynamic>) -> Self {
		Self::List(items)
	}
}

impl From<Option<String>> for Dynamic {
	fn from(v: Option<String>) -> Self {
		v.map_or(Self::Literal(Value::Nil), Self::from)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_hides_closures() {
		let d = Dynamic::list([Dynamic::from("sine"), Dynamic::from_fn(|_| Ok(Dynamic::default()))]);
		assert_eq!(format!("{d:?}"), r#"[Literal(Str("sine")), Callable(..)]"#);
	}
}
