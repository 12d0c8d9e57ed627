//! The environment threaded through tree evaluation.
//!
//! A [`Context`] answers "where in the tree, and against what target, are we
//! evaluating". Composition primitives never mutate the context they receive:
//! they [`fork`](Context::fork) it and adjust the copy. Scalar fields are
//! copied on fork; target handles, the id scope and the store are shared.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use canopy_primitives::{NodeId, ROOT_GROUP};
use canopy_worker::ScopeToken;

use crate::config::{EngineConfig, FIRST_NODE_ID};
use crate::store::Store;
use crate::target::{InterpreterHandle, Launcher, ServerHandle};
use crate::{EngineError, Result, TargetKind};

/// Monotonic node id source shared by every context addressing one server.
///
/// Node ids are `i32` on the wire. The counter itself is wider and never
/// wraps; once it passes `i32::MAX` the scope is exhausted and keeps handing
/// out `i32::MAX`, logging each such allocation.
#[derive(Debug, Clone)]
pub struct IdScope {
	next: Arc<AtomicI64>,
}

impl Default for IdScope {
	fn default() -> Self {
		Self::starting_at(FIRST_NODE_ID)
	}
}

impl IdScope {
	/// Creates a scope whose first allocation is `first`.
	pub fn starting_at(first: i32) -> Self {
		Self {
			next: Arc::new(AtomicI64::new(i64::from(first))),
		}
	}

	/// Draws the next identifier. Never blocks, never fails.
	pub fn next(&self) -> NodeId {
		let raw = self.next.fetch_add(1, Ordering::AcqRel);
		i32::try_from(raw).map(NodeId).unwrap_or_else(|_| {
			tracing::error!(raw, "engine.ids.exhausted");
			NodeId(i32::MAX)
		})
	}

	/// Returns the identifier the next call to [`Self::next`] would yield.
	pub fn peek(&self) -> NodeId {
		NodeId(i32::try_from(self.next.load(Ordering::Acquire)).unwrap_or(i32::MAX))
	}

}

/// Evaluation environment for one tree node.
#[derive(Clone)]
pub struct Context {
	server: Option<ServerHandle>,
	interpreter: Option<InterpreterHandle>,
	group: NodeId,
	owner: Option<NodeId>,
	ids: IdScope,
	store: Store,
	launcher: Arc<dyn Launcher>,
	config: Arc<EngineConfig>,
	scope: ScopeToken,
	path: String,
}

impl fmt::Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Context")
			.field("path", &self.path)
			.field("server", &self.server.as_ref().map(ServerHandle::name))
			.field("interpreter", &self.interpreter.as_ref().map(InterpreterHandle::name))
			.field("group", &self.group)
			.field("owner", &self.owner)
			.field("depth", &self.scope.depth())
			.finish_non_exhaustive()
	}
}

impl Context {
	/// Creates a root context with no targets, addressing the root group.
	pub fn new(launcher: Arc<dyn Launcher>) -> Self {
		Self::with_config(launcher, EngineConfig::default())
	}

	/// Creates a root context using `config` for boot defaults and stream policy.
	pub fn with_config(launcher: Arc<dyn Launcher>, config: EngineConfig) -> Self {
		Self {
			server: None,
			interpreter: None,
			group: ROOT_GROUP,
			owner: None,
			ids: IdScope::default(),
			store: Store::new(),
			launcher,
			config: Arc::new(config),
			scope: ScopeToken::new(),
			path: String::new(),
		}
	}

	/// Returns a copy of this context for a child evaluation.
	///
	/// When `introduces_new_group` is set the copy gets its own cancellation
	/// scope; the caller sets the group/owner once the new node id is
	/// allocated.
	#[must_use]
	pub fn fork(&self, introduces_new_group: bool) -> Self {
		let mut forked = self.clone();
		if introduces_new_group {
			forked.scope = self.scope.child();
		}
		forked
	}

	/// Sets the group new nodes are appended to.
	#[must_use]
	pub fn with_group(mut self, group: NodeId) -> Self {
		self.group = group;
		self
	}

	/// Sets the nearest ancestor's allocated id.
	#[must_use]
	pub fn with_owner(mut self, owner: NodeId) -> Self {
		self.owner = Some(owner);
		self
	}

	/// Installs a server target, adopting its id scope and resetting the
	/// group slot to the root group.
	#[must_use]
	pub fn with_server(mut self, server: ServerHandle) -> Self {
		self.ids = server.ids().clone();
		self.server = Some(server);
		self.group = ROOT_GROUP;
		self.owner = None;
		self
	}

	/// Installs an interpreter target.
	#[must_use]
	pub fn with_interpreter(mut self, interpreter: InterpreterHandle) -> Self {
		self.interpreter = Some(interpreter);
		self
	}

	/// Extends the dotted evaluation path with `label`.
	#[must_use]
	pub fn labelled(mut self, label: &str) -> Self {
		if label.is_empty() {
			return self;
		}
		if !self.path.is_empty() {
			self.path.push('.');
		}
		self.path.push_str(label);
		self
	}

	pub fn server(&self) -> Option<&ServerHandle> {
		self.server.as_ref()
	}

	/// Returns the server target or an availability error.
	pub fn require_server(&self) -> Result<&ServerHandle> {
		self.server
			.as_ref()
			.ok_or_else(|| EngineError::unavailable(format!("no {} in context at `{}`", TargetKind::Server, self.path)))
	}

	pub fn interpreter(&self) -> Option<&InterpreterHandle> {
		self.interpreter.as_ref()
	}

	/// Returns the interpreter target or an availability error.
	pub fn require_interpreter(&self) -> Result<&InterpreterHandle> {
		self.interpreter
			.as_ref()
			.ok_or_else(|| EngineError::unavailable(format!("no {} in context at `{}`", TargetKind::Interpreter, self.path)))
	}

	pub fn group(&self) -> NodeId {
		self.group
	}

	pub fn owner(&self) -> Option<NodeId> {
		self.owner
	}

	pub fn ids(&self) -> &IdScope {
		&self.ids
	}

	/// Allocates the next node id from this context's id scope.
	pub fn allocate_id(&self) -> NodeId {
		self.ids.next()
	}

	pub fn store(&self) -> &Store {
		&self.store
	}

	pub fn launcher(&self) -> &Arc<dyn Launcher> {
		&self.launcher
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn scope(&self) -> &ScopeToken {
		&self.scope
	}

	/// Dotted label path from the root, used in traces and diagnostics.
	pub fn path(&self) -> &str {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::CountingLauncher;

	fn root() -> Context {
		Context::new(Arc::new(CountingLauncher::new()))
	}

	#[test]
	fn fork_never_touches_parent_fields() {
		let parent = root().with_group(NodeId(5)).labelled("a");
		let child = parent.fork(true).with_group(NodeId(1001)).with_owner(NodeId(1001)).labelled("b");

		assert_eq!(parent.group(), NodeId(5));
		assert_eq!(parent.owner(), None);
		assert_eq!(parent.path(), "a");
		assert_eq!(child.group(), NodeId(1001));
		assert_eq!(child.path(), "a.b");
	}

	#[test]
	fn forks_share_the_id_scope() {
		let parent = root();
		let child = parent.fork(false);
		assert_eq!(parent.allocate_id(), NodeId(FIRST_NODE_ID));
		assert_eq!(child.allocate_id(), NodeId(FIRST_NODE_ID + 1));
		assert_eq!(parent.ids().peek(), NodeId(FIRST_NODE_ID + 2));
	}

	#[test]
	fn allocations_are_strictly_increasing() {
		let scope = IdScope::starting_at(1);
		let ids: Vec<_> = (0..100).map(|_| scope.next()).collect();
		assert!(ids.windows(2).all(|w| w[0] < w[1]));
		assert_eq!(ids.len(), 100);
	}

	#[test]
	fn ids_never_wrap_negative() {
		let scope = IdScope::starting_at(i32::MAX - 1);
		assert_eq!(scope.next(), NodeId(i32::MAX - 1));
		assert_eq!(scope.next(), NodeId(i32::MAX));
		assert_eq!(scope.next(), NodeId(i32::MAX));
		assert_eq!(scope.peek(), NodeId(i32::MAX));
	}

	#[test]
	fn new_group_fork_gets_child_scope() {
		let parent = root();
		let child = parent.fork(true);
		let sibling = parent.fork(false);
		child.scope().cancel();
		assert!(!parent.scope().is_cancelled());
		assert!(!sibling.scope().is_cancelled());

		parent.scope().cancel();
		assert!(sibling.scope().is_cancelled());
	}

	#[test]
	fn missing_targets_are_unavailable() {
		let ctx = root().labelled("synth");
		let err = ctx.require_server().unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::EngineUnavailable);
		assert!(ctx.require_interpreter().is_err());
	}
}
