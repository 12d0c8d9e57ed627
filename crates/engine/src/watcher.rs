//! Node lifecycle registry.
//!
//! Bridges "a creation message was sent" to "the server reports the node
//! running". A wait is registered before the triggering message is sent, and
//! a notification that arrives with nobody waiting is buffered so the next
//! registration for that id still observes it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use canopy_primitives::NodeId;
use canopy_worker::ScopeToken;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{EngineError, Result};

/// Upper bound on buffered early notifications. Notifications for nodes this
/// process never spawned would otherwise accumulate.
const EARLY_BUFFER_CAPACITY: usize = 1024;

/// Notification from a server about one of its nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
	/// The node exists and is running.
	NodeGo { node_id: NodeId, group: Option<NodeId> },
	/// The node was freed.
	NodeEnd { node_id: NodeId },
	/// The server went away; no further notifications will arrive.
	Disconnected { reason: String },
}

struct Waiter {
	ticket: u64,
	owner: Option<NodeId>,
	tx: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct WatcherState {
	waits: HashMap<NodeId, Vec<Waiter>>,
	early: IndexSet<NodeId>,
	scopes: HashMap<NodeId, ScopeToken>,
	closed: Option<String>,
	next_ticket: u64,
}

impl WatcherState {
	fn take_waiters(&mut self, node_id: NodeId) -> Vec<Waiter> {
		self.waits.remove(&node_id).unwrap_or_default()
	}

	fn take_owned(&mut self, owner: NodeId) -> Vec<Waiter> {
		let mut released = Vec::new();
		self.waits.retain(|_, waiters| {
			let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(waiters).into_iter().partition(|w| w.owner == Some(owner));
			released.extend(gone);
			*waiters = kept;
			!waiters.is_empty()
		});
		released
	}

	fn buffer_early(&mut self, node_id: NodeId) {
		if self.early.len() >= EARLY_BUFFER_CAPACITY {
			self.early.shift_remove_index(0);
		}
		self.early.insert(node_id);
	}
}

/// Per-server registry of pending "node running" waits.
#[derive(Clone, Default)]
pub struct NodeWatcher {
	state: Arc<Mutex<WatcherState>>,
}

impl std::fmt::Debug for NodeWatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("NodeWatcher")
			.field("pending", &state.waits.values().map(Vec::len).sum::<usize>())
			.field("early", &state.early.len())
			.field("closed", &state.closed)
			.finish()
	}
}

impl NodeWatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers interest in `node_id` running, scoped under `owner`.
	///
	/// Registration happens synchronously, so calling this before sending the
	/// creation message rules out a missed notification. Dropping the returned
	/// future deregisters the wait.
	pub fn watch(&self, owner: Option<NodeId>, node_id: NodeId) -> NodeGo {
		let mut state = self.state.lock();
		if let Some(reason) = &state.closed {
			return NodeGo::settled(node_id, Err(EngineError::unavailable(reason.clone())));
		}
		if state.early.shift_remove(&node_id) {
			tracing::trace!(%node_id, "engine.watch.replayed");
			return NodeGo::settled(node_id, Ok(()));
		}

		let ticket = state.next_ticket;
		state.next_ticket = state.next_ticket.wrapping_add(1);
		let (tx, rx) = oneshot::channel();
		state.waits.entry(node_id).or_default().push(Waiter { ticket, owner, tx });
		tracing::trace!(%node_id, owner = ?owner, ticket, "engine.watch.registered");

		NodeGo {
			node_id,
			inner: GoState::Waiting {
				rx,
				ticket,
				watcher: Arc::clone(&self.state),
			},
		}
	}

	/// Delivers a "node running" notification.
	pub fn node_go(&self, node_id: NodeId) {
		let waiters = {
			let mut state = self.state.lock();
			if state.closed.is_some() {
				tracing::warn!(%node_id, "engine.watch.go_after_disconnect");
				return;
			}
			let waiters = state.take_waiters(node_id);
			if waiters.is_empty() {
				state.buffer_early(node_id);
			}
			waiters
		};
		if waiters.is_empty() {
			tracing::trace!(%node_id, "engine.watch.early");
			return;
		}
		tracing::debug!(%node_id, waiters = waiters.len(), "engine.watch.go");
		for waiter in waiters {
			let _ = waiter.tx.send(Ok(()));
		}
	}

	/// Delivers a "node freed" notification.
	///
	/// Waits on a node that ended before it ever ran fail with
	/// [`EngineError::EngineUnavailable`]. Waits registered under the node as
	/// owner are abandoned and a scope bound to it is torn down.
	pub fn node_end(&self, node_id: NodeId) {
		let (waiters, owned, scope) = {
			let mut state = self.state.lock();
			state.early.shift_remove(&node_id);
			let scope = state.scopes.remove(&node_id);
			(state.take_waiters(node_id), state.take_owned(node_id), scope)
		};
		for waiter in waiters {
			tracing::warn!(%node_id, "engine.watch.ended_before_go");
			let _ = waiter.tx.send(Err(EngineError::unavailable(format!("node {node_id} ended before it started"))));
		}
		if !owned.is_empty() {
			tracing::debug!(%node_id, released = owned.len(), "engine.watch.owner_ended");
		}
		for waiter in owned {
			let _ = waiter.tx.send(Err(EngineError::Abandoned));
		}
		if let Some(scope) = scope {
			tracing::debug!(%node_id, "engine.watch.scope_ended");
			scope.cancel();
		}
	}

	/// Ties `scope` to the lifetime of `node_id` on the server: a "node
	/// freed" notification for it cancels the scope. The binding lasts until
	/// the returned guard is dropped.
	pub fn bind_scope(&self, node_id: NodeId, scope: ScopeToken) -> ScopeBinding {
		self.state.lock().scopes.insert(node_id, scope);
		ScopeBinding {
			node_id,
			watcher: Arc::clone(&self.state),
		}
	}

	/// Fails every pending wait and makes future waits fail immediately.
	pub fn disconnect(&self, reason: impl Into<String>) {
		let reason = reason.into();
		let waits = {
			let mut state = self.state.lock();
			if state.closed.is_some() {
				return;
			}
			state.closed = Some(reason.clone());
			state.early.clear();
			std::mem::take(&mut state.waits)
		};
		tracing::debug!(reason = %reason, pending = waits.values().map(Vec::len).sum::<usize>(), "engine.watch.disconnect");
		for waiter in waits.into_values().flatten() {
			let _ = waiter.tx.send(Err(EngineError::unavailable(reason.clone())));
		}
	}

	/// Abandons every wait registered under `owner`. Returns how many were
	/// released.
	pub fn release_owner(&self, owner: NodeId) -> usize {
		let released = self.state.lock().take_owned(owner);
		if !released.is_empty() {
			tracing::debug!(%owner, released = released.len(), "engine.watch.release_owner");
		}
		let count = released.len();
		for waiter in released {
			let _ = waiter.tx.send(Err(EngineError::Abandoned));
		}
		count
	}

	/// Applies one notification from the server's feed.
	pub fn apply(&self, event: &EngineEvent) {
		match event {
			EngineEvent::NodeGo { node_id, .. } => self.node_go(*node_id),
			EngineEvent::NodeEnd { node_id } => self.node_end(*node_id),
			EngineEvent::Disconnected { reason } => self.disconnect(reason.clone()),
		}
	}

	/// Number of registered waits that have not resolved yet.
	pub fn pending(&self) -> usize {
		self.state.lock().waits.values().map(Vec::len).sum()
	}

	/// Number of buffered notifications nobody has waited for yet.
	pub fn buffered(&self) -> usize {
		self.state.lock().early.len()
	}

	pub fn is_disconnected(&self) -> bool {
		self.state.lock().closed.is_some()
	}

	/// Number of scopes currently bound to server-side nodes.
	pub fn bound_scopes(&self) -> usize {
		self.state.lock().scopes.len()
	}
}

/// Guard returned by [`NodeWatcher::bind_scope`]; dropping it unbinds.
#[must_use = "the scope is unbound as soon as the guard is dropped"]
pub struct ScopeBinding {
	node_id: NodeId,
	watcher: Arc<Mutex<WatcherState>>,
}

impl Drop for ScopeBinding {
	fn drop(&mut self) {
		self.watcher.lock().scopes.remove(&self.node_id);
	}
}

enum GoState {
	Settled(Option<Result<()>>),
	Waiting {
		rx: oneshot::Receiver<Result<()>>,
		ticket: u64,
		watcher: Arc<Mutex<WatcherState>>,
	},
	Done,
}

/// Future resolving once the server reports a node running.
///
/// Resolves exactly once. Dropping it before then removes the registration.
#[must_use = "a node wait does nothing unless awaited"]
pub struct NodeGo {
	node_id: NodeId,
	inner: GoState,
}

impl NodeGo {
	fn settled(node_id: NodeId, result: Result<()>) -> Self {
		Self {
			node_id,
			inner: GoState::Settled(Some(result)),
		}
	}

	pub fn node_id(&self) -> NodeId {
		self.node_id
	}
}

impl Future for NodeGo {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
		let this = &mut *self;
		let out = match &mut this.inner {
			GoState::Settled(result) => result.take().unwrap_or(Err(EngineError::Abandoned)),
			GoState::Waiting { rx, .. } => match Pin::new(rx).poll(cx) {
				Poll::Pending => return Poll::Pending,
				Poll::Ready(Ok(result)) => result,
				Poll::Ready(Err(_)) => Err(EngineError::Abandoned),
			},
			GoState::Done => Err(EngineError::Abandoned),
		};
		this.inner = GoState::Done;
		Poll::Ready(out)
	}
}

impl Drop for NodeGo {
	fn drop(&mut self) {
		let GoState::Waiting { ticket, watcher, .. } = &self.inner else {
			return;
		};
		let mut state = watcher.lock();
		if let Some(waiters) = state.waits.get_mut(&self.node_id) {
			waiters.retain(|w| w.ticket != *ticket);
			if waiters.is_empty() {
				state.waits.remove(&self.node_id);
			}
			tracing::trace!(node_id = %self.node_id, ticket, "engine.watch.dropped");
		}
	}
}
