//! Handles to the external collaborators a tree addresses.
//!
//! Wire encoding, process management and the raw notification socket live
//! behind [`ServerTransport`], [`Interpreter`] and [`Launcher`]. The handles
//! here add the bookkeeping the evaluator needs on top: an id scope, a node
//! watcher and the per-server store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use canopy_primitives::Message;
use canopy_worker::TaskClass;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BootOptions;
use crate::context::IdScope;
use crate::store::{ServerState, Store};
use crate::watcher::{EngineEvent, NodeWatcher};
use crate::{EngineError, Result};

/// Transmission of control messages to one server.
#[async_trait]
pub trait ServerTransport: Send + Sync + 'static {
	/// Fire-and-forget transmission. `Ok` only means accepted for sending.
	fn send(&self, message: Message) -> Result<()>;

	/// Sends a message and waits for the server's acknowledgement.
	async fn call_and_response(&self, message: Message) -> Result<()>;
}

struct ServerInner {
	name: String,
	transport: Arc<dyn ServerTransport>,
	watcher: NodeWatcher,
	ids: IdScope,
	state: Arc<ServerState>,
}

/// Shared handle to a booted server.
#[derive(Clone)]
pub struct ServerHandle {
	inner: Arc<ServerInner>,
}

impl fmt::Debug for ServerHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServerHandle")
			.field("name", &self.inner.name)
			.field("next_id", &self.inner.ids.peek())
			.field("watcher", &self.inner.watcher)
			.finish_non_exhaustive()
	}
}

impl ServerHandle {
	/// Wraps a transport. `state` is normally `store.server_state(name)`.
	pub fn new(name: impl Into<String>, transport: Arc<dyn ServerTransport>, state: Arc<ServerState>, ids: IdScope) -> Self {
		Self {
			inner: Arc::new(ServerInner {
				name: name.into(),
				transport,
				watcher: NodeWatcher::new(),
				ids,
				state,
			}),
		}
	}

	/// Builds a handle whose state lives in `store` under `name`, allocating
	/// ids from `options.first_node_id()`.
	pub fn in_store(name: impl Into<String>, transport: Arc<dyn ServerTransport>, store: &Store, options: &BootOptions) -> Self {
		let name = name.into();
		let state = store.server_state(&name);
		Self::new(name, transport, state, IdScope::starting_at(options.first_node_id()))
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn watcher(&self) -> &NodeWatcher {
		&self.inner.watcher
	}

	pub fn ids(&self) -> &IdScope {
		&self.inner.ids
	}

	pub fn state(&self) -> &Arc<ServerState> {
		&self.inner.state
	}

	/// Hands a control message to the transport.
	pub fn send(&self, message: Message) -> Result<()> {
		tracing::trace!(server = %self.inner.name, address = message.address(), "engine.server.send");
		self.inner.transport.send(message)
	}

	/// Sends a message and waits for the server's acknowledgement.
	pub async fn call_and_response(&self, message: Message) -> Result<()> {
		tracing::trace!(server = %self.inner.name, address = message.address(), "engine.server.call");
		self.inner.transport.call_and_response(message).await
	}

	/// Applies one notification to the watcher and the node index.
	pub fn apply(&self, event: &EngineEvent) {
		self.inner.watcher.apply(event);
		if let EngineEvent::NodeEnd { node_id } = event {
			self.inner.state.forget_node(*node_id);
		}
	}

	/// Drains a notification feed into this handle on a worker task.
	///
	/// The feed closing is treated as a disconnect.
	pub fn attach(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
		let handle = self.clone();
		canopy_worker::spawn(TaskClass::Notifications, async move {
			while let Some(event) = events.recv().await {
				handle.apply(&event);
				if matches!(event, EngineEvent::Disconnected { .. }) {
					return;
				}
			}
			handle.inner.watcher.disconnect(format!("notification feed for {} closed", handle.inner.name));
		})
	}
}

/// Output of compiling a definition on the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDef {
	/// Structured description of the definition (controls, inputs, outputs).
	pub descriptor: JsonValue,
	/// Binary form loaded by the server.
	pub bytes: Vec<u8>,
}

/// Compile failure reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InterpretError {
	/// Diagnostic text from the interpreter.
	pub message: String,
}

impl InterpretError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

/// Companion interpreter that compiles definitions from source.
#[async_trait]
pub trait Interpreter: Send + Sync + 'static {
	/// Evaluates `source`, which must yield a definition descriptor and bytes.
	async fn compile(&self, source: &str) -> std::result::Result<CompiledDef, InterpretError>;
}

/// Shared handle to a booted interpreter.
#[derive(Clone)]
pub struct InterpreterHandle {
	name: Arc<str>,
	inner: Arc<dyn Interpreter>,
}

impl fmt::Debug for InterpreterHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InterpreterHandle").field("name", &self.name).finish_non_exhaustive()
	}
}

impl InterpreterHandle {
	pub fn new(name: impl Into<Arc<str>>, interpreter: Arc<dyn Interpreter>) -> Self {
		Self {
			name: name.into(),
			inner: interpreter,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn compile(&self, source: &str) -> std::result::Result<CompiledDef, InterpretError> {
		tracing::trace!(interpreter = %self.name, bytes = source.len(), "engine.interpreter.compile");
		self.inner.compile(source).await
	}}

/// Boots servers and interpreters.
///
/// Failures should be reported as [`EngineError::BootFailed`]; anything else
/// is wrapped into one by the composition primitives.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
	async fn boot_server(&self, options: &BootOptions, store: &Store) -> Result<ServerHandle>;

	async fn boot_interpreter(&self, options: &BootOptions) -> Result<InterpreterHandle>;
}

/// Normalises a launcher error into [`EngineError::BootFailed`].
pub(crate) fn boot_failed(target: crate::TargetKind, err: EngineError) -> EngineError {
	match err {
		err @ EngineError::BootFailed { .. } => err,
		other => EngineError::BootFailed {
			target,
			message: other.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use canopy_primitives::NodeId;

	use super::*;
	use crate::store::NodeState;
	use crate::testing::RecordingTransport;

	fn handle() -> (ServerHandle, Arc<RecordingTransport>) {
		let transport = RecordingTransport::new();
		let handle = ServerHandle::in_store("s", transport.clone(), &Store::new(), &BootOptions::new());
		(handle, transport)
	}

	#[tokio::test]
	async fn attach_applies_events_and_disconnects_on_close() {
		let (handle, _) = handle();
		let (tx, rx) = mpsc::unbounded_channel();
		let pump = handle.attach(rx);

		let go = handle.watcher().watch(None, NodeId(1000));
		tx.send(EngineEvent::NodeGo {
			node_id: NodeId(1000),
			group: None,
		})
		.unwrap();
		assert_eq!(go.await, Ok(()));

		drop(tx);
		pump.await.unwrap();
		assert!(handle.watcher().is_disconnected());
	}

	#[tokio::test]
	async fn node_end_forgets_metadata() {
		let (handle, _) = handle();
		handle.state().record_node(NodeId(1000), NodeState::group(NodeId(0)));
		handle.apply(&EngineEvent::NodeEnd { node_id: NodeId(1000) });
		assert_eq!(handle.state().node(NodeId(1000)), None);
	}

	#[test]
	fn ids_start_at_configured_first_node_id() {
		let handle = ServerHandle::in_store("s", RecordingTransport::new(), &Store::new(), &BootOptions::new().set("first_node_id", 2000));
		assert_eq!(handle.ids().next(), NodeId(2000));
	}

	#[test]
	fn boot_failed_wraps_foreign_errors() {
		let err = boot_failed(crate::TargetKind::Interpreter, EngineError::unavailable("no binary"));
		assert_eq!(err.kind(), crate::ErrorKind::BootFailed);
		assert_eq!(err.to_string(), "failed to boot interpreter: engine unavailable: no binary");
	}
}
