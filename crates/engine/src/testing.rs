//! In-process stand-ins for the server, interpreter and launcher.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use canopy_primitives::{Message, NodeId};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use crate::config::BootOptions;
use crate::store::Store;
use crate::target::{CompiledDef, InterpretError, Interpreter, InterpreterHandle, Launcher, ServerHandle, ServerTransport};
use crate::watcher::NodeWatcher;
use crate::{Context, EngineError, Result, TargetKind};

/// Transport that records every message.
///
/// With auto-confirm enabled it reports each created node running on the
/// attached watcher during `send` itself, the tightest possible race.
#[derive(Default)]
pub struct RecordingTransport {
	messages: Mutex<Vec<Message>>,
	sent: Notify,
	confirm_on: Mutex<Option<NodeWatcher>>,
	fail_sends: AtomicBool,
}

impl RecordingTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Confirms created nodes on `watcher` as soon as they are sent.
	pub fn auto_confirm(&self, watcher: &NodeWatcher) {
		*self.confirm_on.lock() = Some(watcher.clone());
	}

	/// Makes every subsequent `send` fail.
	pub fn fail_sends(&self, fail: bool) {
		self.fail_sends.store(fail, Ordering::SeqCst);
	}

	pub fn messages(&self) -> Vec<Message> {
		self.messages.lock().clone()
	}

	/// Ids of created nodes, in send order.
	pub fn created(&self) -> Vec<NodeId> {
		self.messages.lock().iter().filter_map(Message::created_node).collect()
	}

	/// Waits until at least `count` messages have been recorded.
	pub async fn wait_for(&self, count: usize) -> Vec<Message> {
		loop {
			let notified = self.sent.notified();
			{
				let messages = self.messages.lock();
				if messages.len() >= count {
					return messages.clone();
				}
			}
			notified.await;
		}
	}

	fn record(&self, message: Message) {
		let created = message.created_node();
		self.messages.lock().push(message);
		self.sent.notify_waiters();
		if let (Some(node_id), Some(watcher)) = (created, self.confirm_on.lock().clone()) {
			watcher.node_go(node_id);
		}
	}
}

#[async_trait]
impl ServerTransport for RecordingTransport {
	fn send(&self, message: Message) -> Result<()> {
		if self.fail_sends.load(Ordering::SeqCst) {
			return Err(EngineError::Send {
				address: message.address(),
				message: "transport closed".into(),
			});
		}
		self.record(message);
		Ok(())
	}

	async fn call_and_response(&self, message: Message) -> Result<()> {
		self.send(message)
	}
}

/// Interpreter returning queued outcomes, or a descriptor echoing the
/// source once the queue is empty.
#[derive(Default)]
pub struct ScriptedInterpreter {
	outcomes: Mutex<VecDeque<std::result::Result<CompiledDef, InterpretError>>>,
	sources: Mutex<Vec<String>>,
}

impl ScriptedInterpreter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Queues the outcome of the next compile.
	pub fn push_outcome(&self, outcome: std::result::Result<CompiledDef, InterpretError>) {
		self.outcomes.lock().push_back(outcome);
	}

	/// Every source text submitted so far.
	pub fn sources(&self) -> Vec<String> {
		self.sources.lock().clone()
	}
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
	async fn compile(&self, source: &str) -> std::result::Result<CompiledDef, InterpretError> {
		self.sources.lock().push(source.to_owned());
		let queued = self.outcomes.lock().pop_front();
		queued.unwrap_or_else(|| {
			Ok(CompiledDef {
				descriptor: json!({ "source": source }),
				bytes: source.as_bytes().to_vec(),
			})
		})
	}
}

/// Launcher that boots in-process doubles and counts boots.
#[derive(Default)]
pub struct CountingLauncher {
	server_boots: AtomicUsize,
	interpreter_boots: AtomicUsize,
	fail_servers: AtomicBool,
	auto_confirm: AtomicBool,
	transports: Mutex<Vec<Arc<RecordingTransport>>>,
	servers: Mutex<Vec<ServerHandle>>,
	interpreters: Mutex<Vec<Arc<ScriptedInterpreter>>>,
	boot_options: Mutex<Vec<BootOptions>>,
}

impl CountingLauncher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Booted servers confirm created nodes immediately.
	pub fn auto_confirming() -> Self {
		let launcher = Self::default();
		launcher.auto_confirm.store(true, Ordering::SeqCst);
		launcher
	}

	/// Makes every subsequent server boot fail.
	pub fn fail_servers(&self, fail: bool) {
		self.fail_servers.store(fail, Ordering::SeqCst);
	}

	pub fn server_boots(&self) -> usize {
		self.server_boots.load(Ordering::SeqCst)
	}

	pub fn interpreter_boots(&self) -> usize {
		self.interpreter_boots.load(Ordering::SeqCst)
	}

	pub fn transports(&self) -> Vec<Arc<RecordingTransport>> {
		self.transports.lock().clone()
	}

	pub fn servers(&self) -> Vec<ServerHandle> {
		self.servers.lock().clone()
	}

	pub fn interpreters(&self) -> Vec<Arc<ScriptedInterpreter>> {
		self.interpreters.lock().clone()
	}

	/// Options every boot received, after merging with defaults.
	pub fn boot_options(&self) -> Vec<BootOptions> {
		self.boot_options.lock().clone()
	}
}

#[async_trait]
impl Launcher for CountingLauncher {
	async fn boot_server(&self, options: &BootOptions, store: &Store) -> Result<ServerHandle> {
		self.boot_options.lock().push(options.clone());
		if self.fail_servers.load(Ordering::SeqCst) {
			return Err(EngineError::BootFailed {
				target: TargetKind::Server,
				message: "scsynth exited with status 1".into(),
			});
		}
		let n = self.server_boots.fetch_add(1, Ordering::SeqCst) + 1;
		let transport = RecordingTransport::new();
		let handle = ServerHandle::in_store(format!("server-{n}"), transport.clone(), store, options);
		if self.auto_confirm.load(Ordering::SeqCst) {
			transport.auto_confirm(handle.watcher());
		}
		self.transports.lock().push(transport);
		self.servers.lock().push(handle.clone());
		Ok(handle)
	}

	async fn boot_interpreter(&self, options: &BootOptions) -> Result<InterpreterHandle> {
		self.boot_options.lock().push(options.clone());
		let n = self.interpreter_boots.fetch_add(1, Ordering::SeqCst) + 1;
		let interpreter = ScriptedInterpreter::new();
		self.interpreters.lock().push(Arc::clone(&interpreter));
		Ok(InterpreterHandle::new(format!("interpreter-{n}"), interpreter))
	}
}

/// A root context with one server already installed.
pub struct TestRig {
	pub launcher: Arc<CountingLauncher>,
	pub transport: Arc<RecordingTransport>,
	pub server: ServerHandle,
	pub ctx: Context,
}

impl TestRig {
	/// Nodes are confirmed only when the test calls `node_go`.
	pub fn new() -> Self {
		Self::build(false)
	}

	/// Nodes are confirmed as soon as they are sent.
	pub fn auto_confirming() -> Self {
		Self::build(true)
	}

	fn build(auto_confirm: bool) -> Self {
		let launcher = Arc::new(if auto_confirm { CountingLauncher::auto_confirming() } else { CountingLauncher::new() });
		let transport = RecordingTransport::new();
		let root = Context::new(launcher.clone());
		let server = ServerHandle::in_store("rig", transport.clone(), root.store(), &BootOptions::new());
		if auto_confirm {
			transport.auto_confirm(server.watcher());
		}
		let ctx = root.with_server(server.clone());
		Self {
			launcher,
			transport,
			server,
			ctx,
		}
	}

	/// Adds an interpreter to the rig's context.
	pub fn with_interpreter(mut self, interpreter: Arc<ScriptedInterpreter>) -> Self {
		self.ctx = self.ctx.with_interpreter(InterpreterHandle::new("rig-interpreter", interpreter));
		self
	}

	/// Reports `node_id` running.
	pub fn go(&self, node_id: NodeId) {
		self.server.watcher().node_go(node_id);
	}
}

impl Default for TestRig {
	fn default() -> Self {
		Self::new()
	}
}
