//! Tree evaluator for a remote synthesis server.
//!
//! A tree is built from composition primitives ([`synth`], [`group`],
//! [`stream`], [`server`], ...) that are themselves [`Dynamic`] callables.
//! Evaluating a node forks the [`Context`] it receives, resolves its dynamic
//! arguments, sends a control message and waits for the server to report the
//! new node running before its children proceed.
//!
//! * [`context`]: the environment threaded through evaluation
//! * [`resolve`]: deep, concurrent resolution of dynamic values
//! * [`watcher`]: node lifecycle registry keyed by node id
//! * [`tree`] and [`stream`]: the composition primitives
//! * [`target`]: collaborator traits and handles (transport, interpreter, launcher)

pub mod config;
pub mod context;
pub mod dynamic;
mod error;
pub mod resolve;
pub mod source;
pub mod store;
pub mod stream;
pub mod target;
pub mod tree;
pub mod watcher;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{BootOptions, EngineConfig, StreamErrorPolicy, StreamOptions};
pub use context::{Context, IdScope};
pub use dynamic::Dynamic;
pub use error::{EngineError, ErrorKind, Result, SpawnStage, TargetKind};
pub use resolve::{resolve_mapping, resolve_one, resolve_sequence};
pub use source::{Broadcast, Source, StreamEvent, Subscriber, Subscription, source_fn, subscription};
pub use store::{NodeKind, NodeState, ServerState, Store};
pub use stream::{SynthEvent, SynthParams, stream, stream_with_options, synth_stream};
pub use target::{CompiledDef, InterpretError, Interpreter, InterpreterHandle, Launcher, ServerHandle, ServerTransport};
pub use tree::{compile_synth_def, group, interpreter, node_id_of, require_interpreter, require_server, run, server, synth, with_deadline};
pub use watcher::{EngineEvent, NodeGo, NodeWatcher, ScopeBinding};
