//! Composition primitives.
//!
//! Every primitive returns a [`Dynamic`] callable: evaluating it against a
//! parent context forks that context, does its work against the context's
//! targets and resolves with plain data (a node id for spawns, the ordered
//! child results for containers).
//!
//! Spawning nodes follow `Pending -> Resolving -> Emitting ->
//! AwaitingConfirmation -> Running(id)`; a failure at any step surfaces as one
//! [`EngineError::Spawn`] naming the stage.

use std::collections::BTreeMap;
use std::time::Duration;

use canopy_primitives::{AddAction, Message, NodeId, Value};

use crate::config::BootOptions;
use crate::resolve::{resolve_mapping, resolve_one, resolve_sequence};
use crate::store::NodeState;
use crate::target::boot_failed;
use crate::{Context, Dynamic, EngineError, Result, SpawnStage, TargetKind};

/// Label under which a synth's definition selector is resolved.
const DEF_LABEL: &str = "def";

/// Spawns a synth from `def` with `args`, appended to the tail of the
/// current group. Resolves with the new node id once the server reports it
/// running.
pub fn synth<K, I>(def: impl Into<Dynamic>, args: I) -> Dynamic
where
	K: Into<String>,
	I: IntoIterator<Item = (K, Dynamic)>,
{
	let def = def.into();
	let args: BTreeMap<String, Dynamic> = args.into_iter().map(|(k, v)| (k.into(), v)).collect();
	Dynamic::from_async(move |parent: Context| spawn_synth(parent, def.clone(), args.clone()))
}

async fn spawn_synth(parent: Context, def: Dynamic, args: BTreeMap<String, Dynamic>) -> Result<Dynamic> {
	let ctx = parent.fork(false);
	let server = ctx.require_server()?.clone();

	let def_name = resolve_one(def, &ctx, DEF_LABEL)
		.await
		.and_then(|v| v.into_string().map_err(|e| EngineError::resolution(e.to_string()).labelled(DEF_LABEL)))
		.map_err(|e| e.at_stage(SpawnStage::Definition, None))?;

	let node_id = ctx.allocate_id();
	let ctx = ctx.with_owner(node_id);
	let args = resolve_mapping(args, &ctx).await.map_err(|e| e.at_stage(SpawnStage::Arguments, Some(node_id)))?;

	let group = ctx.group();
	tracing::debug!(path = ctx.path(), %node_id, %group, def = %def_name, "engine.synth.emit");
	let go = server.watcher().watch(Some(group), node_id);
	server
		.send(Message::synth_new(def_name.clone(), node_id, AddAction::Tail, group, args))
		.map_err(|e| e.at_stage(SpawnStage::Send, Some(node_id)))?;
	go.await.map_err(|e| e.at_stage(SpawnStage::Confirmation, Some(node_id)))?;

	server.state().record_node(node_id, NodeState::synth(group, def_name));
	tracing::debug!(path = ctx.path(), %node_id, "engine.synth.running");
	Ok(Dynamic::from(node_id))
}

/// Creates a group at the tail of the current group, then evaluates
/// `children` concurrently inside it once the server confirms it.
///
/// Resolves with the children's results in input order. The first child
/// failure fails the group and drops the remaining children. If the server
/// frees the group while its children are still evaluating, they are torn
/// down and the group fails with [`EngineError::Abandoned`].
pub fn group(children: Vec<Dynamic>) -> Dynamic {
	Dynamic::from_async(move |parent: Context| spawn_group(parent, children.clone()))
}

async fn spawn_group(parent: Context, children: Vec<Dynamic>) -> Result<Dynamic> {
	let ctx = parent.fork(true);
	let server = ctx.require_server()?.clone();

	let node_id = ctx.allocate_id();
	let parent_group = ctx.group();
	let scope = ctx.scope().clone();
	tracing::debug!(path = ctx.path(), %node_id, group = %parent_group, "engine.group.emit");
	let _bound = server.watcher().bind_scope(node_id, scope.clone());
	let go = server.watcher().watch(Some(parent_group), node_id);
	server
		.send(Message::group_new(node_id, AddAction::Tail, parent_group))
		.map_err(|e| e.at_stage(SpawnStage::Send, Some(node_id)))?;
	go.await.map_err(|e| e.at_stage(SpawnStage::Confirmation, Some(node_id)))?;
	server.state().record_node(node_id, NodeState::group(parent_group));

	let inner = ctx.with_group(node_id).with_owner(node_id);
	tokio::select! {
		biased;
		_ = scope.cancelled() => {
			server.watcher().release_owner(node_id);
			tracing::debug!(%node_id, "engine.group.torn_down");
			Err(EngineError::Abandoned)
		}
		results = resolve_sequence(children, &inner) => results.map(|r| Dynamic::Literal(Value::List(r))),
	}
}

/// Compiles `source` into a definition named `def_name`, stores its
/// descriptor in the server's definition cache and loads it on the server.
///
/// Boots a server and/or interpreter when the context has none. Resolves
/// with `def_name`, so it can stand in for a synth's definition selector.
pub fn compile_synth_def(def_name: impl Into<String>, source: impl Into<String>) -> Dynamic {
	let def_name = def_name.into();
	let source = source.into();
	let compiler = Dynamic::from_async(move |ctx: Context| compile_on_targets(ctx, def_name.clone(), source.clone()));
	require_server(require_interpreter(compiler, BootOptions::new()), BootOptions::new())
}

/// Wraps a caller's snippet into a fragment that defines `def_name` and
/// yields both its descriptor and its bytes.
pub fn definition_source(def_name: &str, source: &str) -> String {
	format!(
		"{{\n  var def = SynthDef(\"{def_name}\", {source});\n  (\n    synthDesc: def.asSynthDesc.asJSON(),\n    bytes: def.asBytes()\n  )\n}}.value"
	)
}

async fn compile_on_targets(ctx: Context, def_name: String, source: String) -> Result<Dynamic> {
	let server = ctx.require_server()?.clone();
	let interpreter = ctx.require_interpreter()?.clone();

	tracing::debug!(path = ctx.path(), def = %def_name, "engine.synthdef.compile");
	let compiled = interpreter
		.compile(&definition_source(&def_name, &source))
		.await
		.map_err(|err| EngineError::CompileFailed {
			def_name: def_name.clone(),
			error: err.message,
			source_code: source.clone(),
		})?;

	server.state().put_synth_def(def_name.clone(), compiled.descriptor);
	server.call_and_response(Message::def_recv(compiled.bytes)).await?;
	tracing::debug!(def = %def_name, "engine.synthdef.loaded");
	Ok(Dynamic::from(def_name))
}

/// Boots a new interpreter and evaluates `children` concurrently with it
/// installed. Any interpreter already in context is ignored.
pub fn interpreter(children: Vec<Dynamic>, options: BootOptions) -> Dynamic {
	Dynamic::from_async(move |parent: Context| {
		let children = children.clone();
		let options = options.clone();
		async move {
			let options = options.merged_over(&parent.config().interpreter);
			let handle = parent
				.launcher()
				.boot_interpreter(&options)
				.await
				.map_err(|e| boot_failed(TargetKind::Interpreter, e))?;
			tracing::debug!(path = parent.path(), interpreter = handle.name(), "engine.interpreter.booted");
			let ctx = parent.fork(true).with_interpreter(handle);
			resolve_sequence(children, &ctx).await.map(|r| Dynamic::Literal(Value::List(r)))
		}
	})
}

/// Evaluates `child` with an interpreter, booting one only when the context
/// has none.
pub fn require_interpreter(child: Dynamic, options: BootOptions) -> Dynamic {
	Dynamic::from_async(move |ctx: Context| {
		let child = child.clone();
		let options = options.clone();
		async move {
			if ctx.interpreter().is_some() {
				return resolve_one(child, &ctx, "").await.map(Dynamic::Literal);
			}
			let booted = resolve_one(interpreter(vec![child], options), &ctx, "").await?;
			Ok(Dynamic::Literal(first_result(booted)))
		}
	})
}

/// Boots a new server and evaluates `children` concurrently with it
/// installed and the group reset to the root group. Any server already in
/// context is ignored.
pub fn server(children: Vec<Dynamic>, options: BootOptions) -> Dynamic {
	Dynamic::from_async(move |parent: Context| {
		let children = children.clone();
		let options = options.clone();
		async move {
			let options = options.merged_over(&parent.config().server);
			let handle = parent
				.launcher()
				.boot_server(&options, parent.store())
				.await
				.map_err(|e| boot_failed(TargetKind::Server, e))?;
			tracing::debug!(path = parent.path(), server = handle.name(), "engine.server.booted");
			let ctx = parent.fork(true).with_server(handle);
			resolve_sequence(children, &ctx).await.map(|r| Dynamic::Literal(Value::List(r)))
		}
	})
}

/// Evaluates `child` against a server, booting one only when the context
/// has none.
pub fn require_server(child: Dynamic, options: BootOptions) -> Dynamic {
	Dynamic::from_async(move |ctx: Context| {
		let child = child.clone();
		let options = options.clone();
		async move {
			if ctx.server().is_some() {
				return resolve_one(child, &ctx, "").await.map(Dynamic::Literal);
			}
			let booted = resolve_one(server(vec![child], options), &ctx, "").await?;
			Ok(Dynamic::Literal(first_result(booted)))
		}
	})
}

fn first_result(results: Value) -> Value {
	match results {
		Value::List(items) => items.into_iter().next().unwrap_or_default(),
		other => other,
	}
}

/// Fails `tree` with [`EngineError::EngineUnavailable`] if it has not
/// resolved within `limit`.
pub fn with_deadline(tree: Dynamic, limit: Duration) -> Dynamic {
	Dynamic::from_async(move |ctx: Context| {
		let tree = tree.clone();
		async move {
			match tokio::time::timeout(limit, resolve_one(tree, &ctx, "")).await {
				Ok(result) => result.map(Dynamic::Literal),
				Err(_) => {
					tracing::warn!(path = ctx.path(), ?limit, "engine.deadline.elapsed");
					Err(EngineError::unavailable(format!("no confirmation within {limit:?}")))
				}
			}
		}
	})
}

/// Evaluates a root tree node, racing it against the context's scope.
///
/// Returns [`EngineError::Abandoned`] if the scope is torn down first.
pub async fn run(tree: Dynamic, ctx: &Context) -> Result<Value> {
	let scope = ctx.scope().clone();
	tokio::select! {
		biased;
		_ = scope.cancelled() => Err(EngineError::Abandoned),
		result = resolve_one(tree, ctx, "") => result,
	}
}

/// Reads a spawn result back as a node id.
pub fn node_id_of(value: &Value) -> Result<NodeId> {
	value.as_node_id().map_err(|e| EngineError::resolution(e.to_string()))
}
