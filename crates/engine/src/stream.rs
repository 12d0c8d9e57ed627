//! Streams: children spawned from items pushed by a [`Source`].

use std::collections::BTreeMap;
use std::sync::Arc;

use canopy_primitives::Value;
use canopy_worker::{TaskClass, WorkerJoinSet};
use serde::{Deserialize, Serialize};

use crate::config::{StreamErrorPolicy, StreamOptions};
use crate::resolve::resolve_one;
use crate::source::{Source, StreamEvent, Subscription};
use crate::tree::synth;
use crate::{Context, Dynamic, EngineError, Result};

/// Evaluates each tree node pushed by `source` as a child of the current
/// context, labelled by its position in the stream.
///
/// Source errors and child failures are handled per the context's
/// [`StreamOptions`]. The stream resolves with nil once the source completes
/// and every spawned child has settled; tearing down the surrounding scope
/// disposes the subscription and aborts the children.
pub fn stream<S>(source: S) -> Dynamic
where
	S: Source<Dynamic>,
{
	stream_items(Arc::new(source), None, |node: Dynamic| node)
}

/// Like [`stream`] with an explicit error policy overriding the context's.
pub fn stream_with_options<S>(source: S, options: StreamOptions) -> Dynamic
where
	S: Source<Dynamic>,
{
	stream_items(Arc::new(source), Some(options), |node: Dynamic| node)
}

/// One synth to spawn from a [`synth_stream`] source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SynthEvent {
	/// Definition to spawn; falls back to the stream's base definition.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub def_name: Option<String>,
	/// Arguments layered over the stream's base arguments.
	#[serde(default)]
	pub args: BTreeMap<String, Value>,
}

impl SynthEvent {
	pub fn new(def_name: impl Into<String>) -> Self {
		Self {
			def_name: Some(def_name.into()),
			args: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.args.insert(key.into(), value.into());
		self
	}
}

/// Base parameters shared by every synth of a [`synth_stream`].
#[derive(Debug, Clone, Default)]
pub struct SynthParams {
	pub def_name: Option<String>,
	pub args: BTreeMap<String, Dynamic>,
}

impl SynthParams {
	pub fn new(def_name: impl Into<String>) -> Self {
		Self {
			def_name: Some(def_name.into()),
			args: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn arg(mut self, key: impl Into<String>, value: impl Into<Dynamic>) -> Self {
		self.args.insert(key.into(), value.into());
		self
	}

	/// Builds the synth for one event. Event arguments and a non-empty event
	/// definition win over the base ones.
	pub fn synth_for(&self, event: SynthEvent) -> Dynamic {
		let mut args = self.args.clone();
		args.extend(event.args.into_iter().map(|(k, v)| (k, Dynamic::Literal(v))));
		let def = event.def_name.filter(|name| !name.is_empty()).or_else(|| self.def_name.clone());
		synth(def, args)
	}
}

/// Spawns a synth for each event pushed by `source`.
pub fn synth_stream<S>(source: S, base: SynthParams) -> Dynamic
where
	S: Source<SynthEvent>,
{
	stream_items(Arc::new(source), None, move |event: SynthEvent| base.synth_for(event))
}

fn stream_items<T, S, F>(source: Arc<S>, options: Option<StreamOptions>, to_node: F) -> Dynamic
where
	T: Send + 'static,
	S: Source<T>,
	F: Fn(T) -> Dynamic + Clone + Send + Sync + 'static,
{
	Dynamic::from_async(move |ctx: Context| {
		let subscription = source.subscribe();
		let options = options.unwrap_or(ctx.config().stream);
		run_stream(subscription, ctx, options, to_node.clone())
	})
}

async fn run_stream<T, F>(mut subscription: Subscription<T>, ctx: Context, options: StreamOptions, to_node: F) -> Result<Dynamic>
where
	T: Send + 'static,
	F: Fn(T) -> Dynamic,
{
	let scope = ctx.scope().clone();
	let mut children: WorkerJoinSet<Result<Value>> = WorkerJoinSet::new(TaskClass::Stream);
	let mut index = 0usize;
	tracing::debug!(path = ctx.path(), policy = ?options.on_error, "engine.stream.subscribed");

	loop {
		tokio::select! {
			biased;
			_ = scope.cancelled() => {
				subscription.dispose();
				children.shutdown().await;
				tracing::debug!(path = ctx.path(), spawned = index, "engine.stream.torn_down");
				return Err(EngineError::Abandoned);
			}
			Some(joined) = children.join_next(), if !children.is_empty() => {
				if let Err(err) = settle_child(joined, &ctx, options) {
					subscription.dispose();
					return Err(err);
				}
			}
			event = subscription.next() => match event {
				Some(StreamEvent::Item(item)) => {
					let node = to_node(item);
					let label = index.to_string();
					index += 1;
					let child_ctx = ctx.clone();
					children.spawn(async move { resolve_one(node, &child_ctx, &label).await });
				}
				Some(StreamEvent::Error(err)) => match options.on_error {
					StreamErrorPolicy::Log => {
						tracing::error!(path = ctx.path(), error = %err, "engine.stream.source_error");
					}
					StreamErrorPolicy::FailFast => {
						subscription.dispose();
						return Err(err);
					}
				},
				Some(StreamEvent::Complete) | None => break,
			},
		}
	}

	subscription.dispose();
	while let Some(joined) = children.join_next().await {
		settle_child(joined, &ctx, options)?;
	}
	tracing::debug!(path = ctx.path(), spawned = index, "engine.stream.completed");
	Ok(Dynamic::Literal(Value::Nil))
}

fn settle_child(joined: std::result::Result<Result<Value>, tokio::task::JoinError>, ctx: &Context, options: StreamOptions) -> Result<()> {
	let err = match joined {
		Ok(Ok(_)) => return Ok(()),
		Ok(Err(err)) if err.is_abandoned() => return Ok(()),
		Ok(Err(err)) => err,
		Err(join) if join.is_cancelled() => return Ok(()),
		Err(join) => EngineError::resolution(format!("stream child panicked: {join}")),
	};
	match options.on_error {
		StreamErrorPolicy::Log => {
			tracing::warn!(path = ctx.path(), error = %err, "engine.stream.child_failed");
			Ok(())
		}
		StreamErrorPolicy::FailFast => Err(err),
	}
}

#[cfg(test)]
mod tests;
