//! Deep resolution of [`Dynamic`] trees into plain [`Value`]s.
//!
//! Structure is preserved: mapping keys stay put and sequences keep their
//! input order whatever order their elements complete in. Siblings are
//! resolved concurrently on the caller's task; the first failure wins and the
//! remaining siblings are dropped, which releases anything they registered.

use std::collections::BTreeMap;

use canopy_primitives::{BoxFutureStatic, Value};
use futures::FutureExt;
use futures::future::try_join_all;

use crate::{Context, Dynamic, Result};

/// Resolves a single dynamic value.
///
/// Callables are invoked with `ctx` extended by `label`; whatever they
/// return is resolved in turn until a plain value is reached. Each callable is
/// expected to settle within a hop or two; chains are not bounded at runtime.
pub fn resolve_one(value: Dynamic, ctx: &Context, label: &str) -> BoxFutureStatic<Result<Value>> {
	let ctx = ctx.clone();
	let label = label.to_owned();
	async move {
		let mut current = value;
		loop {
			current = match current {
				Dynamic::Literal(v) => return Ok(v),
				Dynamic::Map(entries) => return resolve_entries(entries, &ctx, Some(&label)).await.map(Value::Map),
				Dynamic::List(items) => return resolve_items(items, &ctx, Some(&label)).await.map(Value::List),
				Dynamic::Callable(f) => {
					tracing::trace!(path = ctx.path(), label = %label, "engine.resolve.call");
					f(ctx.clone().labelled(&label)).await.map_err(|e| e.labelled(&label))?
				}
				Dynamic::Deferred(fut) => fut.await.map_err(|e| e.labelled(&label))?,
			};
		}
	}
	.boxed()
}

/// Resolves every entry of a mapping concurrently; keys are the labels.
pub fn resolve_mapping(entries: BTreeMap<String, Dynamic>, ctx: &Context) -> BoxFutureStatic<Result<BTreeMap<String, Value>>> {
	resolve_entries(entries, ctx, None)
}

/// Resolves every element concurrently; positions are the labels.
pub fn resolve_sequence(items: Vec<Dynamic>, ctx: &Context) -> BoxFutureStatic<Result<Vec<Value>>> {
	resolve_items(items, ctx, None)
}

fn child_label(prefix: Option<&str>, label: &str) -> String {
	match prefix {
		Some(prefix) if !prefix.is_empty() => format!("{prefix}.{label}"),
		_ => label.to_owned(),
	}
}

fn resolve_entries(entries: BTreeMap<String, Dynamic>, ctx: &Context, prefix: Option<&str>) -> BoxFutureStatic<Result<BTreeMap<String, Value>>> {
	if entries.is_empty() {
		return std::future::ready(Ok(BTreeMap::new())).boxed();
	}
	let (keys, pending): (Vec<_>, Vec<_>) = entries
		.into_iter()
		.map(|(key, value)| {
			let fut = resolve_one(value, ctx, &child_label(prefix, &key));
			(key, fut)
		})
		.unzip();
	async move {
		let values = try_join_all(pending).await?;
		Ok(keys.into_iter().zip(values).collect())
	}
	.boxed()
}

fn resolve_items(items: Vec<Dynamic>, ctx: &Context, prefix: Option<&str>) -> BoxFutureStatic<Result<Vec<Value>>> {
	if items.is_empty() {
		return std::future::ready(Ok(Vec::new())).boxed();
	}
	let pending: Vec<_> = items
		.into_iter()
		.enumerate()
		.map(|(index, item)| resolve_one(item, ctx, &child_label(prefix, &index.to_string())))
		.collect();
	try_join_all(pending).boxed()
}

#[cfg(test)]
mod tests;
