use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use canopy_primitives::poll_once;
use pretty_assertions::assert_eq;
use tokio::sync::Barrier;

use super::*;
use crate::testing::CountingLauncher;
use crate::{EngineError, ErrorKind};

fn ctx() -> Context {
	Context::new(Arc::new(CountingLauncher::new()))
}

fn delayed(ms: u64, value: i32) -> Dynamic {
	Dynamic::from_async(move |_| async move {
		tokio::time::sleep(Duration::from_millis(ms)).await;
		Ok(Dynamic::from(value))
	})
}

#[test]
fn empty_mapping_is_ready_immediately() {
	let out = poll_once(resolve_mapping(BTreeMap::new(), &ctx()));
	assert_eq!(out, Some(Ok(BTreeMap::new())));

	let out = poll_once(resolve_sequence(Vec::new(), &ctx()));
	assert_eq!(out, Some(Ok(Vec::new())));
}

#[tokio::test]
async fn sequence_keeps_input_order() {
	let items = vec![delayed(40, 1), delayed(5, 2), delayed(20, 3)];
	let out = resolve_sequence(items, &ctx()).await.unwrap();
	assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[tokio::test]
async fn mapping_entries_resolve_concurrently() {
	let barrier = Arc::new(Barrier::new(2));
	let entry = |value: i32| {
		let barrier = Arc::clone(&barrier);
		Dynamic::from_async(move |_| {
			let barrier = Arc::clone(&barrier);
			async move {
				barrier.wait().await;
				Ok(Dynamic::from(value))
			}
		})
	};
	let entries = BTreeMap::from([("freq".to_owned(), entry(440)), ("amp".to_owned(), entry(1))]);

	let out = tokio::time::timeout(Duration::from_secs(1), resolve_mapping(entries, &ctx()))
		.await
		.expect("entries should not wait on each other")
		.unwrap();
	assert_eq!(out, BTreeMap::from([("amp".to_owned(), Value::Int(1)), ("freq".to_owned(), Value::Int(440))]));
}

#[tokio::test]
async fn callable_may_return_another_dynamic() {
	let nested = Dynamic::from_fn(|_| Ok(Dynamic::from_fn(|_| Ok(Dynamic::list([Dynamic::from("a"), delayed(1, 7)])))));
	let out = resolve_one(nested, &ctx(), "def").await.unwrap();
	assert_eq!(out, Value::List(vec![Value::from("a"), Value::Int(7)]));
}

#[tokio::test]
async fn callables_see_their_label_path() {
	let probe = Dynamic::from_fn(|ctx| Ok(Dynamic::from(ctx.path().to_owned())));
	let args = Dynamic::map([("freq", probe)]);
	let out = resolve_one(args, &ctx().labelled("root"), "args").await.unwrap();
	assert_eq!(out, Value::Map(BTreeMap::from([("freq".to_owned(), Value::from("root.args.freq"))])));
}

#[tokio::test]
async fn deferred_runs_once_for_all_clones() {
	let runs = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&runs);
	let deferred = Dynamic::deferred(async move {
		counter.fetch_add(1, Ordering::SeqCst);
		Ok(Dynamic::from(3))
	});

	let out = resolve_sequence(vec![deferred.clone(), deferred], &ctx()).await.unwrap();
	assert_eq!(out, vec![Value::Int(3), Value::Int(3)]);
	assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_entry_fails_the_mapping_with_its_label() {
	let entries = BTreeMap::from([
		("freq".to_owned(), Dynamic::from_fn(|_| Err(EngineError::resolution("no such control")))),
		("amp".to_owned(), delayed(50, 1)),
	]);
	let err = resolve_one(Dynamic::Map(entries), &ctx(), "args").await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ResolutionFailed);
	assert_eq!(err.to_string(), "failed to resolve `args.freq`: no such control");
}

#[tokio::test]
async fn resolving_twice_yields_equal_data() {
	let tree = Dynamic::map([("a", Dynamic::from_fn(|_| Ok(Dynamic::from(1)))), ("b", Dynamic::list([delayed(1, 2)]))]);
	let first = resolve_one(tree.clone(), &ctx(), "").await.unwrap();
	let second = resolve_one(tree, &ctx(), "").await.unwrap();
	assert_eq!(first, second);
}
