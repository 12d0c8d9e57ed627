use std::time::Duration;

use canopy_primitives::{AddAction, Message, NodeId, ROOT_GROUP};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::source::{Broadcast, Subscriber, source_fn};
use crate::testing::TestRig;
use crate::tree::{group, run};
use crate::{EngineEvent, ErrorKind, SpawnStage};

fn sine() -> Dynamic {
	synth("sine", BTreeMap::<String, Dynamic>::new())
}

fn record(paths: &Arc<Mutex<Vec<String>>>) -> Dynamic {
	let paths = Arc::clone(paths);
	Dynamic::from_fn(move |ctx| {
		paths.lock().push(ctx.path().to_owned());
		Ok(Dynamic::from(true))
	})
}

async fn subscribed<T: Clone>(source: &Broadcast<T>) {
	tokio::time::timeout(Duration::from_secs(1), async {
		while source.subscriber_count() == 0 {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await
	.expect("stream never subscribed");
}

async fn settled(rig: &TestRig) {
	tokio::time::timeout(Duration::from_secs(1), async {
		while rig.server.watcher().pending() > 0 {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await
	.expect("waits were never released");
}

#[tokio::test]
async fn items_spawn_children_and_completion_resolves_nil() {
	let rig = TestRig::auto_confirming();
	let source = Broadcast::new();
	let ctx = rig.ctx.clone();
	let tree = stream(source.clone());
	let task = tokio::spawn(async move { run(tree, &ctx).await });

	subscribed(&source).await;
	assert_eq!(source.emit(sine()), 1);
	assert_eq!(source.emit(sine()), 1);
	rig.transport.wait_for(2).await;
	source.complete();

	assert_eq!(task.await.unwrap(), Ok(Value::Nil));
	assert_eq!(rig.transport.created(), vec![NodeId(1000), NodeId(1001)]);
	assert_eq!(source.subscriber_count(), 0);
}

#[tokio::test]
async fn children_are_labelled_by_position() {
	let rig = TestRig::auto_confirming();
	let paths = Arc::new(Mutex::new(Vec::new()));
	let source = source_fn({
		let paths = Arc::clone(&paths);
		move |tx: Subscriber<Dynamic>| {
			for _ in 0..3 {
				tx.on_item(record(&paths));
			}
			tx.on_complete();
		}
	});
	assert_eq!(run(stream(source), &rig.ctx.clone().labelled("voices")).await, Ok(Value::Nil));

	let mut paths = paths.lock().clone();
	paths.sort();
	assert_eq!(paths, vec!["voices.0", "voices.1", "voices.2"]);
}

#[tokio::test]
async fn completion_waits_for_in_flight_children() {
	let rig = TestRig::new();
	let source = Broadcast::new();
	let ctx = rig.ctx.clone();
	let tree = stream(source.clone());
	let task = tokio::spawn(async move { run(tree, &ctx).await });

	subscribed(&source).await;
	source.emit(sine());
	rig.transport.wait_for(1).await;
	source.complete();
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(!task.is_finished());

	rig.go(NodeId(1000));
	assert_eq!(task.await.unwrap(), Ok(Value::Nil));
}

#[tokio::test]
async fn source_errors_are_logged_and_the_stream_continues() {
	let rig = TestRig::auto_confirming();
	let source = Broadcast::new();
	let ctx = rig.ctx.clone();
	let tree = stream(source.clone());
	let task = tokio::spawn(async move { run(tree, &ctx).await });

	subscribed(&source).await;
	source.error(EngineError::resolution("clock glitch"));
	source.emit(synth(Dynamic::from_fn(|_| Err(EngineError::resolution("no def"))), BTreeMap::<String, Dynamic>::new()));
	source.emit(sine());
	rig.transport.wait_for(1).await;
	source.complete();

	assert_eq!(task.await.unwrap(), Ok(Value::Nil));
	assert_eq!(rig.transport.created(), vec![NodeId(1000)]);
}

#[tokio::test]
async fn fail_fast_stops_on_source_error() {
	let rig = TestRig::auto_confirming();
	let source = Broadcast::new();
	let ctx = rig.ctx.clone();
	let options = StreamOptions {
		on_error: StreamErrorPolicy::FailFast,
	};
	let tree = stream_with_options(source.clone(), options);
	let task = tokio::spawn(async move { run(tree, &ctx).await });

	subscribed(&source).await;
	source.error(EngineError::resolution("clock glitch"));

	let err = task.await.unwrap().unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ResolutionFailed);
	assert_eq!(source.subscriber_count(), 0);
}

#[tokio::test]
async fn fail_fast_from_config_stops_on_child_failure() {
	let rig = TestRig::auto_confirming();
	let mut config = crate::EngineConfig::default();
	config.stream.on_error = StreamErrorPolicy::FailFast;
	let ctx = crate::Context::with_config(rig.launcher.clone(), config).with_server(rig.server.clone());

	let source = source_fn(|tx: Subscriber<Dynamic>| {
		tx.on_item(synth(Dynamic::from(7), BTreeMap::<String, Dynamic>::new()));
	});
	let err = run(stream(source), &ctx).await.unwrap_err();
	assert_eq!(err.stage(), Some(SpawnStage::Definition));
}

#[tokio::test]
async fn teardown_disposes_subscription_and_children() {
	let rig = TestRig::new();
	let source = Broadcast::new();
	let ctx = rig.ctx.fork(true);
	let scope = ctx.scope().clone();
	let tree = stream(source.clone());
	let task = tokio::spawn(async move { resolve_one(tree, &ctx, "").await });

	subscribed(&source).await;
	source.emit(sine());
	source.emit(sine());
	rig.transport.wait_for(2).await;
	assert_eq!(rig.server.watcher().pending(), 2);

	scope.cancel();
	assert_eq!(task.await.unwrap(), Err(EngineError::Abandoned));
	assert_eq!(source.subscriber_count(), 0);
	assert_eq!(source.emit(sine()), 0);
	settled(&rig).await;
}

#[tokio::test]
async fn streams_spawn_into_their_group() {
	let rig = TestRig::auto_confirming();
	let source = source_fn(|tx: Subscriber<Dynamic>| {
		tokio::spawn(async move {
			tx.on_item(sine());
			tx.on_complete();
		});
	});

	let out = run(group(vec![stream(source)]), &rig.ctx).await.unwrap();
	assert_eq!(out, Value::List(vec![Value::Nil]));
	assert_eq!(
		rig.transport.messages(),
		vec![
			Message::group_new(NodeId(1000), AddAction::Tail, ROOT_GROUP),
			Message::synth_new("sine", NodeId(1001), AddAction::Tail, NodeId(1000), BTreeMap::new()),
		]
	);
}

#[tokio::test]
async fn freeing_the_enclosing_group_disposes_the_stream() {
	let rig = TestRig::auto_confirming();
	let source = Broadcast::new();
	let ctx = rig.ctx.clone();
	let tree = group(vec![stream(source.clone())]);
	let task = tokio::spawn(async move { run(tree, &ctx).await });

	subscribed(&source).await;
	rig.server.apply(&EngineEvent::NodeEnd { node_id: NodeId(1000) });
	assert_eq!(task.await.unwrap(), Err(EngineError::Abandoned));
	assert_eq!(source.subscriber_count(), 0);
	assert_eq!(source.emit(sine()), 0);
}

#[tokio::test]
async fn synth_stream_layers_event_over_base_params() {
	let rig = TestRig::auto_confirming();
	let base = SynthParams::new("pad").arg("amp", 0.1).arg("freq", 220);
	let source = source_fn(|tx: Subscriber<SynthEvent>| {
		tx.on_item(SynthEvent::new("lead").arg("freq", 440));
		tx.on_item(SynthEvent::default().arg("amp", 0.5));
		tx.on_complete();
	});

	assert_eq!(run(synth_stream(source, base), &rig.ctx).await, Ok(Value::Nil));

	let mut spawned: Vec<_> = rig
		.transport
		.messages()
		.into_iter()
		.filter_map(|m| match m {
			Message::SynthNew { def_name, args, .. } => Some((def_name, args)),
			_ => None,
		})
		.collect();
	spawned.sort_by(|a, b| a.0.cmp(&b.0));
	assert_eq!(
		spawned,
		vec![
			("lead".to_owned(), BTreeMap::from([("amp".to_owned(), Value::Float(0.1)), ("freq".to_owned(), Value::Int(440))])),
			("pad".to_owned(), BTreeMap::from([("amp".to_owned(), Value::Float(0.5)), ("freq".to_owned(), Value::Int(220))])),
		]
	);
}

#[tokio::test]
async fn empty_event_def_name_falls_back_to_base() {
	let rig = TestRig::auto_confirming();
	let base = SynthParams::new("pad");
	run(base.synth_for(SynthEvent::new("")), &rig.ctx).await.unwrap();
	assert!(matches!(&rig.transport.messages()[0], Message::SynthNew { def_name, .. } if def_name == "pad"));
}

#[test]
fn synth_events_deserialize_without_def_name() {
	let event: SynthEvent = serde_json::from_str(r#"{"args":{"freq":330}}"#).unwrap();
	assert_eq!(event, SynthEvent::default().arg("freq", 330));
}
