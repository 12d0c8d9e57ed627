//! Push-based event sources with explicit, cancellable subscriptions.
//!
//! A producer holds a [`Subscriber`] and pushes items, errors and completion
//! into it; the consumer holds the matching [`Subscription`]. Disposing the
//! subscription (or dropping it) tells the producer to stop.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::EngineError;

/// One notification pushed by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
	Item(T),
	Error(EngineError),
	Complete,
}

/// Producer end of one subscription.
#[derive(Debug)]
pub struct Subscriber<T> {
	tx: mpsc::UnboundedSender<StreamEvent<T>>,
	disposed: CancellationToken,
}

impl<T> Clone for Subscriber<T> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			disposed: self.disposed.clone(),
		}
	}
}

impl<T> Subscriber<T> {
	/// Pushes an item. Returns `false` once the consumer has gone.
	pub fn on_item(&self, item: T) -> bool {
		self.push(StreamEvent::Item(item))
	}

	/// Pushes an error. Whether the stream continues is the consumer's call.
	pub fn on_error(&self, error: EngineError) -> bool {
		self.push(StreamEvent::Error(error))
	}

	/// Signals that no further items will be pushed.
	pub fn on_complete(self) {
		let _ = self.push(StreamEvent::Complete);
	}

	/// True once the consumer disposed of the subscription.
	pub fn is_disposed(&self) -> bool {
		self.disposed.is_cancelled() || self.tx.is_closed()
	}

	/// Resolves when the consumer disposes of the subscription.
	pub async fn disposed(&self) {
		self.disposed.cancelled().await;
	}

	fn push(&self, event: StreamEvent<T>) -> bool {
		!self.disposed.is_cancelled() && self.tx.send(event).is_ok()
	}
}

/// Consumer end of one subscription. Dropping it disposes the subscription.
#[derive(Debug)]
pub struct Subscription<T> {
	rx: mpsc::UnboundedReceiver<StreamEvent<T>>,
	disposed: CancellationToken,
}

impl<T> Subscription<T> {
	/// Waits for the next event. `None` means every producer handle is gone.
	pub async fn next(&mut self) -> Option<StreamEvent<T>> {
		if self.disposed.is_cancelled() {
			return None;
		}
		self.rx.recv().await
	}

	/// Releases the subscription; producers observe it as disposed.
	pub fn dispose(&mut self) {
		self.disposed.cancel();
		self.rx.close();
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.is_cancelled()
	}
}

impl<T> Drop for Subscription<T> {
	fn drop(&mut self) {
		self.disposed.cancel();
	}
}

/// Creates a connected producer/consumer pair.
pub fn subscription<T>() -> (Subscriber<T>, Subscription<T>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let disposed = CancellationToken::new();
	(
		Subscriber {
			tx,
			disposed: disposed.clone(),
		},
		Subscription { rx, disposed },
	)
}

/// Something a stream can subscribe to.
pub trait Source<T>: Send + Sync + 'static {
	/// Opens a new subscription.
	fn subscribe(&self) -> Subscription<T>;
}

/// Cold source: runs `start` with a fresh subscriber on every subscription.
pub struct FnSource<T, F> {
	start: F,
	_item: PhantomData<fn() -> T>,
}

/// Builds a cold source from a function that starts producing into a
/// subscriber (typically by spawning a task).
pub fn source_fn<T, F>(start: F) -> FnSource<T, F>
where
	T: Send + 'static,
	F: Fn(Subscriber<T>) + Send + Sync + 'static,
{
	FnSource { start, _item: PhantomData }
}

impl<T, F> Source<T> for FnSource<T, F>
where
	T: Send + 'static,
	F: Fn(Subscriber<T>) + Send + Sync + 'static,
{
	fn subscribe(&self) -> Subscription<T> {
		let (subscriber, subscription) = subscription();
		(self.start)(subscriber);
		subscription
	}
}

/// Hot source: every event is pushed to all current subscribers.
#[derive(Debug)]
pub struct Broadcast<T> {
	subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
}

impl<T> Clone for Broadcast<T> {
	fn clone(&self) -> Self {
		Self {
			subscribers: Arc::clone(&self.subscribers),
		}
	}
}

impl<T> Default for Broadcast<T> {
	fn default() -> Self {
		Self {
			subscribers: Arc::new(Mutex::new(Vec::new())),
		}
	}
}

impl<T: Clone> Broadcast<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Pushes an item to every live subscriber, pruning disposed ones.
	/// Returns how many subscribers received it.
	pub fn emit(&self, item: T) -> usize {
		let mut subscribers = self.subscribers.lock();
		subscribers.retain(|s| s.on_item(item.clone()));
		subscribers.len()
	}

	/// Pushes an error to every live subscriber.
	pub fn error(&self, error: EngineError) {
		self.subscribers.lock().retain(|s| s.on_error(error.clone()));
	}

	/// Completes every subscription and forgets the subscribers.
	pub fn complete(&self) {
		for subscriber in std::mem::take(&mut *self.subscribers.lock()) {
			subscriber.on_complete();
		}
	}

	/// Number of subscribers that have not been disposed.
	pub fn subscriber_count(&self) -> usize {
		let mut subscribers = self.subscribers.lock();
		subscribers.retain(|s| !s.is_disposed());
		subscribers.len()
	}
}

impl<T: Clone + Send + 'static> Source<T> for Broadcast<T> {
	fn subscribe(&self) -> Subscription<T> {
		let (subscriber, subscription) = subscription();
		self.subscribers.lock().push(subscriber);
		subscription
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn events_arrive_in_order() {
		let (tx, mut rx) = subscription();
		assert!(tx.on_item(1));
		assert!(tx.on_error(EngineError::resolution("bad event")));
		tx.on_complete();

		assert_eq!(rx.next().await, Some(StreamEvent::Item(1)));
		assert!(matches!(rx.next().await, Some(StreamEvent::Error(_))));
		assert_eq!(rx.next().await, Some(StreamEvent::Complete));
		assert_eq!(rx.next().await, None);
	}

	#[tokio::test]
	async fn dropping_subscription_disposes_producer() {
		let (tx, rx) = subscription::<i32>();
		assert!(!tx.is_disposed());
		drop(rx);
		assert!(tx.is_disposed());
		assert!(!tx.on_item(1));
		tokio::time::timeout(std::time::Duration::from_millis(100), tx.disposed()).await.unwrap();
	}

	#[tokio::test]
	async fn broadcast_prunes_disposed_subscribers() {
		let source = Broadcast::new();
		let mut kept = source.subscribe();
		let mut gone = source.subscribe();
		assert_eq!(source.subscriber_count(), 2);

		gone.dispose();
		assert_eq!(source.emit("a"), 1);
		assert_eq!(kept.next().await, Some(StreamEvent::Item("a")));
		assert_eq!(gone.next().await, None);
	}

	#[tokio::test]
	async fn cold_source_starts_per_subscription() {
		let source = source_fn(|tx: Subscriber<u8>| {
			tx.on_item(1);
			tx.on_complete();
		});
		for _ in 0..2 {
			let mut sub = source.subscribe();
			assert_eq!(sub.next().await, Some(StreamEvent::Item(1)));
			assert_eq!(sub.next().await, Some(StreamEvent::Complete));
		}
	}
}
