use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// A pinned, boxed future that is required to be Send and 'static.
pub type BoxFutureStatic<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Polls a future once without registering for wakeups.
///
/// Only use this if you know the future is ready or
/// if you are intentionally performing a non-blocking check.
pub fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
	let mut cx = Context::from_waker(Waker::noop());
	match Pin::new(&mut fut).poll(&mut cx) {
		Poll::Ready(res) => Some(res),
		Poll::Pending => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_future_yields_on_first_poll() {
		assert_eq!(poll_once(std::future::ready(7)), Some(7));
	}

	#[test]
	fn pending_future_yields_none() {
		assert_eq!(poll_once(std::future::pending::<()>()), None);
	}
}
