use tokio_util::sync::CancellationToken;

/// Cancellation scope for one subtree of an evaluation.
///
/// Child scopes are cancelled with their parent; cancelling a child leaves the
/// parent untouched. `depth` counts scope boundaries from the root and is only
/// used for tracing.
#[derive(Debug, Clone, Default)]
pub struct ScopeToken {
	depth: u32,
	cancel: CancellationToken,
}

impl ScopeToken {
	/// Creates a root scope.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns how many scope boundaries separate this scope from the root.
	pub const fn depth(&self) -> u32 {
		self.depth
	}

	/// Returns true when this scope or an ancestor has been torn down.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Tears down this scope and every scope derived from it.
	pub fn cancel(&self) {
		tracing::trace!(depth = self.depth, "worker.scope.cancel");
		self.cancel.cancel();
	}

	/// Future resolving when the scope is torn down.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Creates a nested scope one level deeper.
	pub fn child(&self) -> Self {
		Self {
			depth: self.depth.saturating_add(1),
			cancel: self.cancel.child_token(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parent_cancel_reaches_children() {
		let root = ScopeToken::new();
		let child = root.child();
		let grandchild = child.child();
		assert_eq!(grandchild.depth(), 2);

		root.cancel();
		assert!(child.is_cancelled());
		assert!(grandchild.is_cancelled());
	}

	#[test]
	fn child_cancel_leaves_parent_alive() {
		let root = ScopeToken::new();
		let child = root.child();
		child.cancel();
		assert!(child.is_cancelled());
		assert!(!root.is_cancelled());
	}
}
