/// Execution classes used to tag spawned work in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Children spawned for items pushed by a stream source.
	Stream,
	/// Draining a server's notification feed into its node watcher.
	Notifications,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Stream => "stream",
			Self::Notifications => "notifications",
		}
	}
}
