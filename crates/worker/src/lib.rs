//! Task primitives shared by the tree evaluator.
//!
//! * [`spawn`]: runtime-aware task spawning tagged with a [`TaskClass`]
//! * [`WorkerJoinSet`]: owned set of child tasks, aborted on drop
//! * [`ScopeToken`]: hierarchical cancellation mirroring the evaluation tree

mod class;
mod join_set;
mod spawn;
mod token;

pub use class::TaskClass;
pub use join_set::WorkerJoinSet;
pub use spawn::spawn;
pub use token::ScopeToken;
