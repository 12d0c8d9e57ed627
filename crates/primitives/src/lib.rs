//! Core data shared by the tree evaluator: node identifiers, plain values
//! and the control messages sent to a synthesis engine.

/// Async future aliases.
pub mod future;
/// Node identifier types.
pub mod ids;
/// Typed control messages and add actions.
pub mod message;
/// Plain data produced by resolution.
pub mod value;

pub use future::{BoxFutureStatic, poll_once};
pub use ids::{NodeId, ROOT_GROUP};
pub use message::{AddAction, Message};
pub use value::{Value, ValueError};
