//! Watch fan-out for versioned resources
//!
//! Turns the single, globally ordered stream of storage mutations into one
//! event stream per subscriber, filtered by namespace, predicate and a minimum
//! resource version, in the shape a Kubernetes-style watch API expects.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ Storage      │ notify_watchers(event, old_object)
//! └──────┬───────┘
//!        │ read lock on registry, append to startup buffer
//!        ▼
//! ┌──────────────┐      try_send (never blocks the writer)
//! │  WatchSet    │ ─────────────┬──────────────┬───────────
//! └──────────────┘              ▼              ▼
//!                       ┌─────────────┐ ┌─────────────┐
//!                       │ inbound (N) │ │ inbound (M) │  bounded mpsc
//!                       └──────┬──────┘ └──────┬──────┘
//!                              ▼               ▼
//!                       ┌─────────────┐ ┌─────────────┐
//!                       │ delivery    │ │ delivery    │  one task per watch:
//!                       │ task        │ │ task        │  NodeFilter
//!                       └──────┬──────┘ └──────┬──────┘
//!                              ▼               ▼
//!                         result_chan()   result_chan()    bounded mpsc
//! ```
//!
//! # Ordering and delivery
//!
//! - Per watch, events arrive in emission order; filtering never reorders.
//! - Events at or below the requested resource version are never delivered.
//! - An event emitted while a watch is being started is delivered exactly
//!   once, either from the startup buffer replay or from the live queue.
//! - A modification that moves an object into a watch's view is delivered as
//!   ADDED; one that moves it out is delivered as DELETED carrying the prior
//!   object stamped with the new resource version.
//!
//! # Slow consumers
//!
//! A slow subscriber only ever stalls its own delivery task. When its inbound
//! queue fills up, [`SlowConsumerPolicy`](crate::SlowConsumerPolicy) decides
//! between disconnecting it (default; `stop_reason()` becomes
//! [`StopReason::SlowConsumer`]) and dropping the event for it.
//!
//! # Errors
//!
//! Malformed objects, unparseable resource versions, predicate failures and
//! modifications without `old_object` are logged and the event is dropped for
//! the affected watch only. Other watches and the notifier never see them.

mod buffer;
mod event;
mod filter;
mod node;
mod set;

pub use event::*;
pub use node::NodeState;
pub use node::StopReason;
pub use node::WatchNode;
pub use node::WatchStream;
pub use set::WatchSet;
