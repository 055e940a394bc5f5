//! In-process watch engine for versioned, namespaced resources.
//!
//! A storage layer reports every committed mutation to a [`WatchSet`]; API
//! handlers open [`WatchNode`]s on it and stream the per-subscriber results.

mod config;
mod constants;
mod errors;
mod metrics;
mod predicate;
mod resource;
mod watch;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use predicate::*;
pub use resource::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
