//! Watch Subsystem Error Hierarchy
//!
//! Defines the error types surfaced by the watch fan-out engine, split between
//! configuration problems and per-event / per-watch failures.

use std::num::ParseIntError;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Watch registration, filtering and delivery failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Unrecoverable failures caused by a broken internal invariant
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Object carries no metadata accessor
    #[error("Could not get accessor to object")]
    MalformedObject,

    /// Resource version on an object (or in a request) is not an unsigned integer
    #[error("Invalid resource version {value:?}")]
    InvalidResourceVersion {
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// Predicate evaluation failed
    #[error("Predicate evaluation failed: {0}")]
    Predicate(String),

    /// Event source broke the contract of attaching the prior object to modifications
    #[error("oldObject should be set for modified events (resource version {resource_version})")]
    MissingOldObject { resource_version: u64 },

    /// Label or field selector could not be parsed
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// `start` called on a node that is already delivering
    #[error("Watch {0} already started")]
    AlreadyStarted(u64),

    /// `start` called on a node that has been stopped
    #[error("Watch {0} has been stopped")]
    Stopped(u64),

    /// Requested version predates what the startup buffer still retains
    #[error("Too old resource version: {requested} (oldest available {oldest_available})")]
    ResourceVersionTooOld { requested: u64, oldest_available: u64 },
}

impl WatchError {
    /// Short, stable label used for drop metrics
    pub fn reason(&self) -> &'static str {
        match self {
            WatchError::MalformedObject => "malformed_object",
            WatchError::InvalidResourceVersion { .. } => "invalid_resource_version",
            WatchError::Predicate(_) => "predicate",
            WatchError::MissingOldObject { .. } => "missing_old_object",
            WatchError::InvalidSelector(_) => "invalid_selector",
            WatchError::AlreadyStarted(_) => "already_started",
            WatchError::Stopped(_) => "stopped",
            WatchError::ResourceVersionTooOld { .. } => "too_old_resource_version",
        }
    }
}
