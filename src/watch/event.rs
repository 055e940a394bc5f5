use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Kind of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            EventType::Added => write!(f, "ADDED"),
            EventType::Modified => write!(f, "MODIFIED"),
            EventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Event as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent<O> {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: O,
}

impl<O> WatchEvent<O> {
    pub fn new(
        event_type: EventType,
        object: O,
    ) -> Self {
        Self { event_type, object }
    }

    pub fn added(object: O) -> Self {
        Self::new(EventType::Added, object)
    }

    pub fn modified(object: O) -> Self {
        Self::new(EventType::Modified, object)
    }

    pub fn deleted(object: O) -> Self {
        Self::new(EventType::Deleted, object)
    }
}

/// Event as emitted by the storage layer, shared by every watch node
///
/// `old_object` is only set for modifications. Predicate-filtered watches
/// need it to turn a MODIFIED into ADDED or DELETED when the object crosses
/// the filter boundary.
#[derive(Debug, Clone)]
pub struct UpdateEvent<O> {
    pub event: WatchEvent<O>,
    pub old_object: Option<O>,
}

impl<O> UpdateEvent<O> {
    pub fn new(
        event: WatchEvent<O>,
        old_object: Option<O>,
    ) -> Self {
        Self { event, old_object }
    }
}
