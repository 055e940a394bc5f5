//! Per-watch filtering and event rewriting
//!
//! Given the shared event stream, decides for one watch which events it sees
//! and in which form:
//!
//! | current matches | prior matched | raw type          | emitted                     |
//! |-----------------|---------------|-------------------|-----------------------------|
//! | yes             | no            | MODIFIED          | ADDED(current)              |
//! | yes             | yes           | MODIFIED          | MODIFIED(current)           |
//! | yes             | -             | ADDED / DELETED   | unchanged                   |
//! | no              | yes           | MODIFIED          | DELETED(prior, rv of event) |
//! | no              | no / -        | any               | nothing                     |

use std::sync::Arc;

use super::EventType;
use super::UpdateEvent;
use super::WatchEvent;
use crate::predicate::Predicate;
use crate::resource::accessor;
use crate::resource::accessor_mut;
use crate::resource::Resource;
use crate::Result;
use crate::WatchError;

pub(crate) struct NodeFilter<O: Resource> {
    /// Events at or below this version are never delivered
    requested_rv: u64,
    /// `None` = cluster-wide
    namespace: Option<String>,
    predicate: Arc<dyn Predicate<O>>,
}

impl<O: Resource> NodeFilter<O> {
    pub(crate) fn new(
        requested_rv: u64,
        namespace: Option<String>,
        predicate: Arc<dyn Predicate<O>>,
    ) -> Self {
        Self {
            requested_rv,
            namespace,
            predicate,
        }
    }

    /// Returns the event to forward, `None` to skip it
    pub(crate) fn process(
        &self,
        update: &UpdateEvent<O>,
    ) -> Result<Option<WatchEvent<O>>> {
        let Some((event_rv, is_current_match)) = self.is_valid(update)? else {
            return Ok(None);
        };

        if is_current_match {
            self.handle_added_to_filtered_list(update, event_rv).map(Some)
        } else {
            self.handle_deleted_from_filtered_list(update, event_rv)
        }
    }

    /// Version and scope gate
    ///
    /// `None` when the event is out of range for this watch, otherwise the
    /// event's resource version and whether the current object matches.
    fn is_valid(
        &self,
        update: &UpdateEvent<O>,
    ) -> Result<Option<(u64, bool)>> {
        let meta = accessor(&update.event.object)?;
        let event_rv = meta.resource_version_u64()?;

        if event_rv <= self.requested_rv {
            return Ok(None);
        }

        if let Some(namespace) = &self.namespace {
            if namespace != &meta.namespace {
                return Ok(None);
            }
        }

        let is_current_match = self.predicate.matches(&update.event.object)?;
        Ok(Some((event_rv, is_current_match)))
    }

    /// Current object matches
    fn handle_added_to_filtered_list(
        &self,
        update: &UpdateEvent<O>,
        event_rv: u64,
    ) -> Result<WatchEvent<O>> {
        let mut event = update.event.clone();
        if event.event_type != EventType::Modified {
            return Ok(event);
        }

        let old_object = update.old_object.as_ref().ok_or(WatchError::MissingOldObject {
            resource_version: event_rv,
        })?;

        if !self.predicate.matches(old_object)? {
            event.event_type = EventType::Added;
        }
        Ok(event)
    }

    /// Current object does not match; only a modification whose prior object
    /// matched produces an event
    fn handle_deleted_from_filtered_list(
        &self,
        update: &UpdateEvent<O>,
        event_rv: u64,
    ) -> Result<Option<WatchEvent<O>>> {
        if update.event.event_type != EventType::Modified {
            return Ok(None);
        }

        let old_object = update.old_object.as_ref().ok_or(WatchError::MissingOldObject {
            resource_version: event_rv,
        })?;

        if !self.predicate.matches(old_object)? {
            return Ok(None);
        }

        // isn't a match but used to be
        let mut object = old_object.clone();
        let current_rv = accessor(&update.event.object)?.resource_version.clone();
        accessor_mut(&mut object)?.set_resource_version(current_rv);

        Ok(Some(WatchEvent::deleted(object)))
    }
}
