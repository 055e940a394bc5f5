//! Startup buffer
//!
//! Keeps recent events so a watch that finished listing state but is not yet
//! registered for live fan-out can replay what it missed.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use super::UpdateEvent;
use crate::resource::accessor;
use crate::resource::Resource;
use crate::Result;
use crate::WatchError;

pub(crate) struct StartupBuffer<O> {
    events: VecDeque<Arc<UpdateEvent<O>>>,
    /// 0 = unbounded
    limit: usize,
    /// Highest resource version evicted so far; 0 while nothing was evicted
    evicted_through_rv: u64,
}

impl<O: Resource> StartupBuffer<O> {
    pub(crate) fn new(
        capacity: usize,
        limit: usize,
    ) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            limit,
            evicted_through_rv: 0,
        }
    }

    pub(crate) fn push(
        &mut self,
        event: Arc<UpdateEvent<O>>,
    ) {
        if self.limit > 0 && self.events.len() >= self.limit {
            if let Some(evicted) = self.events.pop_front() {
                if let Some(rv) = event_rv(&evicted) {
                    self.evicted_through_rv = self.evicted_through_rv.max(rv);
                }
                trace!(
                    evicted_through_rv = self.evicted_through_rv,
                    "Startup buffer full, evicted oldest event"
                );
            }
        }
        self.events.push_back(event);
    }

    /// Fails when events newer than `requested_rv` were already evicted
    pub(crate) fn check_window(
        &self,
        requested_rv: u64,
    ) -> Result<()> {
        if requested_rv != 0 && requested_rv < self.evicted_through_rv {
            return Err(WatchError::ResourceVersionTooOld {
                requested: requested_rv,
                oldest_available: self.evicted_through_rv,
            }
            .into());
        }
        Ok(())
    }

    /// Events newer than `requested_rv`, oldest first
    ///
    /// Events whose version cannot be read are kept; the node that replays
    /// them reports the malformed event.
    pub(crate) fn replay_after(
        &self,
        requested_rv: u64,
    ) -> Vec<Arc<UpdateEvent<O>>> {
        self.events
            .iter()
            .filter(|e| event_rv(e).map_or(true, |rv| rv > requested_rv))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn evicted_through_rv(&self) -> u64 {
        self.evicted_through_rv
    }
}

fn event_rv<O: Resource>(event: &UpdateEvent<O>) -> Option<u64> {
    accessor(&event.event.object)
        .and_then(|meta| meta.resource_version_u64())
        .ok()
}
