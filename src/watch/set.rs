//! Registry of live watches and the fan-out path
//!
//! # Locking
//!
//! - `nodes`: read-locked by `notify_watchers`, write-locked by registration
//!   and removal.
//! - `buffered`: the startup buffer, with its own lock. Always acquired after
//!   `nodes`.
//!
//! Registration takes the `nodes` write lock and snapshots the buffer while
//! holding it, and `notify_watchers` appends to the buffer while holding the
//! `nodes` read lock. An event is therefore either in a new node's replay
//! snapshot or in its inbound queue, never both and never neither.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::buffer::StartupBuffer;
use super::filter::NodeFilter;
use super::node::NodeShared;
use super::node::StopReason;
use super::EventType;
use super::UpdateEvent;
use super::WatchEvent;
use super::WatchNode;
use crate::constants::DROP_REASON_QUEUE_CLOSED;
use crate::constants::DROP_REASON_QUEUE_FULL;
use crate::metrics::ACTIVE_WATCHERS;
use crate::metrics::EVENTS_DROPPED;
use crate::metrics::EVENTS_NOTIFIED;
use crate::metrics::SLOW_CONSUMER_EVICTIONS;
use crate::predicate::Predicate;
use crate::resource::Resource;
use crate::Error;
use crate::Result;
use crate::SlowConsumerPolicy;
use crate::WatchSetConfig;

/// Registry side of a started node
pub(crate) struct NodeEntry<O> {
    pub(crate) sender: mpsc::Sender<Arc<UpdateEvent<O>>>,
    pub(crate) shared: Arc<NodeShared>,
}

pub(crate) struct WatchSetInner<O> {
    nodes: RwLock<HashMap<u64, NodeEntry<O>>>,
    counter: AtomicU64,
    buffered: RwLock<StartupBuffer<O>>,
    config: WatchSetConfig,
}

impl<O: Resource> WatchSetInner<O> {
    pub(crate) fn config(&self) -> &WatchSetConfig {
        &self.config
    }

    /// Inserts a started node and returns the buffered events it must replay
    pub(crate) fn register(
        &self,
        entry: NodeEntry<O>,
        requested_rv: u64,
    ) -> Result<Vec<Arc<UpdateEvent<O>>>> {
        let id = entry.shared.id();
        let mut nodes = self.nodes.write();

        let replay = {
            let buffered = self.buffered.read();
            buffered.check_window(requested_rv)?;
            // A watch from "now" already got current state from its list
            if requested_rv != 0 {
                buffered.replay_after(requested_rv)
            } else {
                Vec::new()
            }
        };

        if nodes.insert(id, entry).is_some() {
            return Err(Error::Fatal(format!("watch node {id} registered twice")));
        }
        ACTIVE_WATCHERS.inc();

        trace!(watcher_id = id, watchers = nodes.len(), "Watch node registered");
        Ok(replay)
    }

    /// Unregisters a node, closing its inbound queue. Idempotent.
    pub(crate) fn remove(
        &self,
        id: u64,
        reason: StopReason,
    ) -> bool {
        let removed = self.nodes.write().remove(&id);
        match removed {
            Some(entry) => {
                entry.shared.record_stop_reason(reason);
                ACTIVE_WATCHERS.dec();
                trace!(watcher_id = id, ?reason, "Watch node unregistered");
                true
            }
            None => false,
        }
    }
}

/// Keeps track of which watches need to be notified
///
/// Cheap to clone; clones share the same registry. Owned by the storage layer
/// and handed to request handlers.
///
/// # Example
///
/// ```ignore
/// let watch_set: WatchSet<DynamicObject> = WatchSet::new(WatchSetConfig::default());
///
/// let mut node = watch_set.new_watch(list_rv, SelectionPredicate::parse("env=prod", "")?, Some("default"));
/// node.start(initial_events)?;
///
/// // storage layer, after every committed mutation
/// watch_set.notify_modified(new_obj, old_obj);
///
/// while let Some(event) = node.result_chan().recv().await {
///     // stream to the client
/// }
/// ```
pub struct WatchSet<O: Resource> {
    inner: Arc<WatchSetInner<O>>,
}

impl<O: Resource> Clone for WatchSet<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O: Resource> Default for WatchSet<O> {
    fn default() -> Self {
        Self::new(WatchSetConfig::default())
    }
}

impl<O: Resource> fmt::Debug for WatchSet<O> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchSet")
            .field("watchers", &self.watcher_count())
            .field("buffered", &self.buffered_len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<O: Resource> WatchSet<O> {
    pub fn new(config: WatchSetConfig) -> Self {
        let buffered = StartupBuffer::new(config.startup_buffer_capacity, config.startup_buffer_limit);
        Self {
            inner: Arc::new(WatchSetInner {
                nodes: RwLock::new(HashMap::with_capacity(20)),
                counter: AtomicU64::new(0),
                buffered: RwLock::new(buffered),
                config,
            }),
        }
    }

    pub fn config(&self) -> &WatchSetConfig {
        &self.inner.config
    }

    /// Creates a new watch with a unique id, but does not send events to it
    /// until [`WatchNode::start`] is called.
    ///
    /// An empty `namespace` is the same as `None`: cluster-wide.
    pub fn new_watch<P>(
        &self,
        requested_rv: u64,
        predicate: P,
        namespace: Option<&str>,
    ) -> WatchNode<O>
    where
        P: Predicate<O> + 'static,
    {
        self.new_watch_shared(requested_rv, Arc::new(predicate), namespace)
    }

    /// Same as [`new_watch`](Self::new_watch) for an already shared predicate
    pub fn new_watch_shared(
        &self,
        requested_rv: u64,
        predicate: Arc<dyn Predicate<O>>,
        namespace: Option<&str>,
    ) -> WatchNode<O> {
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);

        trace!(
            watcher_id = id,
            requested_rv,
            namespace = ?namespace,
            "Watch node created"
        );

        let filter = NodeFilter::new(requested_rv, namespace.clone(), predicate);
        WatchNode::new(id, filter, requested_rv, namespace, self.inner.clone())
    }

    /// Fans one committed mutation out to every live watch.
    ///
    /// `old_object` must be set for modifications so predicate-filtered
    /// watches can detect objects entering or leaving their view. Never
    /// blocks: a watch whose inbound queue is full is handled according to
    /// [`SlowConsumerPolicy`]. Callers serialize notifications.
    pub fn notify_watchers(
        &self,
        event: WatchEvent<O>,
        old_object: Option<O>,
    ) {
        if event.event_type == EventType::Modified && old_object.is_none() {
            warn!("Modified event notified without oldObject; filtered watches will drop it");
        }

        let update = Arc::new(UpdateEvent::new(event, old_object));
        EVENTS_NOTIFIED.inc();

        let mut evicted = Vec::new();
        let mut closed = Vec::new();
        {
            let nodes = self.inner.nodes.read();

            // Always buffered: a node may have listed state but not be
            // registered yet
            self.inner.buffered.write().push(update.clone());

            for (id, node) in nodes.iter() {
                match node.sender.try_send(update.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        EVENTS_DROPPED
                            .with_label_values(&[DROP_REASON_QUEUE_FULL])
                            .inc();
                        match self.inner.config.slow_consumer_policy {
                            SlowConsumerPolicy::Disconnect => evicted.push(*id),
                            SlowConsumerPolicy::Drop => {
                                warn!(watcher_id = id, "Watch inbound queue full, event dropped");
                            }
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        EVENTS_DROPPED
                            .with_label_values(&[DROP_REASON_QUEUE_CLOSED])
                            .inc();
                        closed.push(*id);
                    }
                }
            }

            trace!(
                event_type = %update.event.event_type,
                watchers = nodes.len(),
                "Event dispatched"
            );
        }

        for id in evicted {
            if self.inner.remove(id, StopReason::SlowConsumer) {
                SLOW_CONSUMER_EVICTIONS.inc();
                warn!(
                    watcher_id = id,
                    policy = %SlowConsumerPolicy::Disconnect,
                    "Watch inbound queue full, disconnecting slow consumer"
                );
            }
        }
        for id in closed {
            self.inner.remove(id, StopReason::Stopped);
        }
    }

    pub fn notify_added(
        &self,
        object: O,
    ) {
        self.notify_watchers(WatchEvent::added(object), None);
    }

    pub fn notify_modified(
        &self,
        object: O,
        old_object: O,
    ) {
        self.notify_watchers(WatchEvent::modified(object), Some(old_object));
    }

    pub fn notify_deleted(
        &self,
        object: O,
    ) {
        self.notify_watchers(WatchEvent::deleted(object), None);
    }

    /// Stops every live watch, used at shutdown.
    ///
    /// Inbound queues are closed; events already queued are still delivered
    /// before each result channel closes.
    pub fn cleanup_watchers(&self) {
        let drained: Vec<(u64, NodeEntry<O>)> = self.inner.nodes.write().drain().collect();
        info!(watchers = drained.len(), "Stopping all watch nodes");

        for (id, entry) in drained {
            entry.shared.record_stop_reason(StopReason::Shutdown);
            ACTIVE_WATCHERS.dec();
            debug!(watcher_id = id, "Watch node stopped for shutdown");
            // entry.sender drops here, closing the inbound queue
        }
    }

    /// Number of started, live watches
    pub fn watcher_count(&self) -> usize {
        self.inner.nodes.read().len()
    }

    /// Number of events held for startup replay
    pub fn buffered_len(&self) -> usize {
        self.inner.buffered.read().len()
    }

    /// Highest resource version no longer available for replay
    pub fn evicted_through_resource_version(&self) -> u64 {
        self.inner.buffered.read().evicted_through_rv()
    }
}
