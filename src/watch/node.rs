//! Watch node: one subscriber's view of the shared event stream.
//!
//! # Lifecycle
//!
//! ```text
//! WatchSet::new_watch()  -> Created   (id allocated, not registered, inert)
//! WatchNode::start()     -> Started   (registered; delivery task spawned)
//! stop / drop / evict    -> Stopped   (unregistered; result channel closed)
//! ```
//!
//! The delivery task is the only writer of the result channel. It replays the
//! initial events, then buffered events (only when the requested version is
//! non-zero), then consumes the inbound queue until the node is stopped.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::filter::NodeFilter;
use super::set::NodeEntry;
use super::set::WatchSetInner;
use super::UpdateEvent;
use super::WatchEvent;
use crate::metrics::EVENTS_DELIVERED;
use crate::metrics::EVENTS_DROPPED;
use crate::resource::Resource;
use crate::Error;
use crate::Result;
use crate::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Started,
    Stopped,
}

/// Why a watch stopped delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped or dropped by its owner, or the subscriber went away
    Stopped,
    /// The request context bound via `with_cancellation` was cancelled
    Cancelled,
    /// Inbound queue overflowed; the subscriber must re-list and re-watch
    SlowConsumer,
    /// The watch set was shut down
    Shutdown,
}

impl StopReason {
    /// Whether the subscriber missed events and has to re-list
    pub fn requires_resync(&self) -> bool {
        matches!(self, StopReason::SlowConsumer)
    }
}

#[derive(Debug)]
struct NodeStatus {
    state: NodeState,
    stop_reason: Option<StopReason>,
}

/// State shared between a node's handle, its registry entry and its task
#[derive(Debug)]
pub(crate) struct NodeShared {
    id: u64,
    status: Mutex<NodeStatus>,
    cancel: CancellationToken,
}

impl NodeShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            status: Mutex::new(NodeStatus {
                state: NodeState::Created,
                stop_reason: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> NodeState {
        self.status.lock().state
    }

    fn set_state(
        &self,
        state: NodeState,
    ) {
        self.status.lock().state = state;
    }

    /// First reason wins
    pub(crate) fn record_stop_reason(
        &self,
        reason: StopReason,
    ) {
        let mut status = self.status.lock();
        if status.stop_reason.is_none() {
            status.stop_reason = Some(reason);
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.status.lock().stop_reason
    }
}

/// Material only needed until `start`
struct PendingStart<O: Resource> {
    filter: NodeFilter<O>,
    inbound_tx: mpsc::Sender<Arc<UpdateEvent<O>>>,
    inbound_rx: mpsc::Receiver<Arc<UpdateEvent<O>>>,
    result_tx: mpsc::Sender<WatchEvent<O>>,
    context: Option<CancellationToken>,
}

/// Unregisters and cancels the node when dropped
struct NodeGuard<O: Resource> {
    shared: Arc<NodeShared>,
    set: Arc<WatchSetInner<O>>,
}

impl<O: Resource> NodeGuard<O> {
    fn stop(
        &self,
        reason: StopReason,
    ) {
        self.set.remove(self.shared.id(), reason);
        self.shared.record_stop_reason(reason);
        self.shared.cancel.cancel();
        self.shared.set_state(NodeState::Stopped);
    }
}

impl<O: Resource> Drop for NodeGuard<O> {
    fn drop(&mut self) {
        self.stop(StopReason::Stopped);
        trace!(watcher_id = self.shared.id(), "Watch node dropped");
    }
}

/// Handle to a single watch
///
/// Created by [`WatchSet::new_watch`](super::WatchSet::new_watch). Nothing is
/// delivered until [`start`](Self::start) is called. Dropping the handle stops
/// the watch.
pub struct WatchNode<O: Resource> {
    id: u64,
    requested_rv: u64,
    namespace: Option<String>,
    pending: Option<PendingStart<O>>,
    result_rx: mpsc::Receiver<WatchEvent<O>>,
    guard: NodeGuard<O>,
}

impl<O: Resource> fmt::Debug for WatchNode<O> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchNode")
            .field("id", &self.id)
            .field("requested_rv", &self.requested_rv)
            .field("namespace", &self.namespace)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<O: Resource> WatchNode<O> {
    pub(crate) fn new(
        id: u64,
        filter: NodeFilter<O>,
        requested_rv: u64,
        namespace: Option<String>,
        set: Arc<WatchSetInner<O>>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(set.config().inbound_queue_size);
        let (result_tx, result_rx) = mpsc::channel(set.config().result_buffer_size);

        Self {
            id,
            requested_rv,
            namespace,
            pending: Some(PendingStart {
                filter,
                inbound_tx,
                inbound_rx,
                result_tx,
                context: None,
            }),
            result_rx,
            guard: NodeGuard {
                shared: Arc::new(NodeShared::new(id)),
                set,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requested_resource_version(&self) -> u64 {
        self.requested_rv
    }

    /// `None` for cluster-wide watches
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn state(&self) -> NodeState {
        self.guard.shared.state()
    }

    /// Set once the watch stopped or was told to stop
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.guard.shared.stop_reason()
    }

    /// Ties the watch to a request context
    ///
    /// Cancelling `parent` ends delivery and releases the registry slot, with
    /// stop reason `Cancelled`. Has no effect once started.
    pub fn with_cancellation(
        mut self,
        parent: &CancellationToken,
    ) -> Self {
        if let Some(pending) = self.pending.as_mut() {
            pending.context = Some(parent.child_token());
        }
        self
    }

    /// Starts sending events to this watch.
    ///
    /// `initial_events` (typically the list snapshot the watch resumes from)
    /// are delivered first, unchanged. Must be called within a tokio runtime.
    ///
    /// # Errors
    /// - `AlreadyStarted` / `Stopped` when the node is not in `Created` state
    /// - `ResourceVersionTooOld` when the startup buffer no longer holds every
    ///   event after the requested version; the watch is stopped
    pub fn start(
        &mut self,
        initial_events: Vec<WatchEvent<O>>,
    ) -> Result<()> {
        match self.state() {
            NodeState::Created => {}
            NodeState::Started => return Err(WatchError::AlreadyStarted(self.id).into()),
            NodeState::Stopped => return Err(WatchError::Stopped(self.id).into()),
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Fatal(format!("watch {} started outside a tokio runtime: {}", self.id, e)))?;

        let pending = self.pending.take().ok_or(WatchError::AlreadyStarted(self.id))?;
        let context = pending.context.unwrap_or_default();
        if context.is_cancelled() {
            self.guard.stop(StopReason::Cancelled);
            return Err(WatchError::Stopped(self.id).into());
        }

        let shared = self.guard.shared.clone();
        let entry = NodeEntry {
            sender: pending.inbound_tx,
            shared: shared.clone(),
        };
        let replay = match self.guard.set.register(entry, self.requested_rv) {
            Ok(replay) => replay,
            Err(e) => {
                warn!(watcher_id = self.id, "Could not start watch: {}", e);
                self.guard.stop(StopReason::Stopped);
                return Err(e);
            }
        };
        shared.set_state(NodeState::Started);

        debug!(
            watcher_id = self.id,
            requested_rv = self.requested_rv,
            initial_events = initial_events.len(),
            replayed_events = replay.len(),
            "Watch started"
        );

        let task = DeliveryTask {
            shared,
            set: self.guard.set.clone(),
            filter: pending.filter,
            inbound: pending.inbound_rx,
            result_tx: pending.result_tx,
            context,
        };
        runtime.spawn(task.run(initial_events, replay));

        Ok(())
    }

    /// Receiving end of this watch; closed once the watch stops
    pub fn result_chan(&mut self) -> &mut mpsc::Receiver<WatchEvent<O>> {
        &mut self.result_rx
    }

    /// Stops delivery and releases the registry slot. Idempotent.
    pub fn stop(&mut self) {
        self.guard.stop(StopReason::Stopped);
        // Closes the result channel of a node that never started
        self.pending = None;
    }

    /// Converts the handle into a `Stream` that stops the watch when dropped
    ///
    /// A node that was never started yields an empty stream.
    pub fn into_stream(self) -> WatchStream<O> {
        let Self {
            result_rx, guard, ..
        } = self;
        WatchStream {
            inner: ReceiverStream::new(result_rx),
            guard,
        }
    }
}

/// Stream of events of one watch
pub struct WatchStream<O: Resource> {
    inner: ReceiverStream<WatchEvent<O>>,
    guard: NodeGuard<O>,
}

impl<O: Resource> WatchStream<O> {
    pub fn id(&self) -> u64 {
        self.guard.shared.id()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.guard.shared.stop_reason()
    }
}

impl<O: Resource> Stream for WatchStream<O> {
    type Item = WatchEvent<O>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Per-node delivery loop
struct DeliveryTask<O: Resource> {
    shared: Arc<NodeShared>,
    set: Arc<WatchSetInner<O>>,
    filter: NodeFilter<O>,
    inbound: mpsc::Receiver<Arc<UpdateEvent<O>>>,
    result_tx: mpsc::Sender<WatchEvent<O>>,
    context: CancellationToken,
}

impl<O: Resource> DeliveryTask<O> {
    async fn run(
        mut self,
        initial_events: Vec<WatchEvent<O>>,
        replay: Vec<Arc<UpdateEvent<O>>>,
    ) {
        let id = self.shared.id();
        self.deliver(initial_events, replay).await;

        let reason = if self.context.is_cancelled() {
            StopReason::Cancelled
        } else {
            StopReason::Stopped
        };
        self.set.remove(id, reason);
        self.shared.record_stop_reason(reason);
        self.shared.set_state(NodeState::Stopped);

        debug!(
            watcher_id = id,
            reason = ?self.shared.stop_reason(),
            "Watch delivery finished"
        );
        // result_tx drops with self, closing the subscriber's channel
    }

    async fn deliver(
        &mut self,
        initial_events: Vec<WatchEvent<O>>,
        replay: Vec<Arc<UpdateEvent<O>>>,
    ) {
        for event in initial_events {
            if !self.forward(event).await {
                return;
            }
        }

        for update in replay {
            if !self.process(&update).await {
                return;
            }
        }

        loop {
            let update = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return,
                _ = self.context.cancelled() => return,
                update = self.inbound.recv() => match update {
                    Some(update) => update,
                    // unregistered by the watch set
                    None => return,
                },
            };

            if !self.process(&update).await {
                return;
            }
        }
    }

    /// Filters one event; returns false once the node must stop
    async fn process(
        &self,
        update: &UpdateEvent<O>,
    ) -> bool {
        match self.filter.process(update) {
            Ok(Some(event)) => self.forward(event).await,
            Ok(None) => true,
            Err(Error::Watch(e)) => {
                error!(
                    watcher_id = self.shared.id(),
                    event_type = %update.event.event_type,
                    "Could not process event: {}",
                    e
                );
                EVENTS_DROPPED.with_label_values(&[e.reason()]).inc();
                true
            }
            Err(e) => {
                error!(
                    watcher_id = self.shared.id(),
                    "Could not process event: {}",
                    e
                );
                EVENTS_DROPPED.with_label_values(&["internal"]).inc();
                true
            }
        }
    }

    /// Blocks only this node while the subscriber is not draining
    async fn forward(
        &self,
        event: WatchEvent<O>,
    ) -> bool {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => false,
            _ = self.context.cancelled() => false,
            sent = self.result_tx.send(event) => match sent {
                Ok(()) => {
                    EVENTS_DELIVERED.inc();
                    true
                }
                Err(_) => {
                    trace!(watcher_id = self.shared.id(), "Subscriber went away");
                    false
                }
            },
        }
    }
}
