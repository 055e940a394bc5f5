use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::DynamicObject;
use crate::SelectionPredicate;
use crate::WatchEvent;
use crate::WatchSet;
use crate::WatchSetConfig;

pub(crate) const RECV_TIMEOUT: Duration = Duration::from_millis(500);
pub(crate) const SILENCE_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) fn pod(
    name: &str,
    namespace: &str,
    rv: u64,
) -> DynamicObject {
    DynamicObject::new("Pod", name)
        .with_namespace(namespace)
        .with_resource_version(rv)
}

pub(crate) fn labeled_pod(
    name: &str,
    namespace: &str,
    rv: u64,
    env: &str,
) -> DynamicObject {
    pod(name, namespace, rv).with_label("env", env)
}

pub(crate) fn prod_selector() -> SelectionPredicate {
    SelectionPredicate::parse("env=prod", "").expect("valid selector")
}

pub(crate) fn test_watch_set() -> WatchSet<DynamicObject> {
    WatchSet::new(WatchSetConfig::default())
}

pub(crate) fn rv_of(event: &WatchEvent<DynamicObject>) -> u64 {
    event
        .object
        .metadata
        .as_ref()
        .expect("metadata")
        .resource_version_u64()
        .expect("numeric resource version")
}

pub(crate) fn name_of(event: &WatchEvent<DynamicObject>) -> &str {
    &event.object.metadata.as_ref().expect("metadata").name
}

/// Receives the next event or panics after `RECV_TIMEOUT`
pub(crate) async fn recv_event(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) -> WatchEvent<DynamicObject> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

/// Receives exactly `n` events
pub(crate) async fn recv_events(
    rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>,
    n: usize,
) -> Vec<WatchEvent<DynamicObject>> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        events.push(recv_event(rx).await);
    }
    events
}

/// Asserts nothing arrives within `SILENCE_TIMEOUT` (channel may stay open)
pub(crate) async fn assert_no_event(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) {
    match timeout(SILENCE_TIMEOUT, rx.recv()).await {
        Err(_) => {}
        Ok(None) => panic!("channel closed unexpectedly"),
        Ok(Some(event)) => panic!("unexpected event: {event:?}"),
    }
}

/// Waits for the channel to close, returning whatever was still delivered
pub(crate) async fn drain_until_closed(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) -> Vec<WatchEvent<DynamicObject>> {
    let mut events = Vec::new();
    loop {
        match timeout(RECV_TIMEOUT, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("channel not closed in time"),
        }
    }
}
