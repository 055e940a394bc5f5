use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use watchset::DynamicObject;
use watchset::Predicate;
use watchset::WatchEvent;
use watchset::WatchNode;
use watchset::WatchSet;
use watchset::WatchSetConfig;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(100);

pub fn pod(
    name: &str,
    namespace: &str,
    env: &str,
) -> DynamicObject {
    DynamicObject::new("Pod", name)
        .with_namespace(namespace)
        .with_label("env", env)
}

pub fn rv_of(event: &WatchEvent<DynamicObject>) -> u64 {
    event
        .object
        .metadata
        .as_ref()
        .and_then(|m| m.resource_version_u64().ok())
        .expect("numeric resource version")
}

pub fn name_of(event: &WatchEvent<DynamicObject>) -> String {
    event.object.metadata.as_ref().map(|m| m.name.clone()).unwrap_or_default()
}

pub async fn recv_event(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) -> WatchEvent<DynamicObject> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

pub async fn recv_events(
    rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>,
    n: usize,
) -> Vec<WatchEvent<DynamicObject>> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        events.push(recv_event(rx).await);
    }
    events
}

pub async fn assert_silent(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) {
    if let Ok(Some(event)) = timeout(SILENCE_TIMEOUT, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

pub async fn drain_until_closed(rx: &mut mpsc::Receiver<WatchEvent<DynamicObject>>) -> Vec<WatchEvent<DynamicObject>> {
    let mut events = Vec::new();
    while let Some(event) = timeout(RECV_TIMEOUT, rx.recv()).await.expect("channel not closed in time") {
        events.push(event);
    }
    events
}

#[derive(Default)]
struct StoreState {
    resource_version: u64,
    objects: BTreeMap<(String, String), DynamicObject>,
}

/// Minimal versioned store driving a watch set the way a storage layer does
///
/// Every write bumps the global resource version and notifies while still
/// holding the store lock, so notifications are serialized.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    watch_set: WatchSet<DynamicObject>,
}

impl MemoryStore {
    pub fn new(config: WatchSetConfig) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            watch_set: WatchSet::new(config),
        }
    }

    pub fn watch_set(&self) -> &WatchSet<DynamicObject> {
        &self.watch_set
    }

    pub fn create(
        &self,
        obj: DynamicObject,
    ) -> u64 {
        let mut state = self.state.lock();
        state.resource_version += 1;
        let rv = state.resource_version;

        let obj = obj.with_resource_version(rv);
        state.objects.insert(key_of(&obj), obj.clone());
        self.watch_set.notify_added(obj);
        rv
    }

    pub fn update(
        &self,
        namespace: &str,
        name: &str,
        mutate: impl FnOnce(DynamicObject) -> DynamicObject,
    ) -> u64 {
        let mut state = self.state.lock();
        state.resource_version += 1;
        let rv = state.resource_version;

        let key = (namespace.to_string(), name.to_string());
        let old = state.objects.get(&key).cloned().expect("object exists");
        let new = mutate(old.clone()).with_resource_version(rv);
        state.objects.insert(key, new.clone());
        self.watch_set.notify_modified(new, old);
        rv
    }

    pub fn delete(
        &self,
        namespace: &str,
        name: &str,
    ) -> u64 {
        let mut state = self.state.lock();
        state.resource_version += 1;
        let rv = state.resource_version;

        let key = (namespace.to_string(), name.to_string());
        let obj = state.objects.remove(&key).expect("object exists");
        self.watch_set.notify_deleted(obj.with_resource_version(rv));
        rv
    }

    /// Current objects visible to `predicate` and the version they were read at
    pub fn list(
        &self,
        namespace: Option<&str>,
        predicate: &dyn Predicate<DynamicObject>,
    ) -> (Vec<DynamicObject>, u64) {
        let state = self.state.lock();
        let objects = state
            .objects
            .values()
            .filter(|o| namespace.map_or(true, |ns| o.metadata.as_ref().map(|m| m.namespace.as_str()) == Some(ns)))
            .filter(|o| predicate.matches(o).unwrap_or(false))
            .cloned()
            .collect();
        (objects, state.resource_version)
    }

    pub fn watch<P>(
        &self,
        resource_version: u64,
        predicate: P,
        namespace: Option<&str>,
    ) -> WatchNode<DynamicObject>
    where
        P: Predicate<DynamicObject> + 'static,
    {
        self.watch_set.new_watch(resource_version, predicate, namespace)
    }
}

fn key_of(obj: &DynamicObject) -> (String, String) {
    let meta = obj.metadata.as_ref().expect("metadata");
    (meta.namespace.clone(), meta.name.clone())
}

/// Applies watch events to a client-side cache keyed by namespace/name
pub fn apply_events(
    cache: &mut BTreeMap<(String, String), DynamicObject>,
    events: &[WatchEvent<DynamicObject>],
) {
    use watchset::EventType;

    for event in events {
        let key = key_of(&event.object);
        match event.event_type {
            EventType::Added | EventType::Modified => {
                cache.insert(key, event.object.clone());
            }
            EventType::Deleted => {
                cache.remove(&key);
            }
        }
    }
}

pub fn cache_of(objects: Vec<DynamicObject>) -> BTreeMap<(String, String), DynamicObject> {
    objects.into_iter().map(|o| (key_of(&o), o)).collect()
}
