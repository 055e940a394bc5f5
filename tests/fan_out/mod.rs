use std::sync::Arc;

use futures::StreamExt;
use tokio::time::timeout;
use watchset::gather_metrics;
use watchset::register_custom_metrics;
use watchset::EventType;
use watchset::Everything;
use watchset::SelectionPredicate;
use watchset::StopReason;
use watchset::WatchSetConfig;

use crate::commons::*;
use crate::enable_logger;

#[tokio::test]
async fn test_objects_entering_and_leaving_a_selector() {
    enable_logger();
    let store = MemoryStore::new(WatchSetConfig::default());
    for i in 0..5 {
        store.create(pod(&format!("other-{i}"), "default", "prod"));
    }

    let selector = SelectionPredicate::parse("env=prod", "").unwrap();
    let mut node = store.watch(5, selector, None);
    node.start(Vec::new()).unwrap();

    assert_eq!(store.create(pod("o1", "default", "dev")), 6);
    assert_eq!(store.update("default", "o1", |o| o.with_label("env", "prod")), 7);
    assert_eq!(store.update("default", "o1", |o| o.with_label("env", "dev")), 8);

    let events = recv_events(node.result_chan(), 2).await;
    assert_eq!(events[0].event_type, EventType::Added);
    assert_eq!(rv_of(&events[0]), 7);

    assert_eq!(events[1].event_type, EventType::Deleted);
    assert_eq!(rv_of(&events[1]), 8);
    let labels = &events[1].object.metadata.as_ref().unwrap().labels;
    assert_eq!(labels.get("env").map(String::as_str), Some("prod"));

    assert_silent(node.result_chan()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_subscribers_each_see_their_namespace_in_order() {
    enable_logger();
    const NAMESPACES: [&str; 4] = ["ns-0", "ns-1", "ns-2", "ns-3"];
    const WRITES: u64 = 400;

    let store = Arc::new(MemoryStore::new(WatchSetConfig {
        inbound_queue_size: 1024,
        ..Default::default()
    }));

    let mut readers = Vec::new();
    for ns in NAMESPACES {
        for _ in 0..4 {
            let mut node = store.watch(0, Everything, Some(ns));
            node.start(Vec::new()).unwrap();
            readers.push(tokio::spawn(async move {
                let expected = (WRITES / NAMESPACES.len() as u64) as usize;
                let events = recv_events(node.result_chan(), expected).await;
                (node.namespace().map(str::to_string), events)
            }));
        }
    }

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..WRITES {
                let ns = NAMESPACES[(i % NAMESPACES.len() as u64) as usize];
                store.create(pod(&format!("p{i}"), ns, "dev"));
                if i % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };
    writer.await.unwrap();

    for reader in readers {
        let (ns, events) = reader.await.unwrap();
        let ns = ns.unwrap();
        let rvs: Vec<u64> = events.iter().map(rv_of).collect();
        assert!(rvs.windows(2).all(|w| w[0] < w[1]), "out of order for {ns}");
        assert!(events
            .iter()
            .all(|e| e.object.metadata.as_ref().unwrap().namespace == ns));
    }
    assert_eq!(store.watch_set().watcher_count(), 0);
}

#[tokio::test]
async fn test_slow_consumer_resyncs_by_relisting() {
    enable_logger();
    let store = MemoryStore::new(WatchSetConfig {
        inbound_queue_size: 1,
        result_buffer_size: 1,
        ..Default::default()
    });

    let (listed, list_rv) = store.list(None, &Everything);
    let mut slow = store.watch(list_rv, Everything, None);
    slow.start(Vec::new()).unwrap();

    for i in 0..10 {
        store.create(pod(&format!("p{i}"), "default", "dev"));
    }

    let reason = slow.stop_reason().expect("slow consumer evicted");
    assert_eq!(reason, StopReason::SlowConsumer);
    assert!(reason.requires_resync());

    let mut cache = cache_of(listed);
    apply_events(&mut cache, &drain_until_closed(slow.result_chan()).await);
    assert!(cache.len() < 10);

    // Re-list and watch again from the fresh version
    let (listed, list_rv) = store.list(None, &Everything);
    let mut cache = cache_of(listed);
    let mut node = store.watch(list_rv, Everything, None);
    node.start(Vec::new()).unwrap();
    store.delete("default", "p0");

    apply_events(&mut cache, &recv_events(node.result_chan(), 1).await);
    let (current, _) = store.list(None, &Everything);
    assert_eq!(cache, cache_of(current));
}

#[tokio::test]
async fn test_stream_consumers_and_shutdown() {
    enable_logger();
    let store = MemoryStore::new(WatchSetConfig::default());

    let mut first = store.watch(0, Everything, None);
    let mut second = store.watch(0, SelectionPredicate::parse("", "metadata.name=b").unwrap(), None);
    first.start(Vec::new()).unwrap();
    second.start(Vec::new()).unwrap();
    let first = first.into_stream();
    let second = second.into_stream();

    store.create(pod("a", "default", "dev"));
    store.create(pod("b", "default", "dev"));
    store.watch_set().cleanup_watchers();
    assert_eq!(store.watch_set().watcher_count(), 0);
    assert_eq!(first.stop_reason(), Some(StopReason::Shutdown));

    let names = |events: Vec<watchset::WatchEvent<_>>| events.iter().map(name_of).collect::<Vec<_>>();
    let first_events = timeout(RECV_TIMEOUT, first.collect::<Vec<_>>()).await.unwrap();
    let second_events = timeout(RECV_TIMEOUT, second.collect::<Vec<_>>()).await.unwrap();
    assert_eq!(names(first_events), vec!["a", "b"]);
    assert_eq!(names(second_events), vec!["b"]);
}

#[tokio::test]
async fn test_metrics_are_exported() {
    enable_logger();
    register_custom_metrics();
    register_custom_metrics();

    let store = MemoryStore::new(WatchSetConfig::default());
    let mut node = store.watch(0, Everything, None);
    node.start(Vec::new()).unwrap();
    store.create(pod("a", "default", "dev"));
    recv_event(node.result_chan()).await;

    let text = gather_metrics();
    assert!(text.contains("watchset_events_notified_total"));
    assert!(text.contains("watchset_events_delivered_total"));
    assert!(text.contains("watchset_active_watchers"));
}
