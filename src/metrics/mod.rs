use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;

lazy_static! {
    pub static ref ACTIVE_WATCHERS: IntGauge = IntGauge::new(
        "watchset_active_watchers",
        "Number of watch nodes currently registered for live fan-out"
    )
    .expect("metric can not be created");

    pub static ref EVENTS_NOTIFIED: IntCounter = IntCounter::new(
        "watchset_events_notified_total",
        "Events received from the event source"
    )
    .expect("metric can not be created");

    pub static ref EVENTS_DELIVERED: IntCounter = IntCounter::new(
        "watchset_events_delivered_total",
        "Events forwarded to subscribers, after filtering"
    )
    .expect("metric can not be created");

    pub static ref EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "watchset_events_dropped_total",
            "Events dropped for a single watch node"
        ),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref SLOW_CONSUMER_EVICTIONS: IntCounter = IntCounter::new(
        "watchset_slow_consumer_evictions_total",
        "Watch nodes disconnected because their inbound queue was full"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers the watch metrics with [`REGISTRY`]
///
/// Safe to call more than once; later calls are no-ops.
pub fn register_custom_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_WATCHERS.clone()),
        Box::new(EVENTS_NOTIFIED.clone()),
        Box::new(EVENTS_DELIVERED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(SLOW_CONSUMER_EVICTIONS.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => error!("could not register watch metric: {}", e),
        }
    }
}

/// Renders [`REGISTRY`] in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode watch metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("watch metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
