
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref OPERATION_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("operation_total", "Repository operations by outcome"),
        &["operation", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events_delivered", "Change events handed to handlers or caches"),
        &["consumer"]
    )
    .expect("metric can not be created");

    pub static ref LOCK_WAIT_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("lock_wait_seconds", "Time spent acquiring distributed locks")
            .buckets(exponential_buckets(0.001, 4.0, 10).expect("valid buckets")),
        &["kind", "acquired"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("coordkit".to_string()), None)
            .expect("registry can be created");
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(OPERATION_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_EVENTS_DELIVERED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOCK_WAIT_SECONDS.clone()))
        .expect("collector can be registered");
}

pub(crate) fn record_operation(
    operation: &str,
    outcome: &str,
) {
    OPERATION_TOTAL.with_label_values(&[operation, outcome]).inc();
}

/// Renders every coordkit metric in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
