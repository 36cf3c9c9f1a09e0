use std::sync::Mutex;

use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct DependencyLabel {
    pub dependency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

/// Process-wide metrics registry, shared by every component via `Arc<Metrics>`.
///
/// Names follow the `cdn_edge_*` convention the original project used
/// (`cdn_http_requests_total` etc.), renamed for this binary.
pub struct Metrics {
    registry: Mutex<Registry>,
    pub http_requests_total: Family<HttpLabels, Counter>,
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    pub transform_duration_seconds: Histogram,
    pub circuit_breaker_state: Family<DependencyLabel, Gauge>,
    pub worker_jobs_total: Family<OutcomeLabel, Counter>,
    pub batch_items_total: Family<OutcomeLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "cdn_edge_http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new([0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0].into_iter())
            });
        registry.register(
            "cdn_edge_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let cache_hits_total = Counter::default();
        registry.register("cdn_edge_cache_hits", "Result cache hits", cache_hits_total.clone());
        let cache_misses_total = Counter::default();
        registry.register(
            "cdn_edge_cache_misses",
            "Result cache misses",
            cache_misses_total.clone(),
        );

        let transform_duration_seconds =
            Histogram::new([0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0].into_iter());
        registry.register(
            "cdn_edge_transform_duration_seconds",
            "Image transform duration in seconds",
            transform_duration_seconds.clone(),
        );

        let circuit_breaker_state = Family::<DependencyLabel, Gauge>::default();
        registry.register(
            "cdn_edge_circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            circuit_breaker_state.clone(),
        );

        let worker_jobs_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "cdn_edge_worker_jobs",
            "Worker pool job outcomes",
            worker_jobs_total.clone(),
        );

        let batch_items_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "cdn_edge_batch_items",
            "Batch processor item outcomes",
            batch_items_total.clone(),
        );

        Metrics {
            registry: Mutex::new(registry),
            http_requests_total,
            http_request_duration_seconds,
            cache_hits_total,
            cache_misses_total,
            transform_duration_seconds,
            circuit_breaker_state,
            worker_jobs_total,
            batch_items_total,
        }
    }

    /// Renders every registered metric in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.lock().expect("metrics registry mutex poisoned");
        let _ = encode(&mut buffer, &registry);
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
