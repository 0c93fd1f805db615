use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    pipeline_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: opentelemetry-prometheus is deprecated upstream, switch to an OTLP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("imagenet_prediction");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of prediction requests")
            .build();

        let pipeline_duration = meter
            .u64_histogram("pipeline_duration_ms")
            .with_boundaries(vec![1., 5., 10., 25., 50., 100., 250., 500., 1000., 5000.])
            .with_description("Duration of the decode/normalize/infer pipeline in milliseconds")
            .build();

        Metrics {
            request_counter,
            pipeline_duration,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_pipeline_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.pipeline_duration.record(duration_ms, &attributes);
    }
}
