//! Telemetry services exported to other modules through the `ClientHub`.

use dashmap::DashMap;
use modkit::SharedMeterProvider;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider, UpDownCounter};
use opentelemetry::trace::{Tracer, TracerProvider};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, Span};
use std::borrow::Cow;

/// Instrumentation scope name used for instruments and spans created here.
pub const INSTRUMENTATION_SCOPE: &str = "otel_core";

/// Span helpers over the shared tracer provider.
#[derive(Debug, Clone)]
pub struct TraceService {
    tracer: SdkTracer,
}

impl TraceService {
    pub fn new(provider: &SdkTracerProvider) -> Self {
        Self {
            tracer: provider.tracer(INSTRUMENTATION_SCOPE),
        }
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// Start a span; it ends when dropped.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.tracer.start(name)
    }

    /// Run `f` with a new active span.
    pub fn in_span<T, F>(&self, name: impl Into<Cow<'static, str>>, f: F) -> T
    where
        F: FnOnce(Context) -> T,
    {
        self.tracer.in_span(name, f)
    }
}

/// Named-instrument cache over the shared meter. Asking twice for the same
/// name returns the same instrument.
pub struct MetricService {
    meter: Meter,
    counters: DashMap<String, Counter<u64>>,
    up_down_counters: DashMap<String, UpDownCounter<i64>>,
    histograms: DashMap<String, Histogram<f64>>,
    gauges: DashMap<String, Gauge<f64>>,
}

impl std::fmt::Debug for MetricService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricService")
            .field("counters", &self.counters.len())
            .field("up_down_counters", &self.up_down_counters.len())
            .field("histograms", &self.histograms.len())
            .field("gauges", &self.gauges.len())
            .finish()
    }
}

impl MetricService {
    pub fn new(provider: &SharedMeterProvider) -> Self {
        Self {
            meter: provider.meter(INSTRUMENTATION_SCOPE),
            counters: DashMap::new(),
            up_down_counters: DashMap::new(),
            histograms: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn counter(&self, name: &str) -> Counter<u64> {
        self.counters
            .entry(name.to_owned())
            .or_insert_with(|| self.meter.u64_counter(name.to_owned()).build())
            .clone()
    }

    pub fn up_down_counter(&self, name: &str) -> UpDownCounter<i64> {
        self.up_down_counters
            .entry(name.to_owned())
            .or_insert_with(|| self.meter.i64_up_down_counter(name.to_owned()).build())
            .clone()
    }

    pub fn histogram(&self, name: &str) -> Histogram<f64> {
        self.histograms
            .entry(name.to_owned())
            .or_insert_with(|| self.meter.f64_histogram(name.to_owned()).build())
            .clone()
    }

    pub fn gauge(&self, name: &str) -> Gauge<f64> {
        self.gauges
            .entry(name.to_owned())
            .or_insert_with(|| self.meter.f64_gauge(name.to_owned()).build())
            .clone()
    }

    /// Number of distinct instruments created so far.
    pub fn instrument_count(&self) -> usize {
        self.counters.len()
            + self.up_down_counters.len()
            + self.histograms.len()
            + self.gauges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::Span as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use std::sync::Arc;

    #[test]
    fn instruments_are_cached_by_name() {
        let provider: SharedMeterProvider = Arc::new(SdkMeterProvider::builder().build());
        let svc = MetricService::new(&provider);

        svc.counter("jobs.done").add(1, &[]);
        svc.counter("jobs.done").add(2, &[]);
        svc.histogram("jobs.latency").record(1.5, &[]);
        svc.up_down_counter("jobs.active").add(-1, &[]);
        svc.gauge("jobs.queue").record(3.0, &[]);
        svc.gauge("jobs.queue").record(4.0, &[]);

        assert_eq!(svc.instrument_count(), 4);
    }

    #[test]
    fn spans_can_be_started() {
        let provider = SdkTracerProvider::builder().build();
        let svc = TraceService::new(&provider);
        let mut span = svc.start_span("unit");
        assert!(span.is_recording());
        span.end();
        let out = svc.in_span("closure", |_cx| 7);
        assert_eq!(out, 7);
    }
}
