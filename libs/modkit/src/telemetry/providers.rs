use anyhow::Context;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    trace::SdkTracerProvider,
    Resource,
};
use runtime::TelemetryConfig;
use std::sync::Arc;

/// Meter provider shared by every module for the lifetime of the process.
pub type SharedMeterProvider = Arc<dyn MeterProvider + Send + Sync>;

/// Process-wide SDK providers. Cloning is cheap; all clones refer to the same
/// pipelines.
#[derive(Clone, Debug)]
pub struct TelemetryProviders {
    meter: SdkMeterProvider,
    tracer: SdkTracerProvider,
}

impl TelemetryProviders {
    /// Build providers from configuration. With an OTLP endpoint both signals
    /// are exported over gRPC; without one the providers record in-process only.
    pub fn init(cfg: &TelemetryConfig) -> anyhow::Result<Self> {
        let resource = Resource::builder()
            .with_service_name(cfg.service_name.clone())
            .build();

        let Some(endpoint) = cfg.otlp_endpoint.as_deref() else {
            tracing::info!(service = %cfg.service_name, "telemetry: no OTLP endpoint, export disabled");
            return Ok(Self {
                meter: SdkMeterProvider::builder()
                    .with_resource(resource.clone())
                    .build(),
                tracer: SdkTracerProvider::builder().with_resource(resource).build(),
            });
        };

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("creating OTLP metric exporter")?;
        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(cfg.export_interval)
            .build();

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("creating OTLP span exporter")?;

        tracing::info!(
            service = %cfg.service_name,
            endpoint,
            interval = ?cfg.export_interval,
            "telemetry: OTLP export enabled"
        );

        Ok(Self {
            meter: SdkMeterProvider::builder()
                .with_resource(resource.clone())
                .with_reader(reader)
                .build(),
            tracer: SdkTracerProvider::builder()
                .with_resource(resource)
                .with_batch_exporter(span_exporter)
                .build(),
        })
    }

    /// Wrap externally built providers (tests, embedding hosts).
    pub fn from_parts(meter: SdkMeterProvider, tracer: SdkTracerProvider) -> Self {
        Self { meter, tracer }
    }

    pub fn meter_provider(&self) -> SharedMeterProvider {
        Arc::new(self.meter.clone())
    }

    pub fn tracer_provider(&self) -> SdkTracerProvider {
        self.tracer.clone()
    }

    /// Flush and shut down both pipelines. Errors are logged, the first one is returned.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        let metrics = self.meter.shutdown();
        let traces = self.tracer.shutdown();
        if let Err(e) = &metrics {
            tracing::warn!(error = %e, "meter provider shutdown failed");
        }
        if let Err(e) = &traces {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
        metrics.context("meter provider shutdown")?;
        traces.context("tracer provider shutdown")?;
        Ok(())
    }
}
