use modkit::{Module, ModuleCtx, ModuleCtxBuilder, ReadyModule, SharedMeterProvider, StatefulModule};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use otel_core::{
    HostMetricsFactory, MetricsOptions, OpenTelemetryModule, OpenTelemetryOptions, SamplerHandle,
    StartupError, HOST_METRICS_SAMPLER,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingFactory {
    started: Mutex<Vec<(String, Duration)>>,
}

impl RecordingFactory {
    fn names(&self) -> Vec<String> {
        self.started.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl HostMetricsFactory for RecordingFactory {
    fn start(
        &self,
        name: &'static str,
        _meter_provider: SharedMeterProvider,
        interval: Duration,
        cancel: CancellationToken,
    ) -> anyhow::Result<SamplerHandle> {
        self.started.lock().push((name.to_string(), interval));
        SamplerHandle::spawn(name, cancel, |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        })
    }
}

fn host_metrics(enabled: Option<bool>) -> OpenTelemetryOptions {
    OpenTelemetryOptions {
        metrics: enabled.map(|host_metrics| MetricsOptions {
            host_metrics,
            host_metrics_interval: Duration::from_secs(3),
            ..Default::default()
        }),
    }
}

fn ctx(with_meter: bool) -> ModuleCtx {
    let mut b = ModuleCtxBuilder::new(CancellationToken::new()).for_module("otel_core");
    if with_meter {
        b = b.with_meter_provider(Arc::new(SdkMeterProvider::builder().build()));
    }
    b.build()
}

async fn ready_module(
    options: OpenTelemetryOptions,
) -> (OpenTelemetryModule, Arc<RecordingFactory>, ModuleCtx) {
    let factory = Arc::new(RecordingFactory::default());
    let module = OpenTelemetryModule::for_root(options).with_host_metrics_factory(factory.clone());
    let ctx = ctx(true);
    module.init(&ctx).await.unwrap();
    (module, factory, ctx)
}

#[tokio::test]
async fn host_metrics_start_exactly_one_named_sampler() {
    let (module, factory, ctx) = ready_module(host_metrics(Some(true))).await;

    module.on_ready(&ctx).await.unwrap();
    assert_eq!(factory.names(), vec![HOST_METRICS_SAMPLER.to_string()]);
    assert_eq!(factory.started.lock()[0].1, Duration::from_secs(3));
    assert!(module.sampler_running());

    module.stop(CancellationToken::new()).await.unwrap();
    assert!(!module.sampler_running());
}

#[tokio::test]
async fn second_ready_call_does_not_start_another_sampler() {
    let (module, factory, ctx) = ready_module(host_metrics(Some(true))).await;

    module.on_ready(&ctx).await.unwrap();
    module.on_ready(&ctx).await.unwrap();
    assert_eq!(factory.names().len(), 1);

    module.stop(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn disabled_or_omitted_host_metrics_start_nothing() {
    for opts in [host_metrics(Some(false)), host_metrics(None)] {
        let (module, factory, ctx) = ready_module(opts).await;
        module.on_ready(&ctx).await.unwrap();
        assert!(factory.names().is_empty());
        assert!(!module.sampler_running());
    }
}

#[tokio::test]
async fn missing_meter_provider_is_fatal() {
    let factory = Arc::new(RecordingFactory::default());
    let module =
        OpenTelemetryModule::for_root(host_metrics(Some(true))).with_host_metrics_factory(factory.clone());
    let ctx = ctx(false);
    module.init(&ctx).await.unwrap();

    let err = module.on_ready(&ctx).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StartupError>(),
        Some(StartupError::MeterProviderUnavailable)
    ));
    assert!(factory.names().is_empty());
}

#[tokio::test]
async fn zero_interval_fails_startup() {
    let options: OpenTelemetryOptions = serde_json::from_value(serde_json::json!({
        "metrics": { "hostMetrics": true, "hostMetricsInterval": "0s" }
    }))
    .unwrap();
    let module = OpenTelemetryModule::for_root(options);
    let ctx = ctx(true);
    module.init(&ctx).await.unwrap();

    let err = module.on_ready(&ctx).await.unwrap_err();
    match err.downcast_ref::<StartupError>() {
        Some(StartupError::Sampler { name, .. }) => assert_eq!(name, HOST_METRICS_SAMPLER),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!module.sampler_running());
}

#[tokio::test]
async fn stop_before_ready_is_a_no_op() {
    let (module, _factory, _ctx) = ready_module(host_metrics(Some(true))).await;
    module.stop(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn ready_before_init_fails() {
    let module = OpenTelemetryModule::for_root(host_metrics(Some(true)))
        .with_host_metrics_factory(Arc::new(RecordingFactory::default()));
    assert!(module.on_ready(&ctx(true)).await.is_err());
}
