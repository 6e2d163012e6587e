use modkit::{
    ConfigProvider, RegistryBuilder, RunOptions, SharedMeterProvider, ShutdownOptions,
    TelemetryProviders,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use otel_core::{
    AsyncOptions, HostMetricsFactory, OpenTelemetryModule, OpenTelemetryOptions, SamplerHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct ModulesCfg(HashMap<String, serde_json::Value>);
impl ConfigProvider for ModulesCfg {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.0.get(module_name)
    }
}

#[derive(Default)]
struct CountingFactory {
    running: Arc<AtomicUsize>,
    starts: AtomicUsize,
}

impl HostMetricsFactory for CountingFactory {
    fn start(
        &self,
        name: &'static str,
        _meter_provider: SharedMeterProvider,
        _interval: Duration,
        cancel: CancellationToken,
    ) -> anyhow::Result<SamplerHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let running = self.running.clone();
        SamplerHandle::spawn(name, cancel, move |cancel| async move {
            running.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn host_resolves_options_from_module_config_and_runs_sampler() {
    let cfg = ModulesCfg(HashMap::from([(
        "otel_core".to_string(),
        serde_json::json!({ "metrics": { "hostMetrics": true, "apiMetrics": { "enable": true } } }),
    )]));

    let factory = Arc::new(CountingFactory::default());
    let mut builder = RegistryBuilder::new();
    let module = OpenTelemetryModule::for_root_async(AsyncOptions::new().use_factory(|ctx| async move {
        ctx.module_config_required::<OpenTelemetryOptions>()
    }))
    .unwrap()
    .with_host_metrics_factory(factory.clone())
    .register(&mut builder);

    let cancel = CancellationToken::new();
    let telemetry = TelemetryProviders::from_parts(
        SdkMeterProvider::builder().build(),
        SdkTracerProvider::builder().build(),
    );
    let handle = tokio::spawn(modkit::run(RunOptions {
        modules_cfg: Arc::new(cfg),
        registry: builder.build_topo_sorted().unwrap(),
        http: None,
        telemetry: Some(telemetry),
        shutdown: ShutdownOptions::Token(cancel.clone()),
    }));

    tokio::time::timeout(Duration::from_secs(2), async {
        while factory.running.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sampler should start during the ready phase");

    let options = module.options().unwrap();
    assert!(options.host_metrics_enabled());
    assert!(options.api_metrics().is_some());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(factory.starts.load(Ordering::SeqCst), 1);
    assert_eq!(factory.running.load(Ordering::SeqCst), 0);
    assert!(!module.sampler_running());
}

#[tokio::test]
async fn resolution_failure_aborts_startup() {
    let mut builder = RegistryBuilder::new();
    OpenTelemetryModule::for_root_async(
        AsyncOptions::new().use_factory(|ctx| async move { ctx.module_config_required::<OpenTelemetryOptions>() }),
    )
    .unwrap()
    .register(&mut builder);

    let result = modkit::run(RunOptions {
        modules_cfg: Arc::new(ModulesCfg(HashMap::new())),
        registry: builder.build_topo_sorted().unwrap(),
        http: None,
        telemetry: None,
        shutdown: ShutdownOptions::Token(CancellationToken::new()),
    })
    .await;

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<modkit::RegistryError>(),
        Some(modkit::RegistryError::Init { module: "otel_core", .. })
    ));
}
