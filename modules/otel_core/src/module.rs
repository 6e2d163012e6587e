use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use modkit::contracts::{MiddlewareModule, Module, ReadyModule, StatefulModule};
use modkit::{MiddlewareConsumer, ModuleCtx, RegistryBuilder, SharedMeterProvider};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::OpenTelemetryOptions;
use crate::error::{OptionsError, StartupError};
use crate::host_metrics::{HostMetricsFactory, ProcHostMetrics, SamplerHandle, HOST_METRICS_SAMPLER};
use crate::middleware::ApiMetricsMiddleware;
use crate::mount::{apply_plan, plan_mount, MountPointResolver};
use crate::services::{MetricService, TraceService};
use crate::source::{AsyncOptions, OptionsSource};

/// Registry name of the integration module.
pub const MODULE_NAME: &str = "otel_core";

/// OpenTelemetry integration module.
///
/// * init: resolves options, registers [`TraceService`] and [`MetricService`]
///   into the client hub
/// * configure: mounts the API-metrics middleware when enabled
/// * ready: starts the `host-metrics` sampler when enabled
/// * stop: stops the sampler
pub struct OpenTelemetryModule {
    source: OptionsSource,
    imports: Vec<&'static str>,
    mount_points: MountPointResolver,
    host_metrics: Arc<dyn HostMetricsFactory>,
    stop_timeout: Duration,

    options: ArcSwapOption<OpenTelemetryOptions>,
    metrics: ArcSwapOption<MetricService>,
    sampler: Mutex<Option<SamplerHandle>>,
    sampler_started: AtomicBool,
}

impl OpenTelemetryModule {
    /// Options known up front.
    pub fn for_root(options: OpenTelemetryOptions) -> Self {
        Self::from_source(OptionsSource::Direct(options))
    }

    /// Options produced during init. Fails right away when the descriptor
    /// names no strategy or more than one.
    pub fn for_root_async(options: AsyncOptions) -> Result<Self, OptionsError> {
        let imports = options.imported_modules().to_vec();
        let mut module = Self::from_source(options.into_source()?);
        module.imports = imports;
        Ok(module)
    }

    pub fn from_source(source: OptionsSource) -> Self {
        Self {
            source,
            imports: Vec::new(),
            mount_points: MountPointResolver::default(),
            host_metrics: Arc::new(ProcHostMetrics::default()),
            stop_timeout: Duration::from_secs(5),
            options: ArcSwapOption::empty(),
            metrics: ArcSwapOption::empty(),
            sampler: Mutex::new(None),
            sampler_started: AtomicBool::new(false),
        }
    }

    pub fn with_host_metrics_factory(mut self, factory: Arc<dyn HostMetricsFactory>) -> Self {
        self.host_metrics = factory;
        self
    }

    pub fn with_mount_points(mut self, resolver: MountPointResolver) -> Self {
        self.mount_points = resolver;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Modules that must init before this one.
    pub fn dependencies(&self) -> &[&'static str] {
        &self.imports
    }

    /// Resolved options; `None` before init.
    pub fn options(&self) -> Option<Arc<OpenTelemetryOptions>> {
        self.options.load_full()
    }

    pub fn sampler_running(&self) -> bool {
        self.sampler.lock().as_ref().is_some_and(SamplerHandle::is_running)
    }

    /// Register every capability of the module under [`MODULE_NAME`].
    pub fn register(self, builder: &mut RegistryBuilder) -> Arc<Self> {
        let deps = self.imports.clone();
        let module = Arc::new(self);
        builder.register_core_with_meta(MODULE_NAME, deps, module.clone());
        builder.register_middleware_with_meta(MODULE_NAME, module.clone());
        builder.register_ready_with_meta(MODULE_NAME, module.clone());
        builder.register_stateful_with_meta(MODULE_NAME, module.clone());
        module
    }

    fn resolved(&self) -> anyhow::Result<Arc<OpenTelemetryOptions>> {
        self.options
            .load_full()
            .ok_or_else(|| anyhow::anyhow!("{MODULE_NAME}: options used before init"))
    }
}

impl std::fmt::Debug for OpenTelemetryModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenTelemetryModule")
            .field("source", &self.source)
            .field("imports", &self.imports)
            .field("mount_points", &self.mount_points)
            .field("resolved", &self.options.load().is_some())
            .field("sampler_started", &self.sampler_started.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl Module for OpenTelemetryModule {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let options = self.source.resolve(ctx).await?;
        tracing::info!(
            source = self.source.kind(),
            host_metrics = options.host_metrics_enabled(),
            api_metrics = options.api_metrics().is_some(),
            "telemetry options resolved"
        );
        self.options.store(Some(Arc::new(options)));

        let meter_provider: SharedMeterProvider = ctx.meter_provider().unwrap_or_else(|| {
            tracing::debug!("no shared meter provider, metrics stay in-process");
            Arc::new(SdkMeterProvider::builder().build())
        });
        let tracer_provider = ctx.tracer_provider().unwrap_or_else(|| {
            tracing::debug!("no shared tracer provider, spans stay in-process");
            SdkTracerProvider::builder().build()
        });

        let metrics = Arc::new(MetricService::new(&meter_provider));
        let hub = ctx.client_hub();
        hub.register::<TraceService>(Arc::new(TraceService::new(&tracer_provider)));
        hub.register::<MetricService>(metrics.clone());
        self.metrics.store(Some(metrics));
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl MiddlewareModule for OpenTelemetryModule {
    fn configure(&self, ctx: &ModuleCtx, consumer: &mut MiddlewareConsumer) -> anyhow::Result<()> {
        let options = self.resolved()?;
        let adapter = ctx.http_adapter();
        let plan = plan_mount(&options, adapter.as_deref(), &self.mount_points);
        let Some(api) = options.api_metrics().filter(|_| plan.should_mount) else {
            tracing::debug!("API metrics disabled");
            return Ok(());
        };

        let metrics = self
            .metrics
            .load_full()
            .ok_or_else(|| anyhow::anyhow!("{MODULE_NAME}: metric service missing"))?;
        let middleware = Arc::new(ApiMetricsMiddleware::new(&metrics, api));
        apply_plan(&plan, consumer, middleware);
        Ok(())
    }
}

#[async_trait]
impl ReadyModule for OpenTelemetryModule {
    async fn on_ready(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let options = self.resolved()?;
        if !options.host_metrics_enabled() {
            tracing::debug!("host metrics disabled");
            return Ok(());
        }

        let meter_provider = ctx
            .meter_provider()
            .ok_or(StartupError::MeterProviderUnavailable)?;

        let mut slot = self.sampler.lock();
        if self.sampler_started.swap(true, Ordering::AcqRel) {
            tracing::warn!(sampler = HOST_METRICS_SAMPLER, "sampler already started, ignoring");
            return Ok(());
        }
        let handle = self
            .host_metrics
            .start(
                HOST_METRICS_SAMPLER,
                meter_provider,
                options.host_metrics_interval(),
                ctx.cancellation_token().child_token(),
            )
            .map_err(|source| StartupError::Sampler {
                name: HOST_METRICS_SAMPLER.to_string(),
                source,
            })?;
        *slot = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl StatefulModule for OpenTelemetryModule {
    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let handle = self.sampler.lock().take();
        if let Some(handle) = handle {
            let reason = handle.stop(self.stop_timeout).await?;
            tracing::info!(sampler = HOST_METRICS_SAMPLER, ?reason, "sampler stopped");
        }
        Ok(())
    }
}
