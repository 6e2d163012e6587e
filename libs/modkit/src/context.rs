use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client_hub::ClientHub;
use crate::http::HttpAdapter;
use crate::telemetry::SharedMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Provider of module-specific configuration (raw JSON sections only).
pub trait ConfigProvider: Send + Sync {
    /// Returns raw JSON section for the module, if any.
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;
}

/// Everything a module may borrow from the host while wiring itself.
#[derive(Clone)]
pub struct ModuleCtx {
    pub(crate) config_provider: Option<Arc<dyn ConfigProvider>>,
    pub(crate) client_hub: Arc<ClientHub>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) module_name: Option<Arc<str>>,
    pub(crate) http_adapter: Option<Arc<dyn HttpAdapter>>,
    pub(crate) meter_provider: Option<SharedMeterProvider>,
    pub(crate) tracer_provider: Option<SdkTracerProvider>,
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module", &self.module_name)
            .field("http_adapter", &self.http_adapter)
            .field("has_config", &self.config_provider.is_some())
            .field("has_meter_provider", &self.meter_provider.is_some())
            .field("has_tracer_provider", &self.tracer_provider.is_some())
            .finish()
    }
}

pub struct ModuleCtxBuilder {
    inner: ModuleCtx,
}

impl ModuleCtxBuilder {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: ModuleCtx::from_token(token),
        }
    }
    pub fn with_config_provider(mut self, p: Arc<dyn ConfigProvider>) -> Self {
        self.inner.config_provider = Some(p);
        self
    }
    pub fn with_client_hub(mut self, hub: Arc<ClientHub>) -> Self {
        self.inner.client_hub = hub;
        self
    }
    pub fn with_http_adapter(mut self, adapter: Arc<dyn HttpAdapter>) -> Self {
        self.inner.http_adapter = Some(adapter);
        self
    }
    pub fn with_meter_provider(mut self, provider: SharedMeterProvider) -> Self {
        self.inner.meter_provider = Some(provider);
        self
    }
    pub fn with_tracer_provider(mut self, provider: SdkTracerProvider) -> Self {
        self.inner.tracer_provider = Some(provider);
        self
    }
    /// Scope the built context to one module (mostly for tests; the registry
    /// scopes contexts itself).
    pub fn for_module(mut self, name: &str) -> Self {
        self.inner = self.inner.for_module(name);
        self
    }
    pub fn build(self) -> ModuleCtx {
        self.inner
    }
}

impl ModuleCtx {
    pub(crate) fn from_token(token: CancellationToken) -> Self {
        Self {
            config_provider: None,
            client_hub: Arc::new(ClientHub::default()),
            cancellation_token: token,
            module_name: None,
            http_adapter: None,
            meter_provider: None,
            tracer_provider: None,
        }
    }

    /// Scope context to a specific module name (used by the registry).
    pub(crate) fn for_module(mut self, name: &str) -> Self {
        self.module_name = Some(Arc::<str>::from(name));
        self
    }

    // ---- public read-only API for modules ----

    pub fn client_hub(&self) -> Arc<ClientHub> {
        self.client_hub.clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn current_module(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// The active HTTP server adapter, when the host serves HTTP.
    pub fn http_adapter(&self) -> Option<Arc<dyn HttpAdapter>> {
        self.http_adapter.clone()
    }

    /// Shared process-wide meter provider, when telemetry is set up.
    pub fn meter_provider(&self) -> Option<SharedMeterProvider> {
        self.meter_provider.clone()
    }

    /// Shared process-wide tracer provider, when telemetry is set up.
    pub fn tracer_provider(&self) -> Option<SdkTracerProvider> {
        self.tracer_provider.clone()
    }

    /// Best-effort: deserialize the module's config into `T`, fallback to `T::default()`
    /// if section is missing or invalid.
    pub fn module_config<T: DeserializeOwned + Default>(&self) -> T {
        match (&self.module_name, &self.config_provider) {
            (Some(name), Some(p)) => p
                .get_module_config(name)
                .and_then(|v| serde_json::from_value::<T>(v.clone()).ok())
                .unwrap_or_default(),
            _ => T::default(),
        }
    }

    /// Strict: deserialize the module's config into `T`, returning a pathful error on failure.
    pub fn module_config_required<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let name = self
            .module_name
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("context is not scoped to a module"))?;

        let prov = self
            .config_provider
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no ConfigProvider"))?;

        let val = prov
            .get_module_config(name)
            .ok_or_else(|| anyhow::anyhow!("missing module config: {name}"))?;

        let out: T = serde_json::from_value(val.clone())
            .map_err(|e| anyhow::anyhow!("invalid {name} config: {}", e))?;
        Ok(out)
    }
}
