use async_trait::async_trait;
use axum::{routing::get, Json, Router};
use modkit::{Module, ModuleCtx, RegistryBuilder, RestfulModule};
use opentelemetry::KeyValue;
use otel_core::MetricService;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const MODULE_NAME: &str = "health";

/// Liveness endpoint. Consumes the metric service exported by `otel_core`,
/// so it is registered as a dependent of that module.
#[derive(Debug, Default)]
pub struct HealthModule;

impl HealthModule {
    pub fn register(self, builder: &mut RegistryBuilder) -> Arc<Self> {
        let module = Arc::new(self);
        builder.register_core_with_meta(MODULE_NAME, [otel_core::MODULE_NAME], module.clone());
        builder.register_rest_with_meta(MODULE_NAME, module.clone());
        module
    }
}

#[async_trait]
impl Module for HealthModule {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        ctx.client_hub().get::<MetricService>()?;
        tracing::debug!("health: metric service available");
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl RestfulModule for HealthModule {
    fn register_rest(&self, ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        let checks = ctx.client_hub().get::<MetricService>()?.counter("health.checks");
        let routes = Router::new()
            .route(
                "/health",
                get(move || {
                    let checks = checks.clone();
                    async move {
                        checks.add(1, &[KeyValue::new("status", "ok")]);
                        Json(json!({ "status": "ok" }))
                    }
                }),
            )
            .layer(TraceLayer::new_for_http());
        Ok(router.merge(routes))
    }
}
