use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::context::ModuleCtx;
use crate::http::MiddlewareConsumer;

/// Core module: DI/wiring. Providers a module exports are registered into the
/// client hub here.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Route contribution; pure wiring, must be sync. Runs after init.
pub trait RestfulModule: Send + Sync {
    fn register_rest(&self, ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router>;
}

/// Request-pipeline contribution. Runs once, after routes are registered and
/// before the server accepts requests.
pub trait MiddlewareModule: Send + Sync {
    fn configure(&self, ctx: &ModuleCtx, consumer: &mut MiddlewareConsumer) -> anyhow::Result<()>;
}

/// Application-ready hook. Runs once all modules are initialized and the
/// pipeline is configured.
#[async_trait]
pub trait ReadyModule: Send + Sync {
    async fn on_ready(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
}

#[async_trait]
pub trait StatefulModule: Send + Sync {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}
