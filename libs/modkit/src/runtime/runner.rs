//! ModKit runtime runner.
//!
//! Design notes:
//! - We build **one stable ModuleCtx** (`base_ctx`) and reuse it across all phases
//!   (init → rest → configure → ready → start → serve → wait → stop).
//! - Middleware is layered onto the final router only after every module has
//!   contributed its routes, so mount points see the whole route table.
//! - Shutdown can be driven by OS signals, an external `CancellationToken`,
//!   or an arbitrary future.

use crate::context::{ConfigProvider, ModuleCtx, ModuleCtxBuilder};
use crate::http::{AxumAdapter, HttpAdapter, MiddlewareConsumer};
use crate::registry::{ModuleRegistry, RegistryError};
use crate::runtime::shutdown;
use crate::telemetry::TelemetryProviders;
use axum::Router;
use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};
use tokio_util::sync::CancellationToken;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// HTTP serving options. Without them modules still run every phase but no
/// listener is bound.
pub struct HttpOptions {
    pub bind_addr: SocketAddr,
    pub adapter: AxumAdapter,
}

/// Options for running the ModKit runner.
pub struct RunOptions {
    /// Provider of module config sections (raw JSON by module name).
    pub modules_cfg: Arc<dyn ConfigProvider>,
    /// Modules registered by the host, already topo-sorted.
    pub registry: ModuleRegistry,
    pub http: Option<HttpOptions>,
    /// Shared providers; shut down after the stop phase.
    pub telemetry: Option<TelemetryProviders>,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
}

/// rest → global prefix → configure. The result is the router the server
/// would serve.
pub fn compose_router(
    registry: &ModuleRegistry,
    base_ctx: &ModuleCtx,
) -> Result<Router, RegistryError> {
    tracing::info!("Phase: rest (sync)");
    let routes = registry.run_rest_phase(base_ctx, Router::new())?;

    let router = match base_ctx.http_adapter().and_then(|a| a.global_prefix().map(str::to_owned)) {
        Some(prefix) => Router::new().nest(&prefix, routes),
        None => routes,
    };

    tracing::info!("Phase: configure");
    let mut consumer = MiddlewareConsumer::new();
    registry.run_configure_phase(base_ctx, &mut consumer)?;
    tracing::debug!(count = consumer.len(), "middleware registrations collected");
    Ok(consumer.apply_to(router))
}

fn spawn_shutdown_waiter(shutdown_opts: ShutdownOptions, cancel: &CancellationToken) {
    match shutdown_opts {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = shutdown::wait_for_shutdown().await {
                    tracing::warn!(
                        error = %e,
                        "shutdown: primary waiter failed; falling back to ctrl_c()"
                    );
                    let _ = tokio::signal::ctrl_c().await;
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }
}

/// Full cycle: init → rest → configure → ready → start → serve → wait → stop.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let RunOptions {
        modules_cfg,
        registry,
        http,
        telemetry,
        shutdown,
    } = opts;

    let hub = Arc::new(crate::client_hub::ClientHub::default());
    let cancel = match &shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };
    spawn_shutdown_waiter(shutdown, &cancel);

    let mut ctx_builder = ModuleCtxBuilder::new(cancel.clone())
        .with_client_hub(hub)
        .with_config_provider(modules_cfg);
    if let Some(http) = &http {
        ctx_builder = ctx_builder.with_http_adapter(Arc::new(http.adapter.clone()));
    }
    if let Some(t) = &telemetry {
        ctx_builder = ctx_builder
            .with_meter_provider(t.meter_provider())
            .with_tracer_provider(t.tracer_provider());
    }
    let base_ctx = ctx_builder.build();

    tracing::info!("Phase: init");
    registry.run_init_phase(&base_ctx).await?;

    let router = compose_router(&registry, &base_ctx)?;

    tracing::info!("Phase: ready");
    registry.run_ready_phase(&base_ctx).await?;

    tracing::info!("Phase: start");
    registry.run_start_phase(cancel.clone()).await?;

    let server = match http {
        Some(http) => {
            let listener = tokio::net::TcpListener::bind(http.bind_addr).await?;
            tracing::info!(
                addr = %listener.local_addr()?,
                adapter = http.adapter.name(),
                "HTTP server listening"
            );
            let token = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    // WAIT
    cancel.cancelled().await;

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => tracing::info!("HTTP server stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
            Err(e) => tracing::error!(error = %e, "HTTP server task join error"),
        }
    }

    tracing::info!("Phase: stop");
    registry.run_stop_phase(cancel).await?;

    if let Some(t) = telemetry {
        if let Err(e) = t.shutdown() {
            tracing::warn!(error = %e, "telemetry shutdown failed");
        }
    }
    Ok(())
}
