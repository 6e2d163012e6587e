//! Decide whether and where the API-metrics middleware is mounted.
//!
//! Ignored routes are written relative to the application routes; when the
//! adapter nests everything under a global prefix they are joined onto it.

use modkit::http::{HttpAdapter, HttpMiddleware, MiddlewareConsumer, AXUM_ADAPTER};
use modkit::{RouteInfo, RoutePattern};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::OpenTelemetryOptions;

/// Computes the mount point for one adapter kind.
pub type MountStrategy = Arc<dyn Fn(&dyn HttpAdapter) -> RoutePattern + Send + Sync>;

/// Mount-point strategies keyed by adapter identity (`HttpAdapter::name()`).
#[derive(Clone)]
pub struct MountPointResolver {
    strategies: HashMap<String, MountStrategy>,
}

fn global_prefix_or_root(adapter: &dyn HttpAdapter) -> RoutePattern {
    match adapter.global_prefix() {
        Some(prefix) => RoutePattern::parse(prefix).unwrap_or_else(|e| {
            tracing::warn!(prefix, error = %e, "invalid global prefix, mounting at root");
            RoutePattern::root()
        }),
        None => RoutePattern::root(),
    }
}

impl Default for MountPointResolver {
    fn default() -> Self {
        Self::empty().with_strategy(AXUM_ADAPTER, global_prefix_or_root)
    }
}

impl fmt::Debug for MountPointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut adapters: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        adapters.sort_unstable();
        f.debug_struct("MountPointResolver")
            .field("adapters", &adapters)
            .finish()
    }
}

impl MountPointResolver {
    /// A resolver without any strategy; every adapter mounts at `/`.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn with_strategy<F>(mut self, adapter: impl Into<String>, strategy: F) -> Self
    where
        F: Fn(&dyn HttpAdapter) -> RoutePattern + Send + Sync + 'static,
    {
        self.strategies.insert(adapter.into(), Arc::new(strategy));
        self
    }

    pub fn resolve(&self, adapter: Option<&dyn HttpAdapter>) -> RoutePattern {
        let Some(adapter) = adapter else {
            tracing::debug!("no HTTP adapter in context, mounting at root");
            return RoutePattern::root();
        };
        match self.strategies.get(adapter.name()) {
            Some(strategy) => strategy(adapter),
            None => {
                tracing::warn!(
                    adapter = adapter.name(),
                    "no mount-point strategy for HTTP adapter, falling back to root"
                );
                RoutePattern::root()
            }
        }
    }
}

/// Outcome of planning, computed once per configure phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub should_mount: bool,
    pub mount_point: RoutePattern,
    pub excluded_routes: Vec<RouteInfo>,
}

impl MountPlan {
    pub fn disabled() -> Self {
        Self {
            should_mount: false,
            mount_point: RoutePattern::root(),
            excluded_routes: Vec::new(),
        }
    }
}

pub fn plan_mount(
    options: &OpenTelemetryOptions,
    adapter: Option<&dyn HttpAdapter>,
    resolver: &MountPointResolver,
) -> MountPlan {
    let Some(api) = options.api_metrics() else {
        return MountPlan::disabled();
    };

    let mount_point = resolver.resolve(adapter);
    let excluded_routes = api
        .ignore_routes
        .iter()
        .map(|route| anchor(&mount_point, route))
        .collect();

    MountPlan {
        should_mount: true,
        mount_point,
        excluded_routes,
    }
}

fn anchor(mount_point: &RoutePattern, route: &RouteInfo) -> RouteInfo {
    if mount_point.is_root() {
        return route.clone();
    }
    match mount_point.join(route.path.as_str()) {
        Ok(path) => RouteInfo {
            path,
            method: route.method.clone(),
        },
        Err(e) => {
            tracing::warn!(route = %route, error = %e, "cannot anchor ignored route under mount point");
            route.clone()
        }
    }
}

/// Register `middleware` on the consumer according to `plan`. Returns whether
/// the pipeline was touched.
pub fn apply_plan(
    plan: &MountPlan,
    consumer: &mut MiddlewareConsumer,
    middleware: Arc<dyn HttpMiddleware>,
) -> bool {
    if !plan.should_mount {
        return false;
    }
    let builder = consumer.apply(middleware);
    if plan.excluded_routes.is_empty() {
        builder.for_routes([plan.mount_point.clone()]);
    } else {
        builder
            .exclude(plan.excluded_routes.iter().cloned())
            .for_routes([plan.mount_point.clone()]);
    }
    tracing::info!(
        mount_point = %plan.mount_point,
        excluded = plan.excluded_routes.len(),
        "API metrics middleware mounted"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiMetricsOptions, MetricsOptions};
    use modkit::AxumAdapter;

    #[derive(Debug)]
    struct OtherAdapter;
    impl HttpAdapter for OtherAdapter {
        fn name(&self) -> &str {
            "hyper-direct"
        }
        fn global_prefix(&self) -> Option<&str> {
            Some("/ignored")
        }
    }

    fn enabled(ignore: &[&str]) -> OpenTelemetryOptions {
        OpenTelemetryOptions {
            metrics: Some(MetricsOptions {
                api_metrics: ApiMetricsOptions {
                    enable: true,
                    ignore_routes: ignore.iter().map(|r| r.parse().unwrap()).collect(),
                    ..Default::default()
                },
                ..Default::default()
            }),
        }
    }

    #[test]
    fn axum_strategy_uses_global_prefix() {
        let r = MountPointResolver::default();
        let plain = AxumAdapter::new();
        let prefixed = AxumAdapter::new().with_global_prefix("/api");
        assert_eq!(r.resolve(Some(&plain)), RoutePattern::root());
        assert_eq!(r.resolve(Some(&prefixed)).as_str(), "/api");
    }

    #[test]
    fn unknown_adapter_and_missing_adapter_fall_back_to_root() {
        let r = MountPointResolver::default();
        assert!(r.resolve(Some(&OtherAdapter)).is_root());
        assert!(r.resolve(None).is_root());
    }

    #[test]
    fn custom_strategy_is_keyed_by_adapter_name() {
        let r = MountPointResolver::empty()
            .with_strategy("hyper-direct", |_a: &dyn HttpAdapter| {
                RoutePattern::parse("/svc").unwrap()
            });
        assert_eq!(r.resolve(Some(&OtherAdapter)).as_str(), "/svc");
        assert!(r.resolve(Some(&AxumAdapter::new())).is_root());
    }

    #[test]
    fn disabled_plan_does_not_touch_pipeline() {
        let plan = plan_mount(
            &OpenTelemetryOptions::default(),
            Some(&AxumAdapter::new()),
            &MountPointResolver::default(),
        );
        assert_eq!(plan, MountPlan::disabled());
    }

    #[test]
    fn ignored_routes_are_anchored_under_prefix() {
        let adapter = AxumAdapter::new().with_global_prefix("/api");
        let plan = plan_mount(
            &enabled(&["/health", "GET /metrics"]),
            Some(&adapter),
            &MountPointResolver::default(),
        );
        assert!(plan.should_mount);
        assert_eq!(plan.mount_point.as_str(), "/api");
        let rendered: Vec<String> = plan.excluded_routes.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["/api/health", "GET /api/metrics"]);
    }

    #[test]
    fn ignored_routes_keep_order_at_root() {
        let plan = plan_mount(
            &enabled(&["/b", "/a"]),
            Some(&AxumAdapter::new()),
            &MountPointResolver::default(),
        );
        let rendered: Vec<String> = plan.excluded_routes.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["/b", "/a"]);
    }
}
