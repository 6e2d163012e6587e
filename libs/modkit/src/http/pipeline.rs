//! Middleware registration for the host request pipeline.
//!
//! Modules describe *what* should run *where* during the configure phase:
//!
//! ```rust,ignore
//! consumer
//!     .apply(Arc::new(MyMiddleware))
//!     .exclude(["/health".parse()?])
//!     .for_routes([RoutePattern::parse("/api")?]);
//! ```
//!
//! The host then layers every registration onto the final axum `Router`.
//! A registration handles a request iff the path lies under one of its
//! route patterns and no exclusion matches the request method and path.

use async_trait::async_trait;
use axum::{extract::Request, middleware::Next, response::Response, Router};
use http::Method;
use std::sync::Arc;

use super::route::{RouteInfo, RoutePattern};

/// A request-pipeline middleware contributed by a module.
#[async_trait]
pub trait HttpMiddleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Handle the request; call `next.run(req)` to continue the chain.
    async fn handle(&self, req: Request, next: Next) -> Response;
}

/// One `apply(..).exclude(..).for_routes(..)` call.
#[derive(Clone)]
pub struct MiddlewareRegistration {
    middleware: Arc<dyn HttpMiddleware>,
    routes: Vec<RoutePattern>,
    exclude: Vec<RouteInfo>,
}

impl std::fmt::Debug for MiddlewareRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistration")
            .field("middleware", &self.middleware.name())
            .field("routes", &self.routes)
            .field("exclude", &self.exclude)
            .finish()
    }
}

impl MiddlewareRegistration {
    pub fn middleware_name(&self) -> &'static str {
        self.middleware.name()
    }

    pub fn routes(&self) -> &[RoutePattern] {
        &self.routes
    }

    pub fn excluded(&self) -> &[RouteInfo] {
        &self.exclude
    }

    pub fn applies_to(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|r| r.covers(path))
            && !self.exclude.iter().any(|e| e.matches(method, path))
    }
}

/// Collects middleware registrations during the configure phase.
#[derive(Default, Debug)]
pub struct MiddlewareConsumer {
    registrations: Vec<MiddlewareRegistration>,
}

impl MiddlewareConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a registration for `middleware`. Nothing is recorded until
    /// [`MiddlewareBuilder::for_routes`] is called.
    pub fn apply(&mut self, middleware: Arc<dyn HttpMiddleware>) -> MiddlewareBuilder<'_> {
        MiddlewareBuilder {
            consumer: self,
            middleware,
            exclude: Vec::new(),
        }
    }

    pub fn registrations(&self) -> &[MiddlewareRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Layer all registrations onto `router`. The first registration ends up
    /// outermost.
    pub fn apply_to(self, router: Router) -> Router {
        self.registrations
            .into_iter()
            .rev()
            .fold(router, |router, reg| {
                tracing::debug!(
                    middleware = reg.middleware_name(),
                    routes = ?reg.routes,
                    exclude = ?reg.exclude,
                    "mounting middleware"
                );
                let reg = Arc::new(reg);
                router.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
                    let reg = reg.clone();
                    async move {
                        if reg.applies_to(req.method(), req.uri().path()) {
                            reg.middleware.handle(req, next).await
                        } else {
                            next.run(req).await
                        }
                    }
                }))
            })
    }
}

/// Builder returned by [`MiddlewareConsumer::apply`].
pub struct MiddlewareBuilder<'a> {
    consumer: &'a mut MiddlewareConsumer,
    middleware: Arc<dyn HttpMiddleware>,
    exclude: Vec<RouteInfo>,
}

impl MiddlewareBuilder<'_> {
    /// Routes the middleware must skip.
    pub fn exclude(mut self, routes: impl IntoIterator<Item = RouteInfo>) -> Self {
        self.exclude.extend(routes);
        self
    }

    /// Record the registration for the given route patterns.
    pub fn for_routes(self, routes: impl IntoIterator<Item = RoutePattern>) {
        self.consumer.registrations.push(MiddlewareRegistration {
            middleware: self.middleware,
            routes: routes.into_iter().collect(),
            exclude: self.exclude,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl HttpMiddleware for Counting {
        async fn handle(&self, req: Request, next: Next) -> Response {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.run(req).await
        }
    }

    fn app() -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/users/{id}",
                get(|| async { "user" }).delete(|| async { "deleted" }),
            )
    }

    async fn call(router: &Router, method: Method, uri: &str) {
        let resp = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn excluded_routes_bypass_middleware() {
        let mw = Arc::new(Counting::default());
        let mut consumer = MiddlewareConsumer::new();
        consumer
            .apply(mw.clone())
            .exclude(["/health".parse().unwrap()])
            .for_routes([RoutePattern::root()]);
        assert_eq!(consumer.len(), 1);

        let router = consumer.apply_to(app());
        call(&router, Method::GET, "/health").await;
        assert_eq!(mw.0.load(Ordering::SeqCst), 0);

        call(&router, Method::GET, "/users/1").await;
        assert_eq!(mw.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn method_scoped_exclusion() {
        let mw = Arc::new(Counting::default());
        let mut consumer = MiddlewareConsumer::new();
        consumer
            .apply(mw.clone())
            .exclude(["DELETE /users/:id".parse().unwrap()])
            .for_routes([RoutePattern::root()]);

        let router = consumer.apply_to(app());
        call(&router, Method::DELETE, "/users/1").await;
        assert_eq!(mw.0.load(Ordering::SeqCst), 0);
        call(&router, Method::GET, "/users/1").await;
        assert_eq!(mw.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn routes_outside_mount_point_are_skipped() {
        let mw = Arc::new(Counting::default());
        let mut consumer = MiddlewareConsumer::new();
        consumer
            .apply(mw.clone())
            .for_routes([RoutePattern::parse("/users").unwrap()]);

        let router = consumer.apply_to(app());
        call(&router, Method::GET, "/health").await;
        call(&router, Method::GET, "/users/9").await;
        assert_eq!(mw.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn apply_without_for_routes_records_nothing() {
        let mut consumer = MiddlewareConsumer::new();
        let builder = consumer.apply(Arc::new(Counting::default()));
        drop(builder);
        assert!(consumer.is_empty());
    }
}
