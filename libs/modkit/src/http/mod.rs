//! HTTP host plumbing for modkit
//!
//! Adapter identity, route patterns and the middleware pipeline modules use
//! to scope request middleware.

pub mod adapter;
pub mod pipeline;
pub mod route;

pub use adapter::{AxumAdapter, HttpAdapter, AXUM_ADAPTER};
pub use pipeline::{HttpMiddleware, MiddlewareBuilder, MiddlewareConsumer, MiddlewareRegistration};
pub use route::{RouteInfo, RoutePattern, RoutePatternError};
