//! # ModKit - Explicit Module System
//!
//! Modules are plain structs implementing capability traits. The host binary
//! registers them explicitly with a [`registry::RegistryBuilder`]; the
//! registry topo-sorts them by declared dependencies and the runner drives
//! the phases:
//!
//! init → rest → configure → ready → start → serve → wait → stop
//!
//! ## Example
//!
//! ```rust,ignore
//! use modkit::{registry::RegistryBuilder, Module, StatefulModule};
//!
//! let mut builder = RegistryBuilder::new();
//! let users = Arc::new(UserModule::default());
//! builder.register_core_with_meta("users", ["telemetry"], users.clone());
//! builder.register_stateful_with_meta("users", users);
//! let registry = builder.build_topo_sorted()?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod client_hub;
pub mod context;
pub mod contracts;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod runtime;
pub mod telemetry;

pub use client_hub::ClientHub;
pub use context::{ConfigProvider, ModuleCtx, ModuleCtxBuilder};
pub use contracts::*;
pub use http::{
    AxumAdapter, HttpAdapter, HttpMiddleware, MiddlewareConsumer, RouteInfo, RoutePattern,
};
pub use lifecycle::{Lifecycle, LifecycleError, Status, StopReason};
pub use registry::{ModuleRegistry, RegistryBuilder, RegistryError};
pub use runtime::{compose_router, run, HttpOptions, RunOptions, ShutdownOptions};
pub use telemetry::{SharedMeterProvider, TelemetryProviders};
