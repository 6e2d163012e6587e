//! OpenTelemetry integration for ModKit hosts.
//!
//! ```rust,ignore
//! let mut builder = RegistryBuilder::new();
//! OpenTelemetryModule::for_root_async(
//!     AsyncOptions::new().use_factory(|ctx| async move {
//!         ctx.module_config_required::<OpenTelemetryOptions>()
//!     }),
//! )?
//! .register(&mut builder);
//! ```

pub mod config;
pub mod error;
pub mod host_metrics;
pub mod middleware;
pub mod module;
pub mod mount;
pub mod services;
pub mod source;

pub use config::{ApiMetricsOptions, MetricsOptions, OpenTelemetryOptions};
pub use error::{OptionsError, StartupError};
pub use host_metrics::{
    HostMetricsFactory, ProcHostMetrics, SamplerHandle, HOST_METRICS_SAMPLER,
};
pub use middleware::ApiMetricsMiddleware;
pub use module::{OpenTelemetryModule, MODULE_NAME};
pub use mount::{apply_plan, plan_mount, MountPlan, MountPointResolver};
pub use services::{MetricService, TraceService};
pub use source::{AsyncOptions, Dependency, OptionsFactory, OptionsSource};
