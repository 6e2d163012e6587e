//! OpenTelemetry SDK provider bootstrap
//!
//! The host builds the meter and tracer providers once at process start and
//! hands them to modules through [`crate::ModuleCtx`]. Nothing here touches the
//! `opentelemetry::global` singletons.

pub mod providers;

pub use providers::{SharedMeterProvider, TelemetryProviders};
