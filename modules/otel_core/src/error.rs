use modkit::client_hub::{ClientHubError, TypeKey};
use thiserror::Error;

/// Failures while building or resolving an options source.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("async options need exactly one of use_factory, use_class or use_existing; none was set")]
    MissingStrategy,
    #[error("async options need exactly one strategy, got: {}", .0.join(", "))]
    ConflictingStrategies(Vec<&'static str>),
    #[error("options factory dependency '{0}' is not registered")]
    MissingDependency(TypeKey),
    #[error("options factory failed")]
    Factory(#[source] anyhow::Error),
    #[error(transparent)]
    Container(#[from] ClientHubError),
}

/// Failures of the application-ready hook.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("host metrics are enabled but no meter provider is available")]
    MeterProviderUnavailable,
    #[error("failed to start sampler '{name}'")]
    Sampler {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
