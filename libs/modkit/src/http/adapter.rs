//! Identity and routing facts about the HTTP server a host runs on.

use std::fmt;

/// Adapter identity of the built-in axum host.
pub const AXUM_ADAPTER: &str = "axum";

/// The active HTTP server adapter, as seen by modules during wiring.
pub trait HttpAdapter: Send + Sync + fmt::Debug + 'static {
    /// Stable adapter identity (e.g. `"axum"`); used to key per-adapter strategies.
    fn name(&self) -> &str;

    /// Global path prefix all routes are nested under, if any (e.g. `"/api"`).
    fn global_prefix(&self) -> Option<&str> {
        None
    }
}

/// Adapter description for the axum host built by [`crate::runtime::run`].
#[derive(Debug, Clone, Default)]
pub struct AxumAdapter {
    global_prefix: Option<String>,
}

impl AxumAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nest every module route under `prefix`. Empty or `/` means no prefix.
    pub fn with_global_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim().trim_end_matches('/');
        self.global_prefix = if trimmed.is_empty() {
            None
        } else if trimmed.starts_with('/') {
            Some(trimmed.to_string())
        } else {
            Some(format!("/{trimmed}"))
        };
        self
    }
}

impl HttpAdapter for AxumAdapter {
    fn name(&self) -> &str {
        AXUM_ADAPTER
    }

    fn global_prefix(&self) -> Option<&str> {
        self.global_prefix.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_prefix_is_normalized() {
        assert_eq!(AxumAdapter::new().global_prefix(), None);
        assert_eq!(AxumAdapter::new().with_global_prefix("/").global_prefix(), None);
        assert_eq!(
            AxumAdapter::new().with_global_prefix("api/").global_prefix(),
            Some("/api")
        );
        assert_eq!(
            AxumAdapter::new().with_global_prefix("/v1/api").global_prefix(),
            Some("/v1/api")
        );
        assert_eq!(AxumAdapter::new().name(), AXUM_ADAPTER);
    }
}
