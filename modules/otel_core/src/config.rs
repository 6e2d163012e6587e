use modkit::RouteInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default period between two host-metrics samples.
pub const DEFAULT_HOST_METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Telemetry integration options. Every field is optional; an empty document
/// (`{}`) disables both the API-metrics middleware and the host sampler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenTelemetryOptions {
    pub metrics: Option<MetricsOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    #[serde(alias = "hostMetrics")]
    pub host_metrics: bool,
    #[serde(alias = "hostMetricsInterval", with = "humantime_serde")]
    pub host_metrics_interval: Duration,
    #[serde(alias = "apiMetrics")]
    pub api_metrics: ApiMetricsOptions,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            host_metrics: false,
            host_metrics_interval: DEFAULT_HOST_METRICS_INTERVAL,
            api_metrics: ApiMetricsOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiMetricsOptions {
    pub enable: bool,
    /// Routes the API-metrics middleware skips, in declaration order.
    #[serde(alias = "ignoreRoutes")]
    pub ignore_routes: Vec<RouteInfo>,
    /// Attributes added to every recorded data point.
    #[serde(alias = "defaultAttributes")]
    pub default_attributes: BTreeMap<String, String>,
    /// Skip requests that matched no registered route.
    #[serde(alias = "ignoreUndefinedRoutes")]
    pub ignore_undefined_routes: bool,
    /// Prepended to every metric name, e.g. `myapp_`.
    pub prefix: Option<String>,
}

impl OpenTelemetryOptions {
    pub fn host_metrics_enabled(&self) -> bool {
        self.metrics.as_ref().is_some_and(|m| m.host_metrics)
    }

    pub fn host_metrics_interval(&self) -> Duration {
        self.metrics
            .as_ref()
            .map_or(DEFAULT_HOST_METRICS_INTERVAL, |m| m.host_metrics_interval)
    }

    /// API-metrics settings, present only when the middleware is enabled.
    pub fn api_metrics(&self) -> Option<&ApiMetricsOptions> {
        self.metrics
            .as_ref()
            .map(|m| &m.api_metrics)
            .filter(|a| a.enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn empty_document_disables_everything() {
        let opts: OpenTelemetryOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(opts, OpenTelemetryOptions::default());
        assert!(!opts.host_metrics_enabled());
        assert!(opts.api_metrics().is_none());
        assert_eq!(opts.host_metrics_interval(), DEFAULT_HOST_METRICS_INTERVAL);
    }

    #[test]
    fn camel_case_keys_are_accepted() {
        let opts: OpenTelemetryOptions = serde_json::from_value(serde_json::json!({
            "metrics": {
                "hostMetrics": true,
                "hostMetricsInterval": "2s",
                "apiMetrics": {
                    "enable": true,
                    "ignoreRoutes": ["/health", "GET /metrics"],
                    "defaultAttributes": { "env": "test" },
                    "ignoreUndefinedRoutes": true,
                    "prefix": "app_"
                }
            }
        }))
        .unwrap();

        assert!(opts.host_metrics_enabled());
        assert_eq!(opts.host_metrics_interval(), Duration::from_secs(2));
        let api = opts.api_metrics().unwrap();
        assert_eq!(api.ignore_routes.len(), 2);
        assert_eq!(api.ignore_routes[1].method, Some(Method::GET));
        assert_eq!(api.default_attributes["env"], "test");
        assert!(api.ignore_undefined_routes);
        assert_eq!(api.prefix.as_deref(), Some("app_"));
    }

    #[test]
    fn snake_case_keys_are_accepted() {
        let opts: OpenTelemetryOptions = serde_json::from_value(serde_json::json!({
            "metrics": { "host_metrics": true, "api_metrics": { "enable": false } }
        }))
        .unwrap();
        assert!(opts.host_metrics_enabled());
        assert!(opts.api_metrics().is_none());
    }
}
