use async_trait::async_trait;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use modkit::HttpMiddleware;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::time::Instant;

use crate::config::ApiMetricsOptions;
use crate::services::MetricService;

struct Instruments {
    request_count: Counter<u64>,
    response_count: Counter<u64>,
    duration: Histogram<f64>,
    success_count: Counter<u64>,
    error_count: Counter<u64>,
    abort_count: Counter<u64>,
    client_error_count: Counter<u64>,
}

/// Records request/response metrics for every request it is mounted on.
pub struct ApiMetricsMiddleware {
    instruments: Instruments,
    default_attributes: Vec<KeyValue>,
    ignore_undefined_routes: bool,
}

impl ApiMetricsMiddleware {
    pub fn new(metrics: &MetricService, options: &ApiMetricsOptions) -> Self {
        let prefix = options.prefix.as_deref().unwrap_or_default();
        let name = |n: &str| format!("{prefix}{n}");
        Self {
            instruments: Instruments {
                request_count: metrics.counter(&name("http.server.request.count")),
                response_count: metrics.counter(&name("http.server.response.count")),
                duration: metrics.histogram(&name("http.server.duration")),
                success_count: metrics.counter(&name("http.server.response.success.count")),
                error_count: metrics.counter(&name("http.server.response.error.count")),
                abort_count: metrics.counter(&name("http.server.abort.count")),
                client_error_count: metrics.counter(&name("http.client.request.error.count")),
            },
            default_attributes: options
                .default_attributes
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                .collect(),
            ignore_undefined_routes: options.ignore_undefined_routes,
        }
    }

    fn attributes(&self, method: &str, route: &str) -> Vec<KeyValue> {
        let mut attrs = self.default_attributes.clone();
        attrs.push(KeyValue::new("method", method.to_owned()));
        attrs.push(KeyValue::new("route", route.to_owned()));
        attrs
    }
}

#[async_trait]
impl HttpMiddleware for ApiMetricsMiddleware {
    fn name(&self) -> &'static str {
        "api-metrics"
    }

    async fn handle(&self, req: Request, next: Next) -> Response {
        let route = match req.extensions().get::<MatchedPath>() {
            Some(matched) => matched.as_str().to_owned(),
            None if self.ignore_undefined_routes => return next.run(req).await,
            None => req.uri().path().to_owned(),
        };
        let method = req.method().as_str().to_owned();

        let mut attrs = self.attributes(&method, &route);
        self.instruments.request_count.add(1, &attrs);

        let started = Instant::now();
        let response = next.run(req).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = response.status();
        attrs.push(KeyValue::new("status", i64::from(status.as_u16())));

        let i = &self.instruments;
        i.response_count.add(1, &attrs);
        i.duration.record(elapsed_ms, &attrs);
        if status.is_client_error() || status.is_server_error() {
            i.error_count.add(1, &attrs);
        } else {
            i.success_count.add(1, &attrs);
        }
        if status.is_server_error() {
            i.abort_count.add(1, &attrs);
        }
        if status.is_client_error() {
            i.client_error_count.add(1, &attrs);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit::SharedMeterProvider;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn prefix_applies_to_every_instrument() {
        let provider: SharedMeterProvider = Arc::new(SdkMeterProvider::builder().build());
        let metrics = MetricService::new(&provider);
        let opts = ApiMetricsOptions {
            enable: true,
            prefix: Some("shop_".into()),
            default_attributes: BTreeMap::from([("env".to_string(), "test".to_string())]),
            ..Default::default()
        };
        let mw = ApiMetricsMiddleware::new(&metrics, &opts);
        assert_eq!(metrics.instrument_count(), 7);

        let attrs = mw.attributes("GET", "/users/{id}");
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0], KeyValue::new("env", "test"));

        // same names, same instruments
        let _again = ApiMetricsMiddleware::new(&metrics, &opts);
        assert_eq!(metrics.instrument_count(), 7);
    }
}
